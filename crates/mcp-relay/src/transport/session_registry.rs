//! The set of live sessions, keyed by session id.
use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use super::{SessionId, session::SessionTransport, session_id};
use crate::{
    error::TransportError,
    model::Implementation,
    registry::ToolRegistry,
};

/// Owns every session the server currently knows about.
///
/// Ids are generated from random UUIDs, so they are unique and not
/// guessable from one another. Lookup and removal go through one
/// read-write lock; the per-session work happens on the transports
/// themselves.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionTransport>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session in its uninitialized state and register
    /// it under a newly generated id.
    pub async fn create(
        &self,
        tools: Arc<ToolRegistry>,
        server_info: Implementation,
        instructions: Option<String>,
    ) -> (SessionId, Arc<SessionTransport>) {
        let id = session_id();
        let transport = Arc::new(SessionTransport::new(
            id.clone(),
            tools,
            server_info,
            instructions,
        ));
        self.sessions
            .write()
            .await
            .insert(id.clone(), transport.clone());
        tracing::info!(session_id = %id, "session created");
        (id, transport)
    }

    pub async fn lookup(&self, id: &str) -> Option<Arc<SessionTransport>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<SessionTransport>> {
        self.sessions.write().await.remove(id)
    }

    /// Terminate a session and forget it.
    pub async fn close(&self, id: &str) -> Result<(), TransportError> {
        let transport = self.remove(id).await.ok_or(TransportError::SessionNotFound)?;
        transport.terminate().await;
        Ok(())
    }

    /// Close a session whose live connection died at `epoch` unless a
    /// newer connection took over in the meantime.
    pub(crate) async fn close_if_detached(&self, id: &SessionId, epoch: u64) {
        let Some(transport) = self.lookup(id).await else {
            return;
        };
        if transport.terminate_if_stale(epoch).await {
            self.remove(id).await;
            tracing::info!(session_id = %id, "session closed after client disconnect");
        }
    }

    /// Terminate every session.
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        for (id, transport) in sessions {
            transport.terminate().await;
            tracing::debug!(session_id = %id, "session closed at shutdown");
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
