//! One session's transport: state machine, event log and live stream.
use std::{pin::pin, sync::Arc};

use tokio::sync::{Mutex, mpsc};

use super::{SessionId, event_log::{EventLog, LogEntry}};
use crate::{
    error::TransportError,
    model::{
        CallToolRequestParam, ClientNotification, ClientRequest, EmptyResult, ErrorData,
        Implementation, InitializeRequestParam, InitializeResult, JsonRpcNotification,
        JsonRpcRequest, ListToolsResult, Notification, ProgressNotificationMethod,
        ProgressNotificationParam, ProtocolVersion, RequestId, ServerCapabilities,
        ServerJsonRpcMessage, ServerNotification, ServerResult, ToolsCapability,
    },
    registry::{Notifier, ToolRegistry},
};

/// Capacity of a live stream's forwarding channel. A client that stops
/// reading long enough to fill it is detached and has to resume.
const LIVE_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of a session. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Active,
    Closed,
}

struct LiveConnection {
    tx: mpsc::Sender<LogEntry>,
    epoch: u64,
}

struct TransportInner {
    state: SessionState,
    log: EventLog,
    live: Option<LiveConnection>,
    /// Bumped on every attach. Lets the disconnect watcher tell whether
    /// a connection it saw die was ever replaced.
    attach_epoch: u64,
}

/// Hand-off for a newly attached live connection: the replayed history
/// and the channel that will carry everything published afterwards.
#[derive(Debug)]
pub struct StreamAttachment {
    pub replay: Vec<LogEntry>,
    pub live: mpsc::Receiver<LogEntry>,
    pub epoch: u64,
}

/// Server side of one session.
///
/// All mutation goes through one internal lock, so message publication
/// is serialized: every server-to-client message is appended to the
/// event log and forwarded to the live connection, if any, as a single
/// step. Tool handlers themselves run outside the lock.
pub struct SessionTransport {
    session_id: SessionId,
    tools: Arc<ToolRegistry>,
    server_info: Implementation,
    instructions: Option<String>,
    inner: Mutex<TransportInner>,
}

impl SessionTransport {
    pub fn new(
        session_id: SessionId,
        tools: Arc<ToolRegistry>,
        server_info: Implementation,
        instructions: Option<String>,
    ) -> Self {
        SessionTransport {
            session_id,
            tools,
            server_info,
            instructions,
            inner: Mutex::new(TransportInner {
                state: SessionState::Uninitialized,
                log: EventLog::new(),
                live: None,
                attach_epoch: 0,
            }),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn last_sequence_id(&self) -> u64 {
        self.inner.lock().await.log.last_sequence_id()
    }

    #[cfg(test)]
    pub(crate) async fn attach_epoch(&self) -> u64 {
        self.inner.lock().await.attach_epoch
    }

    /// Dispatch one request and produce its response.
    ///
    /// The response is appended to the event log before it is returned,
    /// so a resuming stream sees it at a stable sequence id.
    pub async fn handle_unary(
        &self,
        request: JsonRpcRequest<ClientRequest>,
    ) -> Result<ServerJsonRpcMessage, TransportError> {
        let JsonRpcRequest { id, request, .. } = request;
        {
            let inner = self.inner.lock().await;
            match inner.state {
                SessionState::Closed => return Err(TransportError::SessionClosed),
                SessionState::Uninitialized
                    if !matches!(request, ClientRequest::InitializeRequest(_)) =>
                {
                    return Ok(ServerJsonRpcMessage::error(
                        id,
                        ErrorData::invalid_request("received request before initialization", None),
                    ));
                }
                _ => {}
            }
        }
        match request {
            ClientRequest::InitializeRequest(r) => self.initialize(id, r.params).await,
            ClientRequest::PingRequest(_) => {
                self.respond(id, ServerResult::EmptyResult(EmptyResult {})).await
            }
            ClientRequest::ListToolsRequest(_) => {
                let result = ListToolsResult {
                    tools: self.tools.list_all(),
                    next_cursor: None,
                };
                self.respond(id, ServerResult::ListToolsResult(result)).await
            }
            ClientRequest::CallToolRequest(r) => self.call_tool(id, r.params).await,
        }
    }

    /// Take note of a client notification. Produces no response.
    pub async fn accept_notification(
        &self,
        notification: JsonRpcNotification<ClientNotification>,
    ) -> Result<(), TransportError> {
        if self.state().await == SessionState::Closed {
            return Err(TransportError::SessionClosed);
        }
        match notification.notification {
            ClientNotification::InitializedNotification(_) => {
                tracing::debug!(session_id = %self.session_id, "client confirmed initialization");
            }
        }
        Ok(())
    }

    /// Attach a live connection, superseding any previous one.
    ///
    /// With `last_seen` the caller first gets every logged entry with a
    /// greater sequence id, then live traffic; without it, live traffic
    /// only. Snapshot and installation happen under one lock, so no
    /// message published concurrently is missed or duplicated. The
    /// superseded connection stops receiving but the log is untouched.
    pub async fn attach_stream(
        &self,
        last_seen: Option<u64>,
    ) -> Result<StreamAttachment, TransportError> {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Closed {
            return Err(TransportError::SessionClosed);
        }
        let replay = match last_seen {
            Some(cursor) => inner.log.replay_after(cursor),
            None => Vec::new(),
        };
        let (tx, rx) = mpsc::channel(LIVE_CHANNEL_CAPACITY);
        inner.attach_epoch += 1;
        let epoch = inner.attach_epoch;
        if inner.live.replace(LiveConnection { tx, epoch }).is_some() {
            tracing::debug!(session_id = %self.session_id, epoch, "previous live stream superseded");
        }
        Ok(StreamAttachment {
            replay,
            live: rx,
            epoch,
        })
    }

    /// Close the session. Idempotent. The log is discarded and any live
    /// connection ends; a handler still running keeps running, but its
    /// output no longer reaches anyone.
    pub async fn terminate(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Closed {
            tracing::info!(session_id = %self.session_id, "session terminated");
        }
        Self::close_locked(&mut inner);
    }

    /// Close only if `epoch` is still the most recent attachment and the
    /// session is active. Used by the disconnect watcher so that a
    /// client which reconnected in the meantime is left alone.
    pub(crate) async fn terminate_if_stale(&self, epoch: u64) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Active && inner.attach_epoch == epoch {
            Self::close_locked(&mut inner);
            true
        } else {
            false
        }
    }

    async fn initialize(
        &self,
        id: RequestId,
        param: InitializeRequestParam,
    ) -> Result<ServerJsonRpcMessage, TransportError> {
        let protocol_version = if param.protocol_version.is_supported() {
            param.protocol_version
        } else {
            ProtocolVersion::LATEST
        };
        let result = InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: None }),
            },
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        };
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Closed => Err(TransportError::SessionClosed),
            SessionState::Active => Ok(ServerJsonRpcMessage::error(
                id,
                ErrorData::invalid_request("server already initialized", None),
            )),
            SessionState::Uninitialized => {
                inner.state = SessionState::Active;
                tracing::info!(
                    session_id = %self.session_id,
                    client = %param.client_info.name,
                    "session initialized"
                );
                let message =
                    ServerJsonRpcMessage::response(id, ServerResult::InitializeResult(result));
                self.publish_locked(&mut inner, message.clone());
                Ok(message)
            }
        }
    }

    async fn call_tool(
        &self,
        id: RequestId,
        params: CallToolRequestParam,
    ) -> Result<ServerJsonRpcMessage, TransportError> {
        let (notifier, mut progress_rx) = Notifier::channel(id.clone());
        let mut call = pin!(self.tools.call(params, notifier));
        let outcome = loop {
            tokio::select! {
                Some(param) = progress_rx.recv() => {
                    self.publish_progress(param).await?;
                }
                outcome = &mut call => break outcome,
            }
        };
        // Progress queued right before the handler finished still beats
        // the response into the log.
        while let Ok(param) = progress_rx.try_recv() {
            self.publish_progress(param).await?;
        }
        match outcome {
            Ok(result) => self.respond(id, ServerResult::CallToolResult(result)).await,
            Err(error) => {
                let message = ServerJsonRpcMessage::error(id, error);
                self.publish(message.clone()).await?;
                Ok(message)
            }
        }
    }

    async fn respond(
        &self,
        id: RequestId,
        result: ServerResult,
    ) -> Result<ServerJsonRpcMessage, TransportError> {
        let message = ServerJsonRpcMessage::response(id, result);
        self.publish(message.clone()).await?;
        Ok(message)
    }

    async fn publish_progress(&self, param: ProgressNotificationParam) -> Result<(), TransportError> {
        let message = ServerJsonRpcMessage::notification(ServerNotification::ProgressNotification(
            Notification {
                method: ProgressNotificationMethod,
                params: param,
            },
        ));
        self.publish(message).await.map(|_| ())
    }

    /// Append to the log and forward to the live connection in one step.
    async fn publish(&self, message: ServerJsonRpcMessage) -> Result<u64, TransportError> {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Active {
            return Err(TransportError::SessionClosed);
        }
        Ok(self.publish_locked(&mut inner, message))
    }

    fn publish_locked(&self, inner: &mut TransportInner, message: ServerJsonRpcMessage) -> u64 {
        let sequence_id = inner.log.append(message.clone());
        if let Some(live) = &inner.live {
            let frame = LogEntry {
                sequence_id,
                message,
            };
            if live.tx.try_send(frame).is_err() {
                inner.live = None;
                tracing::debug!(session_id = %self.session_id, "live stream detached");
            }
        }
        sequence_id
    }

    fn close_locked(inner: &mut TransportInner) {
        inner.state = SessionState::Closed;
        inner.live = None;
        inner.log.clear();
    }
}
