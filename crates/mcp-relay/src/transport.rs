//! Session transport layer.
//!
//! A *session* groups the logically related exchanges of one client:
//! it is created by an `initialize` request, identified by the id the
//! server hands back, and lives until it is explicitly deleted, the
//! disconnect watcher gives up on it, or the server shuts down.
//!
//! Three pieces cooperate here:
//!
//! - [`event_log::EventLog`] records every server-to-client message
//!   under a strictly increasing sequence id, making streams resumable.
//! - [`session::SessionTransport`] drives one session's state machine
//!   and fans messages out to the log and the live connection.
//! - [`session_registry::SessionRegistry`] owns the sessions and maps
//!   ids to transports.
//!
//! [`streamable_http::StreamableHttpServer`] puts an HTTP face on all
//! of this.
use std::sync::Arc;

pub mod event_log;
pub mod session;
pub mod session_registry;
pub mod streamable_http;

pub use event_log::{EventLog, LogEntry};
pub use session::{SessionState, SessionTransport, StreamAttachment};
pub use session_registry::SessionRegistry;
pub use streamable_http::{StreamableHttpConfig, StreamableHttpServer};

/// Identifier handed to the client when a session is created.
pub type SessionId = Arc<str>;

/// Session ids come from random UUIDs: unique, and holding one id gives
/// no purchase on guessing another.
pub fn session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string().into()
}

pub const HEADER_SESSION_ID: &str = "mcp-session-id";
pub const HEADER_LAST_EVENT_ID: &str = "last-event-id";
pub const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";
pub const JSON_MIME_TYPE: &str = "application/json";
