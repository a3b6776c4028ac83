use std::fmt;

pub use crate::model::{ErrorCode, ErrorData};

impl fmt::Display for ErrorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.0, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " ({data})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorData {}

/// Session-layer failures.
///
/// These never carry handler output. The HTTP layer maps them onto
/// status codes, the wire error body is built separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("session not found")]
    SessionNotFound,
    #[error("session closed")]
    SessionClosed,
}
