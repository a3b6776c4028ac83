#![doc = include_str!("../README.md")]

mod error;
pub use error::{ErrorCode, ErrorData, TransportError};

/// Wire types of the relay protocol
pub mod model;
pub mod registry;
pub mod transport;

pub use model::{CallToolResult, Content, Tool};
pub use registry::{Notifier, ToolRegistry, ToolRoute};
pub use transport::{
    SessionId, StreamableHttpConfig, StreamableHttpServer,
};

// re-export
pub use schemars;
pub use serde;
pub use serde_json;
