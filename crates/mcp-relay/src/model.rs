//! Wire types for the relay protocol.
//!
//! Messages are JSON-RPC 2.0. Client-to-server traffic is either a
//! [`JsonRpcRequest`] carrying a [`ClientRequest`] or a fire-and-forget
//! [`JsonRpcNotification`]. Server-to-client traffic is a response, an
//! error, or a [`ServerNotification`] pushed over the session's live
//! stream.
use std::{borrow::Cow, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod content;
mod tool;
pub use content::{Content, ImageContent, TextContent};
pub use tool::{CallToolResult, Tool};

pub type JsonObject = serde_json::Map<String, Value>;

/// Unwrap a json value as an object map, discarding anything else.
pub fn object(value: Value) -> JsonObject {
    match value {
        Value::Object(object) => object,
        _ => JsonObject::default(),
    }
}

/// The `"jsonrpc": "2.0"` marker field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonRpcVersion2_0;

impl Serialize for JsonRpcVersion2_0 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion2_0 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version: String = Deserialize::deserialize(deserializer)?;
        if version == "2.0" {
            Ok(Self)
        } else {
            Err(serde::de::Error::custom(format!(
                "expect json-rpc version 2.0, got {version}"
            )))
        }
    }
}

/// A request id, which the protocol allows to be numeric or textual.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(i64),
    String(Arc<str>),
}

impl fmt::Display for NumberOrString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumberOrString::Number(n) => n.fmt(f),
            NumberOrString::String(s) => s.fmt(f),
        }
    }
}

impl From<i64> for NumberOrString {
    fn from(value: i64) -> Self {
        NumberOrString::Number(value)
    }
}

impl From<String> for NumberOrString {
    fn from(value: String) -> Self {
        NumberOrString::String(value.into())
    }
}

pub type RequestId = NumberOrString;
pub type ProgressToken = NumberOrString;

macro_rules! const_string {
    ($name:ident = $value:literal) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl $name {
            pub const VALUE: &'static str = $value;
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str($value)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let method: String = Deserialize::deserialize(deserializer)?;
                if method == $value {
                    Ok(Self)
                } else {
                    Err(serde::de::Error::custom(format!(
                        concat!("expect method ", $value, ", got {}"),
                        method
                    )))
                }
            }
        }
    };
}

const_string!(InitializeRequestMethod = "initialize");
const_string!(PingRequestMethod = "ping");
const_string!(ListToolsRequestMethod = "tools/list");
const_string!(CallToolRequestMethod = "tools/call");
const_string!(InitializedNotificationMethod = "notifications/initialized");
const_string!(ProgressNotificationMethod = "notifications/progress");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request<M = String, P = JsonObject> {
    pub method: M,
    pub params: P,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOptionalParam<M = String, P = JsonObject> {
    pub method: M,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<P>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestNoParam<M = String> {
    pub method: M,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification<M = String, P = JsonObject> {
    pub method: M,
    pub params: P,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationNoParam<M = String> {
    pub method: M,
}

/// A protocol revision identifier, ordered by date.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(Cow<'static, str>);

impl ProtocolVersion {
    pub const V_2024_11_05: Self = Self(Cow::Borrowed("2024-11-05"));
    pub const V_2025_03_26: Self = Self(Cow::Borrowed("2025-03-26"));
    pub const V_2025_06_18: Self = Self(Cow::Borrowed("2025-06-18"));
    pub const LATEST: Self = Self::V_2025_06_18;

    pub fn is_supported(&self) -> bool {
        [Self::V_2024_11_05, Self::V_2025_03_26, Self::V_2025_06_18].contains(self)
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::LATEST
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Name and version of one side of the connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Implementation {
    pub fn from_build_env() -> Self {
        Implementation {
            name: env!("CARGO_CRATE_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            title: None,
        }
    }
}

/// Capabilities advertised by the client. Unknown capability keys are
/// accepted and ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<JsonObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestParam {
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    pub client_info: Implementation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: ProtocolVersion,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedRequestParam {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolRequestParam {
    pub name: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<JsonObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotificationParam {
    /// Identifies the request this progress belongs to.
    pub progress_token: ProgressToken,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyResult {}

pub type InitializeRequest = Request<InitializeRequestMethod, InitializeRequestParam>;
pub type PingRequest = RequestNoParam<PingRequestMethod>;
pub type ListToolsRequest = RequestOptionalParam<ListToolsRequestMethod, PaginatedRequestParam>;
pub type CallToolRequest = Request<CallToolRequestMethod, CallToolRequestParam>;
pub type InitializedNotification = NotificationNoParam<InitializedNotificationMethod>;
pub type ProgressNotification = Notification<ProgressNotificationMethod, ProgressNotificationParam>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientRequest {
    InitializeRequest(InitializeRequest),
    PingRequest(PingRequest),
    ListToolsRequest(ListToolsRequest),
    CallToolRequest(CallToolRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientNotification {
    InitializedNotification(InitializedNotification),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerNotification {
    ProgressNotification(ProgressNotification),
}

/// `EmptyResult` matches any object, so it must stay the last variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerResult {
    InitializeResult(InitializeResult),
    ListToolsResult(ListToolsResult),
    CallToolResult(CallToolResult),
    EmptyResult(EmptyResult),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest<R = ClientRequest> {
    pub jsonrpc: JsonRpcVersion2_0,
    pub id: RequestId,
    #[serde(flatten)]
    pub request: R,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse<R = ServerResult> {
    pub jsonrpc: JsonRpcVersion2_0,
    pub id: RequestId,
    pub result: R,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub jsonrpc: JsonRpcVersion2_0,
    pub id: RequestId,
    pub error: ErrorData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification<N> {
    pub jsonrpc: JsonRpcVersion2_0,
    #[serde(flatten)]
    pub notification: N,
}

/// Anything a client may post to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientJsonRpcMessage {
    Request(JsonRpcRequest<ClientRequest>),
    Notification(JsonRpcNotification<ClientNotification>),
}

/// Anything the server writes back, over the unary response or the
/// live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerJsonRpcMessage {
    Response(JsonRpcResponse<ServerResult>),
    Error(JsonRpcError),
    Notification(JsonRpcNotification<ServerNotification>),
}

impl ServerJsonRpcMessage {
    pub fn response(id: RequestId, result: ServerResult) -> Self {
        ServerJsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc: JsonRpcVersion2_0,
            id,
            result,
        })
    }

    pub fn error(id: RequestId, error: ErrorData) -> Self {
        ServerJsonRpcMessage::Error(JsonRpcError {
            jsonrpc: JsonRpcVersion2_0,
            id,
            error,
        })
    }

    pub fn notification(notification: ServerNotification) -> Self {
        ServerJsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JsonRpcVersion2_0,
            notification,
        })
    }
}

/// Standard JSON-RPC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const PARSE_ERROR: Self = Self(-32700);
    pub const INVALID_REQUEST: Self = Self(-32600);
    pub const METHOD_NOT_FOUND: Self = Self(-32601);
    pub const INVALID_PARAMS: Self = Self(-32602);
    pub const INTERNAL_ERROR: Self = Self(-32603);
}

/// Error information for JSON-RPC error responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    pub code: ErrorCode,
    pub message: Cow<'static, str>,
    /// Additional information about the error. The protocol leaves the
    /// shape of this value to the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorData {
    pub fn new(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        data: Option<Value>,
    ) -> Self {
        ErrorData {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn parse_error(message: impl Into<Cow<'static, str>>, data: Option<Value>) -> Self {
        Self::new(ErrorCode::PARSE_ERROR, message, data)
    }

    pub fn invalid_request(message: impl Into<Cow<'static, str>>, data: Option<Value>) -> Self {
        Self::new(ErrorCode::INVALID_REQUEST, message, data)
    }

    pub fn method_not_found(message: impl Into<Cow<'static, str>>, data: Option<Value>) -> Self {
        Self::new(ErrorCode::METHOD_NOT_FOUND, message, data)
    }

    pub fn invalid_params(message: impl Into<Cow<'static, str>>, data: Option<Value>) -> Self {
        Self::new(ErrorCode::INVALID_PARAMS, message, data)
    }

    pub fn internal_error(message: impl Into<Cow<'static, str>>, data: Option<Value>) -> Self {
        Self::new(ErrorCode::INTERNAL_ERROR, message, data)
    }
}
