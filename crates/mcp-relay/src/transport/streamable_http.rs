//! HTTP surface: one path, three verbs.
//!
//! `POST` carries unary JSON-RPC exchanges, `GET` attaches the
//! session's live SSE stream, `DELETE` terminates the session. The
//! session id travels in the `mcp-session-id` header; stream resumption
//! uses the standard `Last-Event-ID` mechanism with event log sequence
//! ids as SSE event ids.
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{
    EVENT_STREAM_MIME_TYPE, HEADER_LAST_EVENT_ID, HEADER_SESSION_ID, JSON_MIME_TYPE, SessionId,
    event_log::LogEntry,
    session_registry::SessionRegistry,
};
use crate::{
    model::{ClientJsonRpcMessage, ClientRequest, ErrorData, Implementation},
    registry::ToolRegistry,
};

#[derive(Debug, Clone)]
pub struct StreamableHttpConfig {
    pub bind: SocketAddr,
    pub path: String,
    pub ct: CancellationToken,
    /// Interval of SSE keep-alive comments, `None` to disable them.
    pub sse_keep_alive: Option<Duration>,
    /// How long a session without a live connection survives after its
    /// connection dropped. `None` keeps such sessions alive until they
    /// are deleted explicitly.
    pub reconnect_grace: Option<Duration>,
    pub server_info: Implementation,
    pub instructions: Option<String>,
}

impl Default for StreamableHttpConfig {
    fn default() -> Self {
        StreamableHttpConfig {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            path: "/mcp".to_string(),
            ct: CancellationToken::new(),
            sse_keep_alive: Some(Duration::from_secs(15)),
            reconnect_grace: Some(Duration::from_secs(60)),
            server_info: Implementation::from_build_env(),
            instructions: None,
        }
    }
}

#[derive(Clone)]
struct App {
    registry: Arc<SessionRegistry>,
    tools: Arc<ToolRegistry>,
    config: Arc<StreamableHttpConfig>,
}

/// A running (or buildable) streamable HTTP server.
pub struct StreamableHttpServer {
    pub config: StreamableHttpConfig,
    registry: Arc<SessionRegistry>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl StreamableHttpServer {
    /// Bind and serve with default configuration.
    pub async fn serve(tools: ToolRegistry, bind: SocketAddr) -> io::Result<StreamableHttpServer> {
        Self::serve_with_config(
            tools,
            StreamableHttpConfig {
                bind,
                ..Default::default()
            },
        )
        .await
    }

    /// Bind the configured address and spawn the accept loop.
    ///
    /// `config.bind` is updated with the actual local address, so
    /// binding port 0 yields a usable address afterwards. Cancelling the
    /// token shuts the server down and closes every session.
    pub async fn serve_with_config(
        tools: ToolRegistry,
        mut config: StreamableHttpConfig,
    ) -> io::Result<StreamableHttpServer> {
        let listener = tokio::net::TcpListener::bind(config.bind).await?;
        config.bind = listener.local_addr()?;
        let bind = config.bind;
        let (mut server, router) = Self::new(tools, config);
        let ct = server.config.ct.child_token();
        let registry = server.registry.clone();
        let service = axum::serve(listener, router).with_graceful_shutdown(async move {
            ct.cancelled().await;
            registry.close_all().await;
            tracing::info!("streamable http server cancelled");
        });
        server.server_handle = Some(tokio::spawn(
            async move {
                if let Err(e) = service.await {
                    tracing::error!(error = %e, "streamable http server shutdown with error");
                }
            }
            .instrument(tracing::info_span!("streamable-http-server", bind_address = %bind)),
        ));
        Ok(server)
    }

    /// Assemble the router without binding anything, for callers that
    /// mount the transport into their own server.
    pub fn new(tools: ToolRegistry, config: StreamableHttpConfig) -> (StreamableHttpServer, Router) {
        let registry = Arc::new(SessionRegistry::new());
        let app = App {
            registry: registry.clone(),
            tools: Arc::new(tools),
            config: Arc::new(config.clone()),
        };
        let router = Router::new()
            .route(
                &config.path,
                get(handle_get).post(handle_post).delete(handle_delete),
            )
            .with_state(app);
        (
            StreamableHttpServer {
                config,
                registry,
                server_handle: None,
            },
            router,
        )
    }

    pub fn cancel(&self) {
        self.config.ct.cancel();
    }

    /// Cancel and wait until every session is closed and in-flight
    /// connections have drained.
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
    }
}

async fn handle_post(State(app): State<App>, headers: HeaderMap, body: Bytes) -> Response {
    if !accept_contains(&headers, JSON_MIME_TYPE) {
        return error_response(
            StatusCode::NOT_ACCEPTABLE,
            ErrorData::invalid_request("client must accept application/json", None),
        );
    }
    if !content_type_is_json(&headers) {
        return error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorData::invalid_request("content type must be application/json", None),
        );
    }
    let message: ClientJsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorData::parse_error(format!("invalid json-rpc message: {e}"), None),
            );
        }
    };
    match header_str(&headers, HEADER_SESSION_ID) {
        Some(session_id) => {
            let Some(transport) = app.registry.lookup(session_id).await else {
                tracing::warn!(session_id, "post for unknown session");
                return session_not_found();
            };
            match message {
                ClientJsonRpcMessage::Request(request) => {
                    match transport.handle_unary(request).await {
                        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
                        Err(_) => session_not_found(),
                    }
                }
                ClientJsonRpcMessage::Notification(notification) => {
                    match transport.accept_notification(notification).await {
                        Ok(()) => StatusCode::ACCEPTED.into_response(),
                        Err(_) => session_not_found(),
                    }
                }
            }
        }
        None => {
            let ClientJsonRpcMessage::Request(request) = message else {
                return error_response(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorData::invalid_request("expected initialize request", None),
                );
            };
            if !matches!(request.request, ClientRequest::InitializeRequest(_)) {
                return error_response(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorData::invalid_request("expected initialize request", None),
                );
            }
            let (session_id, transport) = app
                .registry
                .create(
                    app.tools.clone(),
                    app.config.server_info.clone(),
                    app.config.instructions.clone(),
                )
                .await;
            match transport.handle_unary(request).await {
                Ok(response) => {
                    let mut response = (StatusCode::OK, Json(response)).into_response();
                    if let Ok(value) = HeaderValue::from_str(&session_id) {
                        response.headers_mut().insert(HEADER_SESSION_ID, value);
                    }
                    response
                }
                Err(e) => {
                    app.registry.remove(&session_id).await;
                    tracing::error!(session_id = %session_id, error = %e, "failed to initialize session");
                    error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorData::internal_error("failed to initialize session", None),
                    )
                }
            }
        }
    }
}

async fn handle_get(State(app): State<App>, headers: HeaderMap) -> Response {
    if !accept_contains(&headers, EVENT_STREAM_MIME_TYPE) {
        return error_response(
            StatusCode::NOT_ACCEPTABLE,
            ErrorData::invalid_request("client must accept text/event-stream", None),
        );
    }
    let Some(session_id) = header_str(&headers, HEADER_SESSION_ID) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorData::invalid_request("missing mcp-session-id header", None),
        );
    };
    let last_seen = match header_str(&headers, HEADER_LAST_EVENT_ID) {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(sequence_id) => Some(sequence_id),
            Err(_) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    ErrorData::invalid_request("invalid last-event-id header", None),
                );
            }
        },
        None => None,
    };
    let Some(transport) = app.registry.lookup(session_id).await else {
        return session_not_found();
    };
    let attachment = match transport.attach_stream(last_seen).await {
        Ok(attachment) => attachment,
        Err(_) => return session_not_found(),
    };
    tracing::debug!(session_id, ?last_seen, epoch = attachment.epoch, "live stream attached");
    let guard = DisconnectGuard {
        registry: app.registry.clone(),
        session_id: transport.session_id().clone(),
        epoch: attachment.epoch,
        grace: app.config.reconnect_grace,
    };
    let entries =
        futures::stream::iter(attachment.replay).chain(ReceiverStream::new(attachment.live));
    let stream = LiveStream {
        inner: Box::pin(entries),
        _cleanup: guard,
    };
    let sse = Sse::new(stream);
    match app.config.sse_keep_alive {
        Some(interval) => sse.keep_alive(KeepAlive::new().interval(interval)).into_response(),
        None => sse.into_response(),
    }
}

async fn handle_delete(State(app): State<App>, headers: HeaderMap) -> Response {
    let Some(session_id) = header_str(&headers, HEADER_SESSION_ID) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorData::invalid_request("missing mcp-session-id header", None),
        );
    };
    match app.registry.close(session_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(_) => {
            tracing::warn!(session_id, "delete for unknown session");
            session_not_found()
        }
    }
}

/// SSE stream for one attached connection. Dropping it, which is how
/// the HTTP layer reacts to the client going away, arms the disconnect
/// watcher.
struct LiveStream {
    inner: Pin<Box<dyn Stream<Item = LogEntry> + Send>>,
    _cleanup: DisconnectGuard,
}

impl Stream for LiveStream {
    type Item = Result<Event, axum::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.inner.as_mut().poll_next(cx).map(|next| {
            next.map(|entry| Event::default().id(entry.sequence_id.to_string()).json_data(&entry.message))
        })
    }
}

struct DisconnectGuard {
    registry: Arc<SessionRegistry>,
    session_id: SessionId,
    epoch: u64,
    grace: Option<Duration>,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let Some(grace) = self.grace else {
            return;
        };
        let registry = self.registry.clone();
        let session_id = self.session_id.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.close_if_detached(&session_id, epoch).await;
        });
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn accept_contains(headers: &HeaderMap, mime: &str) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains(mime))
}

fn content_type_is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.starts_with(JSON_MIME_TYPE))
}

fn error_response(status: StatusCode, error: ErrorData) -> Response {
    (status, Json(error)).into_response()
}

fn session_not_found() -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        ErrorData::invalid_request("session not found", None),
    )
}
