#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use anyhow::{Context as _, Result, bail, ensure};
use mcp_relay::{
    CallToolResult, Content, Notifier, StreamableHttpConfig, StreamableHttpServer, ToolRegistry,
    ToolRoute,
    model::Implementation,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoParams {
    /// Text to echo back.
    pub message: String,
}

pub fn echo_route() -> ToolRoute {
    ToolRoute::new(
        "echo",
        "Echo a message back",
        |params: EchoParams, _notifier: Notifier| async move {
            Ok(CallToolResult::success(vec![Content::text(params.message)]))
        },
    )
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StagedParams {}

/// Emits one progress notification, parks until the test releases the
/// gate, emits a second, then finishes.
pub fn staged_route(gate: Arc<Notify>) -> ToolRoute {
    ToolRoute::new(
        "staged",
        "Emit progress in two stages",
        move |_params: StagedParams, notifier: Notifier| {
            let gate = gate.clone();
            async move {
                notifier
                    .progress(1.0, Some(2.0), Some("stage one".to_owned()))
                    .await;
                gate.notified().await;
                notifier
                    .progress(2.0, Some(2.0), Some("stage two".to_owned()))
                    .await;
                Ok(CallToolResult::success(vec![Content::text("staged done")]))
            }
        },
    )
}

pub fn test_config() -> StreamableHttpConfig {
    StreamableHttpConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        server_info: Implementation {
            name: "mcp-relay-test".to_owned(),
            version: "0.0.1".to_owned(),
            title: None,
        },
        instructions: Some("call the echo tool".to_owned()),
        ..Default::default()
    }
}

pub async fn start_server(tools: ToolRegistry) -> Result<(StreamableHttpServer, String)> {
    start_server_with_config(tools, test_config()).await
}

pub async fn start_server_with_config(
    tools: ToolRegistry,
    config: StreamableHttpConfig,
) -> Result<(StreamableHttpServer, String)> {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
    let server = StreamableHttpServer::serve_with_config(tools, config).await?;
    let url = format!("http://{}/mcp", server.config.bind);
    Ok((server, url))
}

pub fn initialize_body(id: i64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "1.0.0"}
        }
    })
}

/// Run the initialize handshake and return the session id from the
/// response header.
pub async fn initialize_session(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .post(url)
        .header("Accept", "application/json")
        .json(&initialize_body(1))
        .send()
        .await?;
    ensure!(
        response.status() == reqwest::StatusCode::OK,
        "initialize failed with status {}",
        response.status()
    );
    let session_id = response
        .headers()
        .get(SESSION_HEADER)
        .context("missing session id header")?
        .to_str()?
        .to_owned();
    Ok(session_id)
}

/// POST one message, optionally on an existing session.
pub async fn post_message(
    client: &reqwest::Client,
    url: &str,
    session_id: Option<&str>,
    body: &Value,
) -> Result<reqwest::Response> {
    let mut request = client.post(url).header("Accept", "application/json");
    if let Some(session_id) = session_id {
        request = request.header(SESSION_HEADER, session_id);
    }
    Ok(request.json(body).send().await?)
}

/// GET the session's live stream, optionally resuming.
pub async fn open_stream(
    client: &reqwest::Client,
    url: &str,
    session_id: &str,
    last_event_id: Option<u64>,
) -> Result<reqwest::Response> {
    let mut request = client
        .get(url)
        .header("Accept", "text/event-stream")
        .header(SESSION_HEADER, session_id);
    if let Some(last_event_id) = last_event_id {
        request = request.header("Last-Event-ID", last_event_id.to_string());
    }
    let response = request.send().await?;
    ensure!(
        response.status() == reqwest::StatusCode::OK,
        "stream attach failed with status {}",
        response.status()
    );
    Ok(response)
}

#[derive(Debug)]
pub struct SseFrame {
    pub id: Option<u64>,
    pub data: Value,
}

/// Read `count` data-carrying SSE frames, skipping keep-alive comments.
pub async fn read_frames(
    response: &mut reqwest::Response,
    count: usize,
    timeout: Duration,
) -> Result<Vec<SseFrame>> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut frames = Vec::new();
    let mut buffer = String::new();
    while frames.len() < count {
        let chunk = tokio::time::timeout_at(deadline, response.chunk())
            .await
            .context("timed out waiting for sse frames")??;
        let Some(chunk) = chunk else {
            bail!("stream ended after {} of {count} frames", frames.len());
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(end) = buffer.find("\n\n") {
            let raw: String = buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_frame(&raw)? {
                frames.push(frame);
            }
        }
    }
    Ok(frames)
}

fn parse_frame(raw: &str) -> Result<Option<SseFrame>> {
    let mut id = None;
    let mut data = String::new();
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("id:") {
            id = Some(rest.trim().parse()?);
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data.is_empty() {
        return Ok(None);
    }
    Ok(Some(SseFrame {
        id,
        data: serde_json::from_str(&data)?,
    }))
}

/// Wait for the server to end the stream, ignoring anything still
/// buffered on it.
pub async fn expect_stream_end(mut response: reqwest::Response, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let chunk = tokio::time::timeout_at(deadline, response.chunk())
            .await
            .context("timed out waiting for stream end")??;
        if chunk.is_none() {
            return Ok(());
        }
    }
}
