mod common;

use anyhow::Result;
use common::*;
use mcp_relay::ToolRegistry;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

fn echo_tools() -> ToolRegistry {
    ToolRegistry::new().with_route(echo_route())
}

#[tokio::test]
async fn test_initialize_creates_session() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let response = client
        .post(&url)
        .header("Accept", "application/json")
        .json(&initialize_body(1))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(SESSION_HEADER));

    let body: Value = response.json().await?;
    assert_eq!(body["jsonrpc"], json!("2.0"));
    assert_eq!(body["id"], json!(1));
    assert_eq!(body["result"]["protocolVersion"], json!("2025-03-26"));
    assert_eq!(body["result"]["serverInfo"]["name"], json!("mcp-relay-test"));
    assert_eq!(body["result"]["instructions"], json!("call the echo tool"));
    assert!(body["result"]["capabilities"]["tools"].is_object());

    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_two_initializations_get_distinct_sessions() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let first = initialize_session(&client, &url).await?;
    let second = initialize_session(&client, &url).await?;
    assert_ne!(first, second);

    // both sessions stay usable independently
    for session_id in [&first, &second] {
        let response = post_message(
            &client,
            &url,
            Some(session_id),
            &json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}),
        )
        .await?;
        assert_eq!(response.status(), StatusCode::OK);
    }
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_post_without_json_accept_is_rejected() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let response = client
        .post(&url)
        .header("Accept", "text/html")
        .json(&initialize_body(1))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_post_with_wrong_content_type_is_rejected() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let response = client
        .post(&url)
        .header("Accept", "application/json")
        .header("Content-Type", "text/plain")
        .body(initialize_body(1).to_string())
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_post_with_invalid_json_is_bad_request() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let response = client
        .post(&url)
        .header("Accept", "application/json")
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await?;
    assert_eq!(body["code"], json!(-32700));
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_post_without_session_must_initialize() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let response = post_message(
        &client,
        &url,
        None,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json().await?;
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("expected initialize request")
    );
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_post_for_unknown_session_is_not_found() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let response = post_message(
        &client,
        &url,
        Some("cafebabe-0000-0000-0000-000000000000"),
        &json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await?;
    assert!(body["message"].as_str().unwrap().contains("session not found"));
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_echo_tool_round_trip() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let session_id = initialize_session(&client, &url).await?;
    let response = post_message(
        &client,
        &url,
        Some(&session_id),
        &json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {"message": "hello relay"}}
        }),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["result"]["isError"], json!(false));
    assert_eq!(body["result"]["content"][0]["type"], json!("text"));
    assert_eq!(body["result"]["content"][0]["text"], json!("hello relay"));
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_unknown_tool_is_a_protocol_error() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let session_id = initialize_session(&client, &url).await?;
    let response = post_message(
        &client,
        &url,
        Some(&session_id),
        &json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"name": "no-such-tool"}
        }),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], json!(-32602));
    assert!(body["error"]["message"].as_str().unwrap().contains("tool not found"));
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_invalid_arguments_yield_error_result() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let session_id = initialize_session(&client, &url).await?;
    let response = post_message(
        &client,
        &url,
        Some(&session_id),
        &json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {"message": 17}}
        }),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["result"]["isError"], json!(true));
    assert!(
        body["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("invalid arguments")
    );
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_tools_list_exposes_input_schema() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let session_id = initialize_session(&client, &url).await?;
    let response = post_message(
        &client,
        &url,
        Some(&session_id),
        &json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    let tools = body["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], json!("echo"));
    assert!(tools[0]["inputSchema"]["properties"]["message"].is_object());
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_ping_returns_empty_result() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let session_id = initialize_session(&client, &url).await?;
    let response = post_message(
        &client,
        &url,
        Some(&session_id),
        &json!({"jsonrpc": "2.0", "id": 5, "method": "ping"}),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["result"], json!({}));
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_initialized_notification_is_accepted() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let session_id = initialize_session(&client, &url).await?;
    let response = post_message(
        &client,
        &url,
        Some(&session_id),
        &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_second_initialize_on_same_session_is_rejected() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let session_id = initialize_session(&client, &url).await?;
    let response = post_message(&client, &url, Some(&session_id), &initialize_body(9)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("already initialized")
    );
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_delete_terminates_the_session() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let session_id = initialize_session(&client, &url).await?;

    let response = client
        .delete(&url)
        .header(SESSION_HEADER, &session_id)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // the id is gone: further traffic is a protocol error
    let response = post_message(
        &client,
        &url,
        Some(&session_id),
        &json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .delete(&url)
        .header(SESSION_HEADER, &session_id)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_delete_unknown_session_leaves_server_healthy() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let response = client
        .delete(&url)
        .header(SESSION_HEADER, "cafebabe-0000-0000-0000-000000000000")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // unrelated sessions are unaffected
    let session_id = initialize_session(&client, &url).await?;
    let response = post_message(
        &client,
        &url,
        Some(&session_id),
        &json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_delete_without_session_header_is_bad_request() -> Result<()> {
    let (server, url) = start_server(echo_tools()).await?;
    let client = Client::new();
    let response = client.delete(&url).send().await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    server.cancel();
    Ok(())
}
