// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end tests for the connection manager against real transports.
//!
//! The stdio server is a small `sh` loop; the HTTP server is an axum router.

#![cfg(unix)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::future::join_all;
use serde_json::{json, Value};

use toolhost::config::load_config_file;
use toolhost::mcp::{ConnectionState, HostEvent, McpError, ServerConfig, ToolConnectionManager};

// ============================================================================
// Stub servers
// ============================================================================

/// Answers initialize, tools/list and tools/call; other lists are unsupported.
const STDIO_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"stub","version":"1.0"},"capabilities":{"tools":{}}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo text","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id" ;;
    *'"method":"resources/list"'*|*'"method":"prompts/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"Method not found"}}\n' "$id" ;;
  esac
done
"#;

fn stdio_server(id: &str) -> ServerConfig {
    ServerConfig::stdio(id, "sh")
        .with_args(["-c", STDIO_SERVER])
        .with_request_timeout(Duration::from_secs(5))
}

async fn http_server() -> u16 {
    async fn rpc(headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
        let Some(id) = body.get("id").cloned() else {
            return StatusCode::ACCEPTED.into_response();
        };
        let result = match body["method"].as_str() {
            Some("initialize") => json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "weather", "version": "0.3.0"},
                "capabilities": {"tools": {}}
            }),
            Some("tools/list") => json!({
                "tools": [{"name": "forecast", "description": "Weather forecast"}]
            }),
            Some("tools/call") => json!({
                "content": [{"type": "text", "text": body["params"]["arguments"]["city"]}]
            }),
            Some("resources/list") => json!({"resources": []}),
            Some("prompts/list") => json!({"prompts": []}),
            _ => {
                return Json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": "Method not found"}
                }))
                .into_response()
            }
        };
        let session = headers
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("weather-session")
            .to_string();
        (
            [("Mcp-Session-Id", session)],
            Json(json!({"jsonrpc": "2.0", "id": id, "result": result})),
        )
            .into_response()
    }

    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/mcp", post(rpc).delete(|| async { StatusCode::NO_CONTENT }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

fn record_events(manager: &ToolConnectionManager) -> (Arc<Mutex<Vec<HostEvent>>>, toolhost::mcp::Subscription) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let sub = manager.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    (events, sub)
}

// ============================================================================
// Stdio
// ============================================================================

#[tokio::test]
async fn test_stdio_connect_call_disconnect() {
    let manager = ToolConnectionManager::new();
    let (events, _sub) = record_events(&manager);

    manager.connect(stdio_server("s1")).await.unwrap();

    let tools = manager.list_tools("s1").await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");

    let content = manager.call_tool("s1", "echo", json!({"text": "ping"})).await.unwrap();
    assert_eq!(content, json!([{"type": "text", "text": "pong"}]));

    let states = manager.connection_states().await;
    assert_eq!(states.get("s1"), Some(&ConnectionState::Connected));

    {
        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            HostEvent::StateChanged { state: ConnectionState::Connected, .. }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            HostEvent::ToolsChanged { server_id, tools } if server_id == "s1" && tools.len() == 1
        )));
    }

    manager.disconnect("s1").await;
    assert!(manager.server_ids().await.is_empty());
    assert!(manager.connection_states().await.get("s1").is_none());
    assert!(manager.list_tools("s1").await.is_err());

    let err = manager.call_tool("s1", "echo", json!({})).await.unwrap_err();
    assert_eq!(err, McpError::NotConnected("s1".to_string()));
}

#[tokio::test]
async fn test_stdio_concurrent_calls() {
    let manager = ToolConnectionManager::new();
    manager.connect(stdio_server("s1")).await.unwrap();

    let calls = (0..10).map(|_| manager.call_tool("s1", "echo", json!({})));
    for outcome in join_all(calls).await {
        assert_eq!(outcome.unwrap()[0]["text"], "pong");
    }

    manager.disconnect_all().await;
}

#[tokio::test]
async fn test_concurrent_connects_share_one_client() {
    let manager = ToolConnectionManager::new();

    let (a, b) = tokio::join!(
        manager.connect(stdio_server("s1")),
        manager.connect(stdio_server("s1"))
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(manager.server_ids().await, vec!["s1".to_string()]);
    manager.disconnect_all().await;
}

#[tokio::test]
async fn test_stdio_server_that_exits_immediately() {
    let manager = ToolConnectionManager::new();
    let config = ServerConfig::stdio("gone", "sh")
        .with_args(["-c", "exit 0"])
        .with_request_timeout(Duration::from_secs(5));

    let err = manager.connect(config).await.unwrap_err();
    assert!(matches!(err, McpError::HandshakeFailed { .. }), "{err:?}");
    assert_eq!(
        manager.connection_states().await.get("gone"),
        Some(&ConnectionState::Error)
    );
}

// ============================================================================
// Mixed transports
// ============================================================================

#[tokio::test]
async fn test_tools_across_transports() {
    let port = http_server().await;
    let manager = ToolConnectionManager::new();

    manager.connect(ServerConfig::http_port("weather", port)).await.unwrap();
    manager.connect(stdio_server("files")).await.unwrap();

    let all = manager.get_all_tools().await;
    let names: Vec<(String, String)> = all
        .iter()
        .map(|entry| (entry.server_id.clone(), entry.tool.name.clone()))
        .collect();
    assert_eq!(
        names,
        vec![
            ("files".to_string(), "echo".to_string()),
            ("weather".to_string(), "forecast".to_string())
        ]
    );

    let content = manager
        .call_tool("weather", "forecast", json!({"city": "Lima"}))
        .await
        .unwrap();
    assert_eq!(content[0]["text"], "Lima");

    manager.disconnect_all().await;
    assert!(manager.connection_states().await.is_empty());
}

#[tokio::test]
async fn test_connect_servers_from_config_file() {
    let port = http_server().await;
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join(".toolhost.json");
    std::fs::write(
        &path,
        json!({
            "servers": [
                {"id": "weather", "port": port},
                {"id": "offline", "command": "/nonexistent/server", "enabled": false}
            ]
        })
        .to_string(),
    )
    .unwrap();

    let config = load_config_file(&path).unwrap();
    let manager = ToolConnectionManager::new();
    for server in config.enabled_servers() {
        manager.connect(server.clone()).await.unwrap();
    }

    assert_eq!(manager.server_ids().await, vec!["weather".to_string()]);
    assert_eq!(manager.list_tools("weather").await.unwrap()[0].name, "forecast");
    manager.disconnect_all().await;
}
