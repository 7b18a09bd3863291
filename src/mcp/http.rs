// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP transport: one POST per JSON-RPC request.
//!
//! Replies are either a single JSON body or a `text/event-stream` whose
//! `data:` lines carry JSON-RPC messages; for streams the last chunk with a
//! `result` wins. A `Mcp-Session-Id` header handed out by the server is echoed
//! on every later request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tokio::sync::RwLock;

#[cfg(feature = "telemetry")]
use std::time::Instant;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::client::{discover, handshake, ClientCore, Rpc, ToolClient};
use super::codec::{
    decode_message, encode_notification, encode_request, JsonRpcError, LineBuffer, Message,
    RequestIds,
};
use super::config::{HttpTarget, ServerConfig, Transport};
use super::error::{McpError, McpResult};
use super::events::{EventBus, HostEvent};
use super::types::{tool_content, ConnectionState, PromptDescriptor, ResourceDescriptor, ToolDescriptor};

/// Session header name.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Outcome of one POSTed request.
#[derive(Debug, Clone)]
pub(crate) struct RpcReply {
    pub result: Value,
    pub session_id: Option<String>,
}

/// POST one request and decode the reply, bounded by `deadline`.
pub(crate) async fn post_rpc(
    http: &reqwest::Client,
    url: &str,
    session_id: Option<&str>,
    id: u64,
    method: &str,
    params: Option<Value>,
    deadline: Duration,
) -> McpResult<RpcReply> {
    let body = encode_request(id, method, params)?;
    let exchange = async {
        let response = build_post(http, url, session_id, body).send().await?;
        let session_id = session_from(&response);
        let response = ensure_success(response).await?;

        let streamed = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let result = if streamed {
            read_event_stream(response).await?
        } else {
            let bytes = response.bytes().await?;
            match decode_message(&bytes)? {
                Message::Response(reply) => reply.into_result()?,
                _ => return Err(McpError::Decode("expected a JSON-RPC response".to_string())),
            }
        };

        Ok(RpcReply { result, session_id })
    };

    tokio::time::timeout(deadline, exchange)
        .await
        .map_err(|_| McpError::timeout(method))?
}

/// POST one notification; returns any session id the server handed out.
pub(crate) async fn post_notification(
    http: &reqwest::Client,
    url: &str,
    session_id: Option<&str>,
    method: &str,
    params: Option<Value>,
    deadline: Duration,
) -> McpResult<Option<String>> {
    let body = encode_notification(method, params)?;
    let exchange = async {
        let response = build_post(http, url, session_id, body).send().await?;
        let session_id = session_from(&response);
        ensure_success(response).await?;
        Ok::<_, McpError>(session_id)
    };

    tokio::time::timeout(deadline, exchange)
        .await
        .map_err(|_| McpError::timeout(method))?
}

fn build_post(
    http: &reqwest::Client,
    url: &str,
    session_id: Option<&str>,
    body: Vec<u8>,
) -> reqwest::RequestBuilder {
    let mut request = http
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, ACCEPT_BOTH)
        .body(body);
    if let Some(session) = session_id {
        request = request.header(SESSION_HEADER, session);
    }
    request
}

fn session_from(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Non-2xx replies become errors carrying the body as their message.
async fn ensure_success(response: reqwest::Response) -> McpResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body = if body.trim().is_empty() {
        format!("HTTP {}", status)
    } else {
        body
    };
    Err(McpError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}

async fn read_event_stream(response: reqwest::Response) -> McpResult<Value> {
    let mut collector = SseCollector::default();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        collector.push(&chunk?);
    }
    collector.finish()
}

/// Incremental decoder for a `text/event-stream` reply.
#[derive(Debug, Default)]
pub(crate) struct SseCollector {
    lines: LineBuffer,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

impl SseCollector {
    pub fn push(&mut self, chunk: &[u8]) {
        for line in self.lines.push(chunk) {
            self.accept(&line);
        }
    }

    fn accept(&mut self, line: &[u8]) {
        let Some(data) = line.strip_prefix(b"data:") else {
            return;
        };
        let data = data.trim_ascii();
        if data.is_empty() {
            return;
        }

        match serde_json::from_slice::<Value>(data) {
            Ok(mut message) => {
                if let Some(result) = message.get_mut("result") {
                    self.result = Some(result.take());
                } else if let Some(error) = message.get("error") {
                    match serde_json::from_value::<JsonRpcError>(error.clone()) {
                        Ok(error) => self.error = Some(error),
                        Err(e) => tracing::debug!(error = %e, "malformed error chunk in stream"),
                    }
                }
            }
            Err(e) => tracing::debug!(error = %e, "skipping non-JSON stream data"),
        }
    }

    /// Flush the trailing line and pick the outcome.
    pub fn finish(mut self) -> McpResult<Value> {
        let rest = self.lines.pending().to_vec();
        self.accept(&rest);

        match (self.result, self.error) {
            (Some(result), _) => Ok(result),
            (None, Some(error)) => Err(McpError::protocol(error.code, error.message)),
            (None, None) => Err(McpError::NoStreamResult),
        }
    }
}

/// Client for a server reached over HTTP.
pub struct HttpToolClient {
    config: ServerConfig,
    core: ClientCore,
    http: reqwest::Client,
    ids: RequestIds,
    session_id: RwLock<Option<String>>,
    attached: AtomicBool,
}

impl HttpToolClient {
    pub fn new(config: ServerConfig, events: EventBus<HostEvent>) -> Self {
        Self {
            core: ClientCore::new(config.id.clone(), events),
            config,
            http: reqwest::Client::new(),
            ids: RequestIds::new(),
            session_id: RwLock::new(None),
            attached: AtomicBool::new(false),
        }
    }

    /// Session id handed out by the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    fn target(&self) -> McpResult<&HttpTarget> {
        match &self.config.transport {
            Transport::Http { target } => Ok(target),
            Transport::Stdio { .. } => Err(McpError::Config(format!(
                "server '{}' is not an http server",
                self.config.id
            ))),
        }
    }

    /// Any HTTP answer below 500 counts as alive.
    async fn check_liveness(&self, url: &str) -> McpResult<()> {
        let response = tokio::time::timeout(self.config.request_timeout(), self.http.get(url).send())
            .await
            .map_err(|_| McpError::timeout(format!("GET {}", url)))?
            .map_err(|e| McpError::Transport(format!("{} unreachable: {}", url, e)))?;

        if response.status().is_server_error() {
            ensure_success(response).await?;
        }
        Ok(())
    }

    async fn establish(&self) -> McpResult<()> {
        let target = self.target()?;
        self.check_liveness(&target.liveness_url()).await?;
        self.attached.store(true, Ordering::SeqCst);

        let init = handshake(self, &self.config.id).await?;
        self.core.set_server_info(init).await;
        self.core.set_state(ConnectionState::Connected).await;

        discover(self, &self.core).await;
        Ok(())
    }

    async fn remember_session(&self, session_id: Option<String>) {
        if let Some(session) = session_id {
            let mut current = self.session_id.write().await;
            if current.as_deref() != Some(session.as_str()) {
                tracing::debug!(server_id = %self.config.id, session = %session, "session established");
                *current = Some(session);
            }
        }
    }

    fn ensure_attached(&self) -> McpResult<()> {
        if self.attached.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(McpError::NotConnected(self.config.id.clone()))
        }
    }
}

#[async_trait]
impl Rpc for HttpToolClient {
    async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        self.ensure_attached()?;
        let url = self.target()?.rpc_url();
        let session = self.session_id().await;

        let reply = post_rpc(
            &self.http,
            &url,
            session.as_deref(),
            self.ids.next(),
            method,
            params,
            self.config.request_timeout(),
        )
        .await?;

        self.remember_session(reply.session_id).await;
        Ok(reply.result)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.ensure_attached()?;
        let url = self.target()?.rpc_url();
        let session = self.session_id().await;

        let handed_out = post_notification(
            &self.http,
            &url,
            session.as_deref(),
            method,
            params,
            self.config.request_timeout(),
        )
        .await?;

        self.remember_session(handed_out).await;
        Ok(())
    }
}

#[async_trait]
impl ToolClient for HttpToolClient {
    fn server_id(&self) -> &str {
        &self.config.id
    }

    async fn state(&self) -> ConnectionState {
        self.core.state().await
    }

    async fn connect(&self) -> McpResult<()> {
        if self.core.state().await == ConnectionState::Connected {
            return Ok(());
        }

        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.core.set_state(ConnectionState::Connecting).await;
        let result = self.establish().await;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("mcp.connect", start.elapsed());

        if let Err(e) = &result {
            self.attached.store(false, Ordering::SeqCst);
            *self.session_id.write().await = None;
            self.core.fail(e.to_string()).await;
        }
        result
    }

    async fn disconnect(&self) {
        if !self.attached.swap(false, Ordering::SeqCst) {
            self.core.settle_disconnected().await;
            return;
        }

        let session = self.session_id.write().await.take();
        if let (Some(session), Ok(target)) = (session, self.target()) {
            let deleted = self
                .http
                .delete(target.rpc_url())
                .header(SESSION_HEADER, &session)
                .timeout(self.config.request_timeout())
                .send()
                .await;
            match deleted {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(server_id = %self.config.id, status = %response.status(), "session delete rejected");
                }
                Err(e) => {
                    tracing::warn!(server_id = %self.config.id, error = %e, "session delete failed");
                }
                Ok(_) => {}
            }
        }

        self.core.clear_catalog().await;
        self.core.set_state(ConnectionState::Disconnected).await;
        tracing::info!(server_id = %self.config.id, "disconnected");
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Value> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let result = self
            .request(
                "tools/call",
                Some(serde_json::json!({ "name": name, "arguments": arguments })),
            )
            .await;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_tool(
            &format!("{}.{}", self.config.id, name),
            start.elapsed(),
            result.is_ok(),
        );

        result.map(tool_content)
    }

    async fn tools(&self) -> Vec<ToolDescriptor> {
        self.core.tools().await
    }

    async fn resources(&self) -> Vec<ResourceDescriptor> {
        self.core.resources().await
    }

    async fn prompts(&self) -> Vec<PromptDescriptor> {
        self.core.prompts().await
    }

    async fn refresh_capabilities(&self) -> McpResult<()> {
        self.ensure_attached()?;
        discover(self, &self.core).await;
        Ok(())
    }

    async fn read_resource(&self, uri: &str) -> McpResult<Value> {
        self.request("resources/read", Some(serde_json::json!({ "uri": uri })))
            .await
    }

    async fn get_prompt(&self, name: &str, arguments: Value) -> McpResult<Value> {
        self.request(
            "prompts/get",
            Some(serde_json::json!({ "name": name, "arguments": arguments })),
        )
        .await
    }
}
