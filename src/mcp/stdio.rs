// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Stdio transport: one child process speaking newline-delimited JSON-RPC.
//!
//! A writer task drains an mpsc queue into the child's stdin; a reader task
//! splits stdout into lines and routes responses to the pending request with
//! the matching id. Each request carries its own deadline.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

#[cfg(feature = "telemetry")]
use tracing::instrument;

#[cfg(feature = "telemetry")]
use std::time::Instant;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::client::{discover, handshake, ClientCore, Rpc, ToolClient};
use super::codec::{
    decode_message, encode_notification, encode_request, encode_response, frame_line,
    JsonRpcError, LineBuffer, Message, RequestIds,
};
use super::config::{ServerConfig, Transport};
use super::error::{error_codes, McpError, McpResult};
use super::events::{EventBus, HostEvent};
use super::path::effective_path;
use super::types::{tool_content, ConnectionState, PromptDescriptor, ResourceDescriptor, ToolDescriptor};

/// Outstanding requests keyed by id.
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<McpResult<Value>>>>>;

/// Grace period for the writer to flush `shutdown` before the kill.
const SHUTDOWN_FLUSH: Duration = Duration::from_millis(250);

/// Live transport for one connection.
struct Session {
    tx: mpsc::Sender<Vec<u8>>,
    child: Option<Child>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Client for a server reached over a child process's stdio.
pub struct StdioToolClient {
    config: ServerConfig,
    core: Arc<ClientCore>,
    ids: RequestIds,
    pending: PendingMap,
    session: Mutex<Option<Session>>,
    closing: Arc<AtomicBool>,
    /// Set once the transport is dead (stdout EOF or a failed write).
    closed: Arc<AtomicBool>,
}

impl StdioToolClient {
    /// Create a client. Nothing is spawned until [`ToolClient::connect`].
    pub fn new(config: ServerConfig, events: EventBus<HostEvent>) -> Self {
        Self {
            core: Arc::new(ClientCore::new(config.id.clone(), events)),
            config,
            ids: RequestIds::new(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            session: Mutex::new(None),
            closing: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of requests awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    fn spawn_process(&self) -> McpResult<Child> {
        let Transport::Stdio {
            command,
            args,
            env,
            cwd,
        } = &self.config.transport
        else {
            return Err(McpError::Config(format!(
                "server '{}' is not a stdio server",
                self.config.id
            )));
        };

        let mut cmd = Command::new(command);
        cmd.args(args)
            .env("PATH", effective_path(command))
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        cmd.spawn()
            .map_err(|e| McpError::spawn_failed(&self.config.id, format!("{}: {}", command, e)))
    }

    /// Wire up reader and writer tasks over an open byte stream.
    async fn attach<R, W>(&self, reader: R, writer: W, child: Option<Child>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.closing.store(false, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel::<Vec<u8>>(100);
        let writer = tokio::spawn(write_loop(
            writer,
            rx,
            self.config.id.clone(),
            Arc::clone(&self.pending),
            Arc::clone(&self.closed),
        ));

        let ctx = ReaderContext {
            server_id: self.config.id.clone(),
            pending: Arc::clone(&self.pending),
            core: Arc::clone(&self.core),
            closing: Arc::clone(&self.closing),
            closed: Arc::clone(&self.closed),
            replies: tx.clone(),
        };
        let reader = tokio::spawn(read_loop(reader, ctx));

        *self.session.lock().await = Some(Session {
            tx,
            child,
            reader,
            writer,
        });
    }

    fn ensure_open(&self) -> McpResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(McpError::ConnectionClosed(self.config.id.clone()))
        } else {
            Ok(())
        }
    }

    async fn sender(&self) -> McpResult<mpsc::Sender<Vec<u8>>> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.tx.clone())
            .ok_or_else(|| McpError::NotConnected(self.config.id.clone()))
    }

    async fn establish(&self) -> McpResult<()> {
        let mut child = self.spawn_process()?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn_failed(&self.config.id, "stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn_failed(&self.config.id, "stdout not captured"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr, self.config.id.clone()));
        }

        tracing::debug!(server_id = %self.config.id, pid, "server process spawned");
        self.attach(stdout, stdin, Some(child)).await;

        let init = handshake(self, &self.config.id).await?;
        self.core.set_server_info(init).await;
        self.core.set_state(ConnectionState::Connected).await;

        discover(self, &self.core).await;
        Ok(())
    }

    /// Stop the tasks and the process; reject whatever is still pending.
    ///
    /// Returns `false` when there was no session.
    async fn close_session(&self, notify_shutdown: bool) -> bool {
        let Some(session) = self.session.lock().await.take() else {
            return false;
        };
        self.closing.store(true, Ordering::SeqCst);

        let Session {
            tx,
            child,
            reader,
            mut writer,
        } = session;

        if notify_shutdown {
            match encode_notification("shutdown", None) {
                Ok(bytes) => {
                    if let Err(e) = tx.send(frame_line(bytes)).await {
                        tracing::warn!(server_id = %self.config.id, error = %e, "failed to send shutdown notification");
                    }
                }
                Err(e) => {
                    tracing::warn!(server_id = %self.config.id, error = %e, "failed to encode shutdown notification")
                }
            }
        }

        reader.abort();
        drop(tx);
        if tokio::time::timeout(SHUTDOWN_FLUSH, &mut writer).await.is_err() {
            tracing::debug!(server_id = %self.config.id, "writer did not drain before shutdown");
            writer.abort();
        }

        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::warn!(server_id = %self.config.id, error = %e, "failed to kill server process");
            }
        }

        reject_pending(&self.pending, &self.config.id).await;
        true
    }
}

#[async_trait]
impl Rpc for StdioToolClient {
    async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let tx = self.sender().await?;
        self.ensure_open()?;
        let id = self.ids.next();
        let bytes = frame_line(encode_request(id, method, params)?);

        let (resp_tx, resp_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, resp_tx);

        // The transport may have died between the check above and the insert;
        // nothing would ever answer this entry then.
        if self.closed.load(Ordering::SeqCst) || tx.send(bytes).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(McpError::ConnectionClosed(self.config.id.clone()));
        }

        match tokio::time::timeout(self.config.request_timeout(), resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::ConnectionClosed(self.config.id.clone())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                tracing::warn!(server_id = %self.config.id, method, id, "request timed out");
                Err(McpError::timeout(method))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        let tx = self.sender().await?;
        self.ensure_open()?;
        let bytes = frame_line(encode_notification(method, params)?);
        tx.send(bytes)
            .await
            .map_err(|_| McpError::ConnectionClosed(self.config.id.clone()))
    }
}

#[async_trait]
impl ToolClient for StdioToolClient {
    fn server_id(&self) -> &str {
        &self.config.id
    }

    async fn state(&self) -> ConnectionState {
        self.core.state().await
    }

    #[cfg_attr(feature = "telemetry", instrument(skip(self), fields(server_id)))]
    async fn connect(&self) -> McpResult<()> {
        if self.core.state().await == ConnectionState::Connected {
            return Ok(());
        }

        #[cfg(feature = "telemetry")]
        let start = {
            tracing::Span::current().record("server_id", self.config.id.as_str());
            Instant::now()
        };

        self.core.set_state(ConnectionState::Connecting).await;
        let result = self.establish().await;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("mcp.connect", start.elapsed());

        if let Err(e) = &result {
            self.close_session(false).await;
            self.core.fail(e.to_string()).await;
        }
        result
    }

    async fn disconnect(&self) {
        if !self.close_session(true).await {
            self.core.settle_disconnected().await;
            return;
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
        self.sender().await?;
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

/// Everything the reader task needs after the client call that spawned it returns.
struct ReaderContext {
    server_id: String,
    pending: PendingMap,
    core: Arc<ClientCore>,
    closing: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    replies: mpsc::Sender<Vec<u8>>,
}

impl ReaderContext {
    async fn dispatch(&self, line: &[u8]) {
        let message = match decode_message(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(server_id = %self.server_id, error = %e, "dropping undecodable line");
                return;
            }
        };

        match message {
            Message::Response(response) => {
                let waiter = self.pending.lock().await.remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response.into_result());
                    }
                    None => {
                        tracing::debug!(server_id = %self.server_id, id = response.id, "response for unknown request id");
                    }
                }
            }
            Message::Notification(notification) => {
                tracing::trace!(server_id = %self.server_id, method = %notification.method, "notification");
                self.core.events().emit(&HostEvent::Notification {
                    server_id: self.server_id.clone(),
                    method: notification.method,
                    params: notification.params,
                });
            }
            Message::Request(request) => {
                let outcome = if request.method == "ping" {
                    Ok(serde_json::json!({}))
                } else {
                    Err(JsonRpcError {
                        code: error_codes::METHOD_NOT_FOUND,
                        message: "Method not found".to_string(),
                        data: None,
                    })
                };
                match encode_response(request.id, outcome) {
                    Ok(bytes) => {
                        if self.replies.send(frame_line(bytes)).await.is_err() {
                            tracing::warn!(server_id = %self.server_id, method = %request.method, "could not answer server request");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(server_id = %self.server_id, error = %e, "could not encode reply")
                    }
                }
            }
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, ctx: ReaderContext) {
    let mut lines = LineBuffer::new();
    let mut chunk = vec![0u8; 8192];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in lines.push(&chunk[..n]) {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    ctx.dispatch(&line).await;
                }
            }
            Err(e) => {
                tracing::warn!(server_id = %ctx.server_id, error = %e, "read from server failed");
                break;
            }
        }
    }

    ctx.closed.store(true, Ordering::SeqCst);
    reject_pending(&ctx.pending, &ctx.server_id).await;
    if !ctx.closing.load(Ordering::SeqCst) {
        ctx.core.fail("server closed connection").await;
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::Receiver<Vec<u8>>,
    server_id: String,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) {
    while let Some(bytes) = rx.recv().await {
        let written = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::warn!(server_id = %server_id, error = %e, "write to server failed");
            closed.store(true, Ordering::SeqCst);
            reject_pending(&pending, &server_id).await;
            break;
        }
    }
}

async fn log_stderr(stderr: tokio::process::ChildStderr, server_id: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server_id = %server_id, "stderr: {}", line);
    }
}

async fn reject_pending(pending: &PendingMap, server_id: &str) {
    let drained: Vec<_> = pending.lock().await.drain().collect();
    for (_, tx) in drained {
        let _ = tx.send(Err(McpError::ConnectionClosed(server_id.to_string())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, DuplexStream};

    fn client(timeout: Duration) -> StdioToolClient {
        StdioToolClient::new(
            ServerConfig::stdio("s1", "unused").with_request_timeout(timeout),
            EventBus::new(),
        )
    }

    /// Attach the client to in-memory pipes; returns the server's ends.
    async fn attach_duplex(client: &StdioToolClient) -> (BufReader<DuplexStream>, DuplexStream) {
        let (client_out, server_in) = duplex(64 * 1024);
        let (server_out, client_in) = duplex(64 * 1024);
        client.attach(client_in, client_out, None).await;
        (BufReader::new(server_in), server_out)
    }

    async fn next_request(reader: &mut BufReader<DuplexStream>) -> Value {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_out_of_order_responses_routed_by_id() {
        let client = Arc::new(client(Duration::from_secs(5)));
        let (mut server_in, mut server_out) = attach_duplex(&client).await;

        let c1 = Arc::clone(&client);
        let first = tokio::spawn(async move { c1.request("first", None).await });
        let req1 = next_request(&mut server_in).await;
        let c2 = Arc::clone(&client);
        let second = tokio::spawn(async move { c2.request("second", None).await });
        let req2 = next_request(&mut server_in).await;

        assert_eq!(req1["id"], 1);
        assert_eq!(req2["id"], 2);

        // Unknown id first, then the answers in reverse order.
        server_out
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":99,\"result\":\"stray\"}\n")
            .await
            .unwrap();
        server_out
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":\"two\"}\n")
            .await
            .unwrap();
        server_out
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":\"one\"}\n")
            .await
            .unwrap();

        assert_eq!(first.await.unwrap().unwrap(), json!("one"));
        assert_eq!(second.await.unwrap().unwrap(), json!("two"));
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_response_split_across_chunks() {
        let client = Arc::new(client(Duration::from_secs(5)));
        let (mut server_in, mut server_out) = attach_duplex(&client).await;

        let c = Arc::clone(&client);
        let call = tokio::spawn(async move { c.request("tools/list", None).await });
        next_request(&mut server_in).await;

        server_out
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"resu")
            .await
            .unwrap();
        server_out.flush().await.unwrap();
        tokio::task::yield_now().await;
        server_out.write_all(b"lt\":{}}\n").await.unwrap();

        assert_eq!(call.await.unwrap().unwrap(), json!({}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_pending_entry() {
        let client = client(Duration::from_millis(100));
        let (_server_in, _server_out) = attach_duplex(&client).await;

        let started = tokio::time::Instant::now();
        let err = client.request("slow", None).await.unwrap_err();
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert_eq!(err.to_string(), "request timed out: slow");
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_protocol_error_response() {
        let client = Arc::new(client(Duration::from_secs(5)));
        let (mut server_in, mut server_out) = attach_duplex(&client).await;

        let c = Arc::clone(&client);
        let call = tokio::spawn(async move { c.call_tool("missing", json!({})).await });
        let req = next_request(&mut server_in).await;
        assert_eq!(req["method"], "tools/call");
        assert_eq!(req["params"]["name"], "missing");

        server_out
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"error\":{\"code\":-32602,\"message\":\"Unknown tool\"}}\n")
            .await
            .unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool (code: -32602)");
    }

    #[tokio::test]
    async fn test_server_ping_answered() {
        let client = client(Duration::from_secs(5));
        let (mut server_in, mut server_out) = attach_duplex(&client).await;

        server_out
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":41,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        let reply = next_request(&mut server_in).await;
        assert_eq!(reply["id"], 41);
        assert_eq!(reply["result"], json!({}));

        server_out
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":42,\"method\":\"sampling/createMessage\"}\n")
            .await
            .unwrap();
        let reply = next_request(&mut server_in).await;
        assert_eq!(reply["id"], 42);
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_notification_emitted_and_bad_lines_dropped() {
        let events = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = events.subscribe(move |e: &HostEvent| {
            let _ = tx.send(e.clone());
        });
        let client = StdioToolClient::new(ServerConfig::stdio("s1", "unused"), events);
        let (_server_in, mut server_out) = attach_duplex(&client).await;

        server_out.write_all(b"not json at all\n\n").await.unwrap();
        server_out
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{\"level\":\"info\"}}\n")
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            HostEvent::Notification {
                server_id: "s1".to_string(),
                method: "notifications/message".to_string(),
                params: Some(json!({"level": "info"})),
            }
        );
    }

    #[tokio::test]
    async fn test_stream_end_rejects_pending_and_errors() {
        let client = Arc::new(client(Duration::from_secs(5)));
        let (mut server_in, server_out) = attach_duplex(&client).await;

        let c = Arc::clone(&client);
        let call = tokio::spawn(async move { c.request("tools/list", None).await });
        next_request(&mut server_in).await;
        drop(server_out);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::ConnectionClosed(ref id) if id == "s1"));

        // The reader marks the state after rejecting.
        for _ in 0..50 {
            if client.state().await == ConnectionState::Error {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(client.state().await, ConnectionState::Error);

        client.disconnect().await;
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_call_after_server_exit_fails_fast() {
        let client = client(Duration::from_secs(30));
        let (_server_in, server_out) = attach_duplex(&client).await;
        drop(server_out);

        for _ in 0..50 {
            if client.state().await == ConnectionState::Error {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(client.state().await, ConnectionState::Error);

        let err = tokio::time::timeout(Duration::from_secs(1), client.call_tool("echo", json!({})))
            .await
            .expect("call should not wait for its deadline")
            .unwrap_err();
        assert_eq!(err, McpError::ConnectionClosed("s1".to_string()));
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_write_rejects_request() {
        let client = client(Duration::from_secs(30));
        let (server_in, _server_out) = attach_duplex(&client).await;
        drop(server_in);

        let err = tokio::time::timeout(Duration::from_secs(1), client.request("tools/list", None))
            .await
            .expect("request should not wait for its deadline")
            .unwrap_err();
        assert_eq!(err, McpError::ConnectionClosed("s1".to_string()));
        assert_eq!(client.pending_count().await, 0);

        let err = client.request("tools/list", None).await.unwrap_err();
        assert_eq!(err, McpError::ConnectionClosed("s1".to_string()));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let client = client(Duration::from_secs(5));
        client.disconnect().await;
        assert_eq!(client.state().await, ConnectionState::Disconnected);

        let (mut server_in, _server_out) = attach_duplex(&client).await;
        client.disconnect().await;
        let shutdown = next_request(&mut server_in).await;
        assert_eq!(shutdown["method"], "shutdown");
        assert_eq!(client.state().await, ConnectionState::Disconnected);

        client.disconnect().await;
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_call_without_connection() {
        let client = client(Duration::from_secs(5));
        let err = client.call_tool("echo", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "server not connected: s1");
    }

    #[tokio::test]
    async fn test_spawn_failure_sets_error_state() {
        let client = StdioToolClient::new(
            ServerConfig::stdio("s1", "/definitely/not/a/real/binary"),
            EventBus::new(),
        );
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, McpError::SpawnFailed { .. }));
        assert_eq!(client.state().await, ConnectionState::Error);
    }
}
