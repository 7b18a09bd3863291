// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-RPC 2.0 envelopes and framing.
//!
//! Transport-agnostic: the stdio client frames encoded messages with
//! [`frame_line`] and feeds its output through a [`LineBuffer`]; the HTTP
//! client posts encoded requests as-is.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{McpError, McpResult};

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Outgoing JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC notification (no id, no response).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC response, success or error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Turn the envelope into the call outcome.
    pub fn into_result(self) -> McpResult<Value> {
        if let Some(err) = self.error {
            return Err(McpError::protocol(err.code, err.message));
        }
        self.result.ok_or_else(|| {
            McpError::Decode(format!("response {} has neither result nor error", self.id))
        })
    }
}

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Answer to one of our requests.
    Response(JsonRpcResponse),
    /// Server-originated notification.
    Notification(JsonRpcNotification),
    /// Server-originated request expecting an answer.
    Request(JsonRpcRequest),
}

/// Encode a request as one JSON document.
pub fn encode_request(id: u64, method: &str, params: Option<Value>) -> McpResult<Vec<u8>> {
    Ok(serde_json::to_vec(&JsonRpcRequest::new(id, method, params))?)
}

/// Encode a notification as one JSON document.
pub fn encode_notification(method: &str, params: Option<Value>) -> McpResult<Vec<u8>> {
    Ok(serde_json::to_vec(&JsonRpcNotification {
        jsonrpc: JSONRPC_VERSION.to_string(),
        method: method.to_string(),
        params,
    })?)
}

/// Encode a response to a server-originated request.
pub fn encode_response(id: u64, outcome: Result<Value, JsonRpcError>) -> McpResult<Vec<u8>> {
    let mut envelope = serde_json::json!({ "jsonrpc": JSONRPC_VERSION, "id": id });
    match outcome {
        Ok(result) => envelope["result"] = result,
        Err(error) => envelope["error"] = serde_json::to_value(error)?,
    }
    Ok(serde_json::to_vec(&envelope)?)
}

/// Stdio framing: newline-terminate one encoded message.
pub fn frame_line(mut bytes: Vec<u8>) -> Vec<u8> {
    bytes.push(b'\n');
    bytes
}

/// Decode and classify one message.
///
/// A message with an `id` and no `method` is a response; without `id` it is a
/// notification; with both it is a server-originated request.
pub fn decode_message(bytes: &[u8]) -> McpResult<Message> {
    let value: Value = serde_json::from_slice(bytes)?;
    let object = value
        .as_object()
        .ok_or_else(|| McpError::Decode("message is not a JSON object".to_string()))?;

    let has_id = object.get("id").is_some_and(|id| !id.is_null());
    let has_method = object.contains_key("method");

    match (has_id, has_method) {
        (true, false) => Ok(Message::Response(serde_json::from_value(value)?)),
        (true, true) => Ok(Message::Request(serde_json::from_value(value)?)),
        (false, true) => Ok(Message::Notification(serde_json::from_value(value)?)),
        (false, false) => Err(McpError::Decode(
            "message has neither id nor method".to_string(),
        )),
    }
}

/// Decode one request document (inverse of [`encode_request`]).
pub fn decode_request(bytes: &[u8]) -> McpResult<JsonRpcRequest> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Accumulates raw bytes and yields complete newline-terminated lines.
///
/// The trailing incomplete line is kept for the next [`LineBuffer::push`].
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete line (without the newline).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Bytes of the incomplete trailing line.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}

/// Monotonic per-client request id source, starting at 1.
#[derive(Debug)]
pub struct RequestIds(AtomicU64);

impl RequestIds {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_roundtrip() {
        let params = json!({"name": "echo", "arguments": {"text": "hi"}});
        let bytes = encode_request(7, "tools/call", Some(params.clone())).unwrap();
        let decoded = decode_request(&bytes).unwrap();

        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.method, "tools/call");
        assert_eq!(decoded.params, Some(params));
        assert_eq!(decoded.jsonrpc, "2.0");
    }

    #[test]
    fn test_request_wire_shape() {
        let bytes = encode_request(1, "tools/list", None).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#
        );
    }

    #[test]
    fn test_notification_has_no_id() {
        let bytes = encode_notification("notifications/initialized", None).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("\"id\""));
        assert!(text.contains("notifications/initialized"));
    }

    #[test]
    fn test_decode_classifies_messages() {
        let response = decode_message(br#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#).unwrap();
        assert!(matches!(response, Message::Response(ref r) if r.id == 3));

        let notification =
            decode_message(br#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#)
                .unwrap();
        assert!(matches!(notification, Message::Notification(ref n) if n.method == "notifications/tools/list_changed"));

        let request = decode_message(br#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#).unwrap();
        assert!(matches!(request, Message::Request(ref r) if r.method == "ping"));
    }

    #[test]
    fn test_decode_malformed_is_error() {
        assert!(matches!(decode_message(b"{not json"), Err(McpError::Decode(_))));
        assert!(matches!(decode_message(b"[1,2]"), Err(McpError::Decode(_))));
        assert!(matches!(decode_message(br#"{"jsonrpc":"2.0"}"#), Err(McpError::Decode(_))));
    }

    #[test]
    fn test_into_result_error() {
        let response: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        let err = response.into_result().unwrap_err();
        assert_eq!(err.to_string(), "Method not found (code: -32601)");
    }

    #[test]
    fn test_encode_response() {
        let ok = encode_response(4, Ok(json!({}))).unwrap();
        let decoded = decode_message(&ok).unwrap();
        assert!(matches!(decoded, Message::Response(ref r) if r.id == 4 && r.result == Some(json!({}))));

        let err = encode_response(
            5,
            Err(JsonRpcError {
                code: -32601,
                message: "Method not found".to_string(),
                data: None,
            }),
        )
        .unwrap();
        let decoded = decode_message(&err).unwrap();
        assert!(matches!(decoded, Message::Response(ref r) if r.error.is_some()));
    }

    #[test]
    fn test_line_buffer_retains_partial_line() {
        let mut buffer = LineBuffer::new();

        assert!(buffer.push(br#"{"jsonrpc":"2.0","id":1,"resu"#).is_empty());
        assert!(!buffer.pending().is_empty());

        let lines = buffer.push(b"lt\":{}}\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], br#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_vec());
        assert!(buffer.pending().is_empty());
    }

    #[test]
    fn test_line_buffer_multiple_lines_and_crlf() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"one\r\ntwo\nthr");
        assert_eq!(lines, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(buffer.pending(), b"thr");
    }

    #[test]
    fn test_request_ids_start_at_one() {
        let ids = RequestIds::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
    }
}
