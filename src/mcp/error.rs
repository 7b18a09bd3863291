// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP error types.
//!
//! `McpError` is `Clone` so a single connect outcome can be handed to every
//! caller waiting on the same in-flight attempt. Foreign errors (I/O, JSON,
//! HTTP) are flattened to their messages on conversion.

use thiserror::Error;

/// Errors that can occur during MCP operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum McpError {
    /// The server process could not be spawned.
    #[error("failed to spawn MCP server '{server}': {message}")]
    SpawnFailed { server: String, message: String },

    /// The `initialize` round trip failed or returned malformed data.
    #[error("handshake with MCP server '{server}' failed: {message}")]
    HandshakeFailed { server: String, message: String },

    /// One message could not be decoded.
    #[error("failed to decode message: {0}")]
    Decode(String),

    /// A single request exceeded its deadline.
    #[error("request timed out: {method}")]
    RequestTimeout { method: String },

    /// The server answered with a JSON-RPC `error` object.
    #[error("{message} (code: {code})")]
    Protocol { code: i64, message: String },

    /// No live client is registered (or attached) for the server id.
    #[error("server not connected: {0}")]
    NotConnected(String),

    /// The HTTP endpoint answered with a non-2xx status; the body is the message.
    #[error("{body}")]
    HttpStatus { status: u16, body: String },

    /// A streamed response ended without any `result` chunk.
    #[error("no result received from stream")]
    NoStreamResult,

    /// The transport closed while requests were still in flight.
    #[error("connection to MCP server '{0}' closed")]
    ConnectionClosed(String),

    /// Low-level transport failure (write, read, HTTP send).
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl McpError {
    /// Create a spawn failure.
    pub fn spawn_failed(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Create a handshake failure.
    pub fn handshake_failed(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error from a JSON-RPC error object.
    pub fn protocol(code: i64, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Create a request timeout error.
    pub fn timeout(method: impl Into<String>) -> Self {
        Self::RequestTimeout {
            method: method.into(),
        }
    }

    /// Whether the server reported the method as unsupported.
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, Self::Protocol { code, .. } if *code == error_codes::METHOD_NOT_FOUND)
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type for MCP operations.
pub type McpResult<T> = std::result::Result<T, McpError>;

/// Standard JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}
