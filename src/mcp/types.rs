// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP types for capability descriptors and connection state.
//!
//! Descriptors mirror the wire shapes (camelCase) returned by `tools/list`,
//! `resources/list` and `prompts/list`; tool results are passed through as raw
//! JSON and never interpreted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name sent in `initialize`.
pub const CLIENT_NAME: &str = "toolhost";

/// A tool exposed by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name, unique within its server.
    pub name: String,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the tool's arguments.
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl ToolDescriptor {
    /// Create a descriptor with an empty object schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: empty_object_schema(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A readable resource exposed by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One declared argument of a prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A prompt template exposed by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// A tool tagged with the server that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerTool {
    pub server_id: String,
    pub tool: ToolDescriptor,
}

/// Server identity reported in the `initialize` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,

    /// Server version.
    #[serde(default)]
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            version: "0.0.0".to_string(),
        }
    }
}

/// Parsed `initialize` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,

    #[serde(default)]
    pub server_info: ServerInfo,

    /// Raw capability object; only its presence per key matters to the host.
    #[serde(default)]
    pub capabilities: Value,
}

/// Parameters for `initialize`.
pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": crate::VERSION,
        }
    })
}

/// Connection state for an MCP server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,

    /// Spawning or handshaking.
    Connecting,

    /// Handshake complete; requests accepted.
    Connected,

    /// Connect failed or the transport dropped.
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Pull a list field out of a `*/list` result, tolerating its absence.
pub(crate) fn parse_list<T: serde::de::DeserializeOwned>(
    result: &Value,
    field: &str,
) -> Result<Vec<T>, serde_json::Error> {
    match result.get(field) {
        Some(items) if !items.is_null() => serde_json::from_value(items.clone()),
        _ => Ok(Vec::new()),
    }
}

/// The `content` field of a `tools/call` result, `[]` when absent.
pub(crate) fn tool_content(mut result: Value) -> Value {
    match result.get_mut("content") {
        Some(content) => content.take(),
        None => Value::Array(Vec::new()),
    }
}
