// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for widget process orchestration.

use thiserror::Error;

use super::types::ProcessStatus;
use crate::mcp::McpError;

/// Errors raised by the process orchestrator.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process could not be spawned.
    #[error("failed to spawn widget '{server_id}': {message}")]
    SpawnFailed { server_id: String, message: String },

    /// No port could be reserved.
    #[error("port unavailable: {0}")]
    PortUnavailable(String),

    /// The root endpoint never answered successfully.
    #[error("widget '{server_id}' not ready on port {port} after {waited_ms}ms")]
    ReadinessTimeout {
        server_id: String,
        port: u16,
        waited_ms: u64,
    },

    /// The process died while still starting.
    #[error("widget '{server_id}' exited before becoming ready")]
    ExitedBeforeReady { server_id: String },

    /// The push socket could not be opened.
    #[error("push socket for '{server_id}' failed: {message}")]
    PushSocket { server_id: String, message: String },

    /// No running process for the id.
    #[error("server not running: {0}")]
    NotRunning(String),

    /// A start or stop for the id is already in progress.
    #[error("widget '{server_id}' is {status}")]
    Busy {
        server_id: String,
        status: ProcessStatus,
    },

    /// A proxied protocol call failed.
    #[error(transparent)]
    Rpc(#[from] McpError),
}

impl ProcessError {
    pub fn spawn_failed(server_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            server_id: server_id.into(),
            message: message.into(),
        }
    }

    pub fn push_socket(server_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PushSocket {
            server_id: server_id.into(),
            message: message.into(),
        }
    }
}

/// Result type for orchestrator operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;
