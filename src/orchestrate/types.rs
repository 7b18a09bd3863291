// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for widget process orchestration.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Manifest
// ============================================================================

/// Already-validated descriptor of a locally hosted tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetManifest {
    /// Unique identifier; also the server id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Executable to spawn.
    pub command: String,
    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment, applied last.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Fixed port; allocated from the base port when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl WidgetManifest {
    /// Create a manifest with minimal required fields.
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            port: None,
        }
    }

    /// Set command arguments.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add one environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Pin the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

// ============================================================================
// Process Status
// ============================================================================

/// Lifecycle status of a widget process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Spawned, waiting for readiness and the push socket.
    Starting,
    /// Ready and serving.
    Running,
    /// Stop in progress.
    Stopping,
    /// Exited or stopped.
    Stopped,
    /// Failed to start or was killed after a failure.
    Error,
}

impl ProcessStatus {
    /// Whether a record in this status keeps its port reserved.
    pub fn holds_port(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One locally spawned process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub server_id: String,
    /// OS pid while a process is alive.
    pub pid: Option<u32>,
    pub port: u16,
    pub status: ProcessStatus,
    pub started_at: DateTime<Utc>,
    /// Automatic restarts performed so far.
    pub restart_count: u32,
}

// ============================================================================
// Events
// ============================================================================

/// Lifecycle transitions and inbound push messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessEvent {
    Started {
        server_id: String,
        port: u16,
    },
    Stopped {
        server_id: String,
        exit_code: Option<i32>,
    },
    Restarting {
        server_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    Error {
        server_id: String,
        message: String,
    },
    /// Message received on the push socket.
    Push {
        server_id: String,
        payload: Value,
    },
}

impl ProcessEvent {
    /// Server the event is about.
    pub fn server_id(&self) -> &str {
        match self {
            Self::Started { server_id, .. }
            | Self::Stopped { server_id, .. }
            | Self::Restarting { server_id, .. }
            | Self::Error { server_id, .. }
            | Self::Push { server_id, .. } => server_id,
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Tunables for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// First port tried when a manifest declares none.
    pub base_port: u16,
    /// Automatic restarts allowed per record.
    pub max_restarts: u32,
    /// Restart delay unit; the n-th restart waits n units.
    pub restart_delay_ms: u64,
    /// Readiness window after spawn.
    pub ready_timeout_ms: u64,
    /// Interval between readiness probes.
    pub ready_poll_ms: u64,
    /// Push socket connect timeout.
    pub push_connect_timeout_ms: u64,
    /// Delay before each push socket reconnect.
    pub push_reconnect_ms: u64,
    /// How long `stop` waits after SIGTERM before killing.
    pub stop_grace_ms: u64,
    /// Deadline for tool calls proxied to a widget.
    pub request_timeout_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            base_port: 3100,
            max_restarts: 3,
            restart_delay_ms: 1000,
            ready_timeout_ms: 10_000,
            ready_poll_ms: 200,
            push_connect_timeout_ms: 5000,
            push_reconnect_ms: 1000,
            stop_grace_ms: 5000,
            request_timeout_ms: 30_000,
        }
    }
}

impl OrchestratorSettings {
    pub fn restart_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.restart_delay_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }

    pub fn push_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.push_connect_timeout_ms)
    }

    pub fn push_reconnect(&self) -> Duration {
        Duration::from_millis(self.push_reconnect_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_parse_defaults() {
        let manifest: WidgetManifest =
            serde_json::from_str(r#"{"id": "weather", "command": "node", "args": ["server.js"]}"#)
                .unwrap();
        assert_eq!(manifest.args, vec!["server.js"]);
        assert!(manifest.port.is_none());
        assert!(manifest.env.is_empty());
    }

    #[test]
    fn test_manifest_builder() {
        let manifest = WidgetManifest::new("w", "node")
            .with_args(["a.js"])
            .with_env("DEBUG", "1")
            .with_port(4100);
        assert_eq!(manifest.name, "w");
        assert_eq!(manifest.port, Some(4100));
        assert_eq!(manifest.env.get("DEBUG").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_status_holds_port() {
        assert!(ProcessStatus::Starting.holds_port());
        assert!(ProcessStatus::Running.holds_port());
        assert!(ProcessStatus::Stopping.holds_port());
        assert!(!ProcessStatus::Stopped.holds_port());
        assert!(!ProcessStatus::Error.holds_port());
        assert_eq!(ProcessStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_restart_delay_is_linear() {
        let settings = OrchestratorSettings::default();
        assert_eq!(settings.restart_delay(1), Duration::from_secs(1));
        assert_eq!(settings.restart_delay(2), Duration::from_secs(2));
        assert_eq!(settings.restart_delay(3), Duration::from_secs(3));
    }

    #[test]
    fn test_settings_partial_override() {
        let settings: OrchestratorSettings =
            serde_json::from_str(r#"{"base_port": 4000}"#).unwrap();
        assert_eq!(settings.base_port, 4000);
        assert_eq!(settings.max_restarts, 3);
        assert_eq!(settings.ready_poll_ms, 200);
    }

    #[test]
    fn test_event_tagging() {
        let event = ProcessEvent::Started {
            server_id: "w".to_string(),
            port: 3100,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "started");
        assert_eq!(event.server_id(), "w");
    }
}
