// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP server configuration.
//!
//! On disk a server entry is a loose record; the transport is decided once
//! while deserializing and carried as [`Transport`] from then on.
//!
//! # Example Configuration
//!
//! ```json
//! {
//!   "servers": [
//!     {
//!       "id": "filesystem",
//!       "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-filesystem", "/path"]
//!     },
//!     { "id": "weather", "transport": "http", "port": 3105 },
//!     { "id": "remote", "url": "https://mcp.example.com/v1", "enabled": false }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::error::McpError;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Configuration for a single MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawServerConfig", into = "RawServerConfig")]
pub struct ServerConfig {
    /// Unique server id.
    pub id: String,

    /// Display name (defaults to the id).
    pub name: String,

    /// Whether this server is enabled.
    pub enabled: bool,

    /// Per-request deadline in milliseconds.
    pub request_timeout_ms: u64,

    /// How to reach the server.
    pub transport: Transport,
}

/// How a server is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Spawned child process speaking newline-delimited JSON-RPC.
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<String>,
    },

    /// HTTP endpoint.
    Http { target: HttpTarget },
}

/// Address of an HTTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpTarget {
    /// Full endpoint URL, used for liveness and requests alike.
    Url(String),

    /// Local port; liveness on `/`, requests on `/mcp`.
    Port(u16),
}

impl HttpTarget {
    /// URL probed by the liveness check.
    pub fn liveness_url(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Port(port) => format!("http://127.0.0.1:{}/", port),
        }
    }

    /// URL requests are POSTed to.
    pub fn rpc_url(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Port(port) => format!("http://127.0.0.1:{}/mcp", port),
        }
    }
}

impl ServerConfig {
    /// Create a stdio transport configuration.
    pub fn stdio(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_transport(
            id,
            Transport::Stdio {
                command: command.into(),
                args: Vec::new(),
                env: HashMap::new(),
                cwd: None,
            },
        )
    }

    /// Create an HTTP transport configuration for a URL.
    pub fn http(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            id,
            Transport::Http {
                target: HttpTarget::Url(url.into()),
            },
        )
    }

    /// Create an HTTP transport configuration for a local port.
    pub fn http_port(id: impl Into<String>, port: u16) -> Self {
        Self::with_transport(
            id,
            Transport::Http {
                target: HttpTarget::Port(port),
            },
        )
    }

    fn with_transport(id: impl Into<String>, transport: Transport) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            enabled: true,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            transport,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add command arguments (stdio only).
    pub fn with_args(mut self, new_args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        if let Transport::Stdio { args, .. } = &mut self.transport {
            *args = new_args.into_iter().map(|s| s.into()).collect();
        }
        self
    }

    /// Set environment variables (stdio only).
    pub fn with_env(
        mut self,
        new_env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        if let Transport::Stdio { env, .. } = &mut self.transport {
            *env = new_env
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect();
        }
        self
    }

    /// Set working directory (stdio only).
    pub fn with_cwd(mut self, dir: impl Into<String>) -> Self {
        if let Transport::Stdio { cwd, .. } = &mut self.transport {
            *cwd = Some(dir.into());
        }
        self
    }

    /// Set the per-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Per-request deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Short transport label for display.
    pub fn transport_kind(&self) -> &'static str {
        match self.transport {
            Transport::Stdio { .. } => "stdio",
            Transport::Http { .. } => "http",
        }
    }
}

/// On-disk shape of a server entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawServerConfig {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
}

fn default_enabled() -> bool {
    true
}

impl TryFrom<RawServerConfig> for ServerConfig {
    type Error = McpError;

    fn try_from(raw: RawServerConfig) -> Result<Self, Self::Error> {
        if raw.id.trim().is_empty() {
            return Err(McpError::Config("server id must not be empty".to_string()));
        }

        let wants_http = raw.transport.as_deref() == Some("http")
            || raw.url.is_some()
            || raw.port.is_some();

        let transport = if wants_http {
            let target = match (raw.url, raw.port) {
                (Some(url), _) => HttpTarget::Url(url),
                (None, Some(port)) => HttpTarget::Port(port),
                (None, None) => {
                    return Err(McpError::Config(format!(
                        "http server '{}' needs a url or port",
                        raw.id
                    )))
                }
            };
            Transport::Http { target }
        } else {
            let command = raw.command.ok_or_else(|| {
                McpError::Config(format!("stdio server '{}' has no command", raw.id))
            })?;
            Transport::Stdio {
                command,
                args: raw.args,
                env: raw.env,
                cwd: raw.cwd,
            }
        };

        Ok(Self {
            name: raw.name.unwrap_or_else(|| raw.id.clone()),
            id: raw.id,
            enabled: raw.enabled,
            request_timeout_ms: raw.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            transport,
        })
    }
}

impl From<ServerConfig> for RawServerConfig {
    fn from(config: ServerConfig) -> Self {
        let mut raw = RawServerConfig {
            name: Some(config.name),
            id: config.id,
            enabled: config.enabled,
            request_timeout_ms: Some(config.request_timeout_ms),
            ..Default::default()
        };
        match config.transport {
            Transport::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                raw.transport = Some("stdio".to_string());
                raw.command = Some(command);
                raw.args = args;
                raw.env = env;
                raw.cwd = cwd;
            }
            Transport::Http { target } => {
                raw.transport = Some("http".to_string());
                match target {
                    HttpTarget::Url(url) => raw.url = Some(url),
                    HttpTarget::Port(port) => raw.port = Some(port),
                }
            }
        }
        raw
    }
}
