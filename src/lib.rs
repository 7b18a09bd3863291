// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! toolhost - host-side manager for MCP tool servers.
//!
//! Connects to tool servers over stdio or HTTP, multiplexes tool calls
//! across them, and runs locally hosted servers as supervised processes.
//!
//! # Architecture
//!
//! - [`mcp`] - JSON-RPC codec, stdio and HTTP clients, connection manager
//! - [`orchestrate`] - local widget processes with readiness, push socket, restarts
//! - [`config`] - server list and orchestrator settings from disk
//! - [`telemetry`] - tracing setup and in-process metrics
//! - [`error`] - configuration errors and result aliases
//!
//! # Example
//!
//! ```rust,ignore
//! use toolhost::config::load_config;
//! use toolhost::mcp::ToolConnectionManager;
//!
//! let config = load_config(std::path::Path::new("."))?;
//! let manager = ToolConnectionManager::new();
//! for server in config.enabled_servers() {
//!     manager.connect(server.clone()).await?;
//! }
//! for entry in manager.get_all_tools().await {
//!     println!("{}/{}", entry.server_id, entry.tool.name);
//! }
//! ```

pub mod config;
pub mod error;
pub mod mcp;
pub mod orchestrate;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use error::{ConfigError, Result};
pub use mcp::{McpError, ServerConfig, ToolConnectionManager};
pub use orchestrate::{ProcessError, ProcessOrchestrator, WidgetManifest};

/// toolhost version, reported as `clientInfo.version` during the handshake.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
