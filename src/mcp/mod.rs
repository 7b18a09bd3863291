// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model Context Protocol (MCP) client side.
//!
//! Connects the host to external tool servers over stdio or HTTP and routes
//! tool calls to the right one.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  ToolConnectionManager                   │
//! │  ┌────────────────┐  ┌────────────────┐                  │
//! │  │ StdioToolClient│  │ HttpToolClient │   ...            │
//! │  │   (server1)    │  │   (server2)    │                  │
//! │  └───────┬────────┘  └───────┬────────┘                  │
//! └──────────┼───────────────────┼───────────────────────────┘
//!            │                   │
//!      ┌─────▼─────┐       ┌─────▼──────┐
//!      │  stdin /  │       │ POST /mcp  │
//!      │  stdout   │       │ JSON | SSE │
//!      └───────────┘       └────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use toolhost::mcp::{ServerConfig, ToolConnectionManager};
//!
//! let manager = ToolConnectionManager::new();
//! let _sub = manager.subscribe(|event| println!("{:?}", event));
//!
//! manager.connect(ServerConfig::stdio("fs", "mcp-server-filesystem")).await?;
//! let content = manager
//!     .call_tool("fs", "read_file", serde_json::json!({"path": "README.md"}))
//!     .await?;
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod manager;
pub mod path;
pub mod stdio;
pub mod types;

pub use client::{ClientFactory, DefaultClientFactory, ToolClient};
pub use config::{HttpTarget, ServerConfig, Transport};
pub use error::{McpError, McpResult};
pub use events::{EventBus, HostEvent, Subscription};
pub use http::HttpToolClient;
pub use manager::ToolConnectionManager;
pub use stdio::StdioToolClient;
pub use types::*;
