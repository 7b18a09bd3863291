// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Widget process orchestration.
//!
//! Runs tool servers that live on this machine as child processes, each
//! bound to its own loopback port.
//!
//! # Lifecycle
//!
//! ```text
//!            start()
//!               │
//!               ▼
//!  ┌──────────────────────┐  not ready / exited   ┌────────┐
//!  │       starting       │──────────────────────▶│ error  │
//!  │ GET / until 2xx,     │                       └────────┘
//!  │ then open /ws        │
//!  └──────────┬───────────┘
//!             ▼
//!  ┌──────────────────────┐  exit != 0 and restarts left
//!  │       running        │──────────────┐
//!  └──────────┬───────────┘              │ wait n × restart delay
//!             │ stop()                   ▼
//!             ▼                   ┌─────────────┐
//!  ┌──────────────────────┐       │   stopped   │──▶ start again
//!  │ stopping → removed   │       └─────────────┘
//!  └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use toolhost::orchestrate::{ProcessOrchestrator, WidgetManifest};
//!
//! let orchestrator = ProcessOrchestrator::default();
//! let _sub = orchestrator.subscribe(|event| println!("{:?}", event));
//!
//! let record = orchestrator
//!     .start(WidgetManifest::new("weather", "node").with_args(["server.js"]))
//!     .await?;
//! let content = orchestrator
//!     .call_tool("weather", "forecast", serde_json::json!({"city": "Oslo"}))
//!     .await?;
//! orchestrator.stop("weather").await?;
//! ```

pub mod error;
pub mod health;
pub mod ports;
pub mod process;
pub mod push;
pub mod types;

pub use error::{ProcessError, ProcessResult};
pub use process::ProcessOrchestrator;
pub use types::{OrchestratorSettings, ProcessEvent, ProcessRecord, ProcessStatus, WidgetManifest};
