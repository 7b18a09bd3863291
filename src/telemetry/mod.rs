// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing and metrics.
//!
//! - **Tracing**: structured logs with `server_id`, `method`, `port` and
//!   `pid` fields; spans on public async entry points
//! - **Metrics**: per-tool call counters and per-operation latency buckets
//!
//! # Usage
//!
//! ```rust,ignore
//! use toolhost::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! Metric recording is compiled in only with the `telemetry` feature.

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{Metrics, MetricsSnapshot, OperationMetrics, ToolMetrics, GLOBAL_METRICS};
