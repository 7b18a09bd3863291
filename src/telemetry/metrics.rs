// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process metrics for tool calls and lifecycle operations.
//!
//! Tool calls are keyed `server.tool`; operations by a dotted name such as
//! `mcp.connect` or `orchestrate.start`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Latency bucket upper bounds in microseconds: 1ms, 10ms, 100ms, 1s, 10s.
const BUCKETS_US: [u64; 5] = [1_000, 10_000, 100_000, 1_000_000, 10_000_000];

#[derive(Debug)]
pub struct Metrics {
    tools: RwLock<HashMap<String, ToolMetrics>>,
    operations: RwLock<HashMap<String, OperationMetrics>>,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record one tool call.
    pub fn record_tool(&self, name: &str, duration: Duration, success: bool) {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        tools
            .entry(name.to_string())
            .or_default()
            .record(duration, success);
    }

    /// Record one lifecycle operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        ops.entry(name.to_string()).or_default().record(duration);
    }

    pub fn tool_metrics(&self, name: &str) -> Option<ToolMetrics> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        tools.get(name).cloned()
    }

    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        let ops = self.operations.read().unwrap_or_else(PoisonError::into_inner);
        ops.get(name).cloned()
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tools: self.tools.read().unwrap_or_else(PoisonError::into_inner).clone(),
            operations: self
                .operations
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            uptime: self.uptime(),
        }
    }

    pub fn reset(&self) {
        self.tools.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for one `server.tool` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolMetrics {
    pub calls: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
}

impl ToolMetrics {
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.calls += 1;
        if !success {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        average(self.total_duration, self.calls)
    }

    /// Fraction of calls that succeeded; 1.0 before any call.
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            1.0
        } else {
            (self.calls - self.failures) as f64 / self.calls as f64
        }
    }
}

/// Durations of one named operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    /// Per-bucket counts; the last slot is the overflow bucket.
    pub buckets: [u64; BUCKETS_US.len() + 1],
}

impl OperationMetrics {
    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        let slot = BUCKETS_US
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(BUCKETS_US.len());
        self.buckets[slot] += 1;
    }

    pub fn avg_duration(&self) -> Duration {
        average(self.total_duration, self.count)
    }

    /// Upper bound of the bucket holding the `p`-th percentile.
    pub fn percentile(&self, p: f64) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let target = ((self.count as f64) * p / 100.0).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (slot, count) in self.buckets.iter().enumerate() {
            seen += count;
            if seen >= target {
                let bound = BUCKETS_US.get(slot).copied().unwrap_or(BUCKETS_US[BUCKETS_US.len() - 1] * 10);
                return Duration::from_micros(bound);
            }
        }
        Duration::ZERO
    }
}

fn average(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(n) => total / n,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / count as f64),
    }
}

/// A point-in-time copy of all metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub tools: HashMap<String, ToolMetrics>,
    pub operations: HashMap<String, OperationMetrics>,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Human-readable report, entries sorted by name.
    pub fn format_report(&self) -> String {
        let mut report = format!("uptime {:.2?}\n", self.uptime);

        let mut tools: Vec<_> = self.tools.iter().collect();
        tools.sort_by(|a, b| a.0.cmp(b.0));
        for (name, m) in tools {
            report.push_str(&format!(
                "tool {}: {} calls, {:.1}% ok, avg {:.2?}, max {:.2?}\n",
                name,
                m.calls,
                m.success_rate() * 100.0,
                m.avg_duration(),
                m.max_duration
            ));
        }

        let mut operations: Vec<_> = self.operations.iter().collect();
        operations.sort_by(|a, b| a.0.cmp(b.0));
        for (name, m) in operations {
            report.push_str(&format!(
                "op {}: {} runs, avg {:.2?}, p90 <= {:.2?}\n",
                name,
                m.count,
                m.avg_duration(),
                m.percentile(90.0)
            ));
        }

        report
    }
}
