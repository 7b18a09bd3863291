// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Readiness polling for freshly spawned widgets.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::error::{ProcessError, ProcessResult};

/// Whether the widget process is still alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Exited(Option<i32>),
}

impl Liveness {
    pub fn is_exited(&self) -> bool {
        matches!(self, Self::Exited(_))
    }
}

/// Poll `url` until it answers 2xx, the process exits, or `timeout` elapses.
pub async fn wait_for_ready(
    http: &reqwest::Client,
    server_id: &str,
    port: u16,
    url: &str,
    timeout: Duration,
    interval: Duration,
    mut liveness: watch::Receiver<Liveness>,
) -> ProcessResult<()> {
    let started = Instant::now();
    let deadline = started + timeout;
    let exited = || ProcessError::ExitedBeforeReady {
        server_id: server_id.to_string(),
    };

    loop {
        if liveness.borrow().is_exited() {
            return Err(exited());
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, http.get(url).send()).await {
            Ok(Ok(response)) if response.status().is_success() => {
                tracing::debug!(
                    server_id,
                    port,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "widget ready"
                );
                return Ok(());
            }
            Ok(Ok(response)) => {
                tracing::trace!(server_id, status = %response.status(), "not ready yet");
            }
            Ok(Err(e)) => {
                tracing::trace!(server_id, "readiness probe failed: {}", e);
            }
            Err(_) => break,
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline.min(Instant::now() + interval)) => {}
            changed = liveness.changed() => {
                if changed.is_err() || liveness.borrow().is_exited() {
                    return Err(exited());
                }
            }
        }
    }

    Err(ProcessError::ReadinessTimeout {
        server_id: server_id.to_string(),
        port,
        waited_ms: timeout.as_millis() as u64,
    })
}
