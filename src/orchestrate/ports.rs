// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Port allocation for widget processes.

use std::collections::HashSet;
use std::net::TcpListener;

use super::error::{ProcessError, ProcessResult};

/// Whether `port` can be bound on the loopback interface right now.
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port))
        .and_then(|listener| listener.local_addr())
        .is_ok()
}

/// First port at or above `base` that no active record holds and that binds.
pub fn allocate_port(base: u16, in_use: &HashSet<u16>) -> ProcessResult<u16> {
    allocate_port_with(base, in_use, is_port_available)
}

/// [`allocate_port`] with an injectable availability probe.
pub fn allocate_port_with<F>(base: u16, in_use: &HashSet<u16>, available: F) -> ProcessResult<u16>
where
    F: Fn(u16) -> bool,
{
    for port in base..=u16::MAX {
        if in_use.contains(&port) {
            continue;
        }
        if available(port) {
            tracing::debug!(port, "allocated port");
            return Ok(port);
        }
        tracing::trace!(port, "port busy, skipping");
    }

    Err(ProcessError::PortUnavailable(format!(
        "no free port at or above {}",
        base
    )))
}
