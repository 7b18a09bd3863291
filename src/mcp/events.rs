// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed publish/subscribe for host-facing events.
//!
//! Handlers run synchronously on the emitting task. A panicking handler is
//! caught and logged; the remaining handlers still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;

use super::types::{ConnectionState, ToolDescriptor};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct BusInner<E> {
    handlers: RwLock<HashMap<u64, Handler<E>>>,
    next_id: AtomicU64,
}

/// Cloneable event bus; all clones share one subscriber table.
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<E: 'static> EventBus<E> {
    /// Register a handler. Dropping the returned [`Subscription`] keeps the
    /// handler registered; call [`Subscription::unsubscribe`] to remove it.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(handler));

        let weak = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .handlers
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&id);
                }
            })),
        }
    }

    /// Deliver an event to every current handler.
    pub fn emit(&self, event: &E) {
        // Snapshot so handlers may subscribe/unsubscribe without deadlocking.
        let handlers: Vec<(u64, Handler<E>)> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect();

        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(subscription = id, "event handler panicked");
            }
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the handler. Later emits no longer reach it.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Events raised by tool clients and the connection manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// A server's connection state changed.
    StateChanged {
        server_id: String,
        state: ConnectionState,
        error: Option<String>,
    },

    /// A server's tool set was replaced.
    ToolsChanged {
        server_id: String,
        tools: Vec<ToolDescriptor>,
    },

    /// A server sent a notification.
    Notification {
        server_id: String,
        method: String,
        params: Option<Value>,
    },
}

impl HostEvent {
    pub fn state_changed(server_id: impl Into<String>, state: ConnectionState) -> Self {
        Self::StateChanged {
            server_id: server_id.into(),
            state,
            error: None,
        }
    }

    pub fn errored(server_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StateChanged {
            server_id: server_id.into(),
            state: ConnectionState::Error,
            error: Some(message.into()),
        }
    }

    /// Server the event is about.
    pub fn server_id(&self) -> &str {
        match self {
            Self::StateChanged { server_id, .. }
            | Self::ToolsChanged { server_id, .. }
            | Self::Notification { server_id, .. } => server_id,
        }
    }
}
