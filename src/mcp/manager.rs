// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Registry of tool clients keyed by server id.
//!
//! Concurrent `connect` calls for the same id share one in-flight attempt, so
//! only one client is ever created per attempt. Disconnecting removes the
//! client from the registry; failed connects stay registered in `Error`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::RwLock;

use super::client::{ClientFactory, DefaultClientFactory, ToolClient};
use super::config::ServerConfig;
use super::error::{McpError, McpResult};
use super::events::{EventBus, HostEvent, Subscription};
use super::types::{ConnectionState, ServerTool, ToolDescriptor};

type InFlight = Shared<BoxFuture<'static, McpResult<()>>>;

struct ManagerInner {
    clients: RwLock<HashMap<String, Arc<dyn ToolClient>>>,
    in_flight: std::sync::Mutex<HashMap<String, InFlight>>,
    factory: Arc<dyn ClientFactory>,
    events: EventBus<HostEvent>,
}

/// Manager for multiple tool server connections.
#[derive(Clone)]
pub struct ToolConnectionManager {
    inner: Arc<ManagerInner>,
}

impl Default for ToolConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolConnectionManager").finish_non_exhaustive()
    }
}

impl ToolConnectionManager {
    /// Create a manager that builds stdio and HTTP clients.
    pub fn new() -> Self {
        Self::with_factory(Arc::new(DefaultClientFactory))
    }

    /// Create a manager with a custom client factory.
    pub fn with_factory(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                clients: RwLock::new(HashMap::new()),
                in_flight: std::sync::Mutex::new(HashMap::new()),
                factory,
                events: EventBus::new(),
            }),
        }
    }

    /// Connect (or reconnect) a server.
    ///
    /// If a connect for the same id is already running, this waits for it and
    /// returns its outcome instead of starting another.
    pub async fn connect(&self, config: ServerConfig) -> McpResult<()> {
        let id = config.id.clone();

        let attempt = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match in_flight.get(&id) {
                Some(existing) => {
                    tracing::debug!(server_id = %id, "joining in-flight connect");
                    existing.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let attempt = async move {
                        let id = config.id.clone();
                        let result = inner.establish(config).await;
                        inner
                            .in_flight
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .remove(&id);
                        result
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(id.clone(), attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }

    /// Disconnect one server and drop it from the registry. Unknown ids are ignored.
    pub async fn disconnect(&self, server_id: &str) {
        let client = self.inner.clients.write().await.remove(server_id);
        if let Some(client) = client {
            client.disconnect().await;
        }
    }

    /// Disconnect every server concurrently and empty the registry.
    pub async fn disconnect_all(&self) {
        let clients: Vec<_> = self
            .inner
            .clients
            .write()
            .await
            .drain()
            .map(|(_, client)| client)
            .collect();
        join_all(clients.iter().map(|client| client.disconnect())).await;
    }

    /// Call a tool on one server and return the result's `content`.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> McpResult<Value> {
        self.require(server_id)
            .await?
            .call_tool(tool_name, arguments)
            .await
    }

    /// Tools discovered on a server.
    pub async fn list_tools(&self, server_id: &str) -> McpResult<Vec<ToolDescriptor>> {
        Ok(self.require(server_id).await?.tools().await)
    }

    /// Re-list a server's capabilities and return its tools.
    pub async fn refresh(&self, server_id: &str) -> McpResult<Vec<ToolDescriptor>> {
        let client = self.require(server_id).await?;
        client.refresh_capabilities().await?;
        Ok(client.tools().await)
    }

    /// Read a resource from one server.
    pub async fn read_resource(&self, server_id: &str, uri: &str) -> McpResult<Value> {
        self.require(server_id).await?.read_resource(uri).await
    }

    /// Fetch a prompt from one server.
    pub async fn get_prompt(
        &self,
        server_id: &str,
        name: &str,
        arguments: Value,
    ) -> McpResult<Value> {
        self.require(server_id)
            .await?
            .get_prompt(name, arguments)
            .await
    }

    /// All tools across all servers, tagged with their server id.
    pub async fn get_all_tools(&self) -> Vec<ServerTool> {
        let mut clients: Vec<_> = self.inner.clients.read().await.values().cloned().collect();
        clients.sort_by(|a, b| a.server_id().cmp(b.server_id()));

        let mut all = Vec::new();
        for client in clients {
            let server_id = client.server_id().to_string();
            all.extend(client.tools().await.into_iter().map(|tool| ServerTool {
                server_id: server_id.clone(),
                tool,
            }));
        }
        all
    }

    /// Connection state per registered server.
    pub async fn connection_states(&self) -> HashMap<String, ConnectionState> {
        let clients: Vec<_> = self.inner.clients.read().await.values().cloned().collect();
        let mut states = HashMap::new();
        for client in clients {
            states.insert(client.server_id().to_string(), client.state().await);
        }
        states
    }

    /// Registered server ids, sorted.
    pub async fn server_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.clients.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Subscribe to state, tool-set and notification events from every client.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&HostEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    async fn client(&self, server_id: &str) -> Option<Arc<dyn ToolClient>> {
        self.inner.clients.read().await.get(server_id).cloned()
    }

    async fn require(&self, server_id: &str) -> McpResult<Arc<dyn ToolClient>> {
        self.client(server_id)
            .await
            .ok_or_else(|| McpError::NotConnected(server_id.to_string()))
    }
}

impl ManagerInner {
    async fn establish(&self, config: ServerConfig) -> McpResult<()> {
        let id = config.id.clone();

        let previous = self.clients.write().await.remove(&id);
        if let Some(previous) = previous {
            tracing::debug!(server_id = %id, "replacing existing client");
            previous.disconnect().await;
        }

        let client = self.factory.create(&config, self.events.clone());
        self.clients
            .write()
            .await
            .insert(id.clone(), Arc::clone(&client));

        tracing::info!(server_id = %id, transport = config.transport_kind(), "connecting");
        match client.connect().await {
            Ok(()) => {
                tracing::info!(server_id = %id, "connected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(server_id = %id, error = %e, "connect failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::{PromptDescriptor, ResourceDescriptor};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory client with one `echo` tool.
    struct FakeClient {
        id: String,
        state: std::sync::Mutex<ConnectionState>,
        events: EventBus<HostEvent>,
        fail: bool,
    }

    #[async_trait]
    impl ToolClient for FakeClient {
        fn server_id(&self) -> &str {
            &self.id
        }

        async fn state(&self) -> ConnectionState {
            *self.state.lock().unwrap()
        }

        async fn connect(&self) -> McpResult<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let next = if self.fail {
                ConnectionState::Error
            } else {
                ConnectionState::Connected
            };
            *self.state.lock().unwrap() = next;
            self.events.emit(&HostEvent::state_changed(&self.id, next));
            if self.fail {
                Err(McpError::spawn_failed(&self.id, "no such command"))
            } else {
                Ok(())
            }
        }

        async fn disconnect(&self) {
            *self.state.lock().unwrap() = ConnectionState::Disconnected;
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Value> {
            if *self.state.lock().unwrap() != ConnectionState::Connected {
                return Err(McpError::NotConnected(self.id.clone()));
            }
            Ok(json!([{"type": "text", "text": format!("{}:{}", name, arguments["text"].as_str().unwrap_or(""))}]))
        }

        async fn tools(&self) -> Vec<ToolDescriptor> {
            if *self.state.lock().unwrap() == ConnectionState::Connected {
                vec![ToolDescriptor::new("echo")]
            } else {
                Vec::new()
            }
        }

        async fn resources(&self) -> Vec<ResourceDescriptor> {
            Vec::new()
        }

        async fn prompts(&self) -> Vec<PromptDescriptor> {
            Vec::new()
        }

        async fn refresh_capabilities(&self) -> McpResult<()> {
            Ok(())
        }

        async fn read_resource(&self, uri: &str) -> McpResult<Value> {
            Ok(json!({"contents": [{"uri": uri}]}))
        }

        async fn get_prompt(&self, name: &str, _arguments: Value) -> McpResult<Value> {
            Ok(json!({"description": name}))
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
    }

    impl ClientFactory for CountingFactory {
        fn create(&self, config: &ServerConfig, events: EventBus<HostEvent>) -> Arc<dyn ToolClient> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Arc::new(FakeClient {
                id: config.id.clone(),
                state: std::sync::Mutex::new(ConnectionState::Disconnected),
                events,
                fail: config.name == "broken",
            })
        }
    }

    fn manager() -> (ToolConnectionManager, Arc<CountingFactory>) {
        let factory = Arc::new(CountingFactory::default());
        (ToolConnectionManager::with_factory(factory.clone()), factory)
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_attempt() {
        let (manager, factory) = manager();
        let config = ServerConfig::stdio("s1", "unused");

        let (a, b) = tokio::join!(manager.connect(config.clone()), manager.connect(config));
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(manager.server_ids().await, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_error() {
        let (manager, factory) = manager();
        let config = ServerConfig::stdio("s1", "unused").with_name("broken");

        let (a, b) = tokio::join!(manager.connect(config.clone()), manager.connect(config));
        assert_eq!(a.unwrap_err(), b.unwrap_err());
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(
            manager.connection_states().await.get("s1"),
            Some(&ConnectionState::Error)
        );
    }

    #[tokio::test]
    async fn test_sequential_connect_replaces_client() {
        let (manager, factory) = manager();
        manager.connect(ServerConfig::stdio("s1", "a")).await.unwrap();
        manager.connect(ServerConfig::stdio("s1", "b")).await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(manager.server_ids().await.len(), 1);
    }

    #[tokio::test]
    async fn test_routes_calls_by_server() {
        let (manager, _) = manager();
        manager.connect(ServerConfig::stdio("s1", "a")).await.unwrap();
        manager.connect(ServerConfig::stdio("s2", "b")).await.unwrap();

        let content = manager
            .call_tool("s2", "echo", json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(content[0]["text"], "echo:hi");

        let all = manager.get_all_tools().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].server_id, "s1");
        assert_eq!(all[1].server_id, "s2");

        assert_eq!(manager.refresh("s1").await.unwrap().len(), 1);
        assert!(manager.read_resource("s1", "file:///x").await.is_ok());
        assert!(manager.get_prompt("s1", "greet", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_server_not_connected() {
        let (manager, _) = manager();
        let err = manager.call_tool("nope", "echo", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "server not connected: nope");
        assert!(manager.list_tools("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_removes_client() {
        let (manager, _) = manager();
        manager.connect(ServerConfig::stdio("s1", "a")).await.unwrap();
        manager.connect(ServerConfig::stdio("s2", "b")).await.unwrap();

        manager.disconnect("s1").await;
        manager.disconnect("s1").await;
        manager.disconnect("unknown").await;

        assert_eq!(manager.server_ids().await, vec!["s2".to_string()]);
        assert!(!manager.connection_states().await.contains_key("s1"));
        assert!(manager.get_all_tools().await.iter().all(|t| t.server_id == "s2"));
        let err = manager.call_tool("s1", "echo", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "server not connected: s1");
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let (manager, _) = manager();
        manager.connect(ServerConfig::stdio("s1", "a")).await.unwrap();
        manager.connect(ServerConfig::stdio("s2", "b")).await.unwrap();

        manager.disconnect_all().await;
        assert!(manager.server_ids().await.is_empty());
        assert!(manager.connection_states().await.is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_client_events() {
        let (manager, _) = manager();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let sub = manager.subscribe(move |e| s.lock().unwrap().push(e.clone()));

        manager.connect(ServerConfig::stdio("s1", "a")).await.unwrap();
        sub.unsubscribe();
        manager.connect(ServerConfig::stdio("s2", "b")).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], HostEvent::state_changed("s1", ConnectionState::Connected));
    }
}
