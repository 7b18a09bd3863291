// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transport-independent client surface.
//!
//! [`ToolClient`] is what the connection manager talks to; the stdio and HTTP
//! clients implement it on top of the shared handshake and capability
//! discovery in this module.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::config::{ServerConfig, Transport};
use super::error::{McpError, McpResult};
use super::events::{EventBus, HostEvent};
use super::http::HttpToolClient;
use super::stdio::StdioToolClient;
use super::types::{
    initialize_params, parse_list, ConnectionState, InitializeResult, PromptDescriptor,
    ResourceDescriptor, ToolDescriptor,
};

/// A connection to one tool server.
///
/// All methods take `&self`; implementations keep their mutable state behind
/// interior locks so one client can be shared across tasks.
#[async_trait]
pub trait ToolClient: Send + Sync {
    /// Id of the server this client talks to.
    fn server_id(&self) -> &str;

    /// Current connection state.
    async fn state(&self) -> ConnectionState;

    /// Open the transport, handshake and discover capabilities.
    async fn connect(&self) -> McpResult<()>;

    /// Tear down the transport. A no-op when already disconnected.
    async fn disconnect(&self);

    /// Invoke a tool and return the result's `content`.
    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Value>;

    /// Tools discovered on the last refresh.
    async fn tools(&self) -> Vec<ToolDescriptor>;

    /// Resources discovered on the last refresh.
    async fn resources(&self) -> Vec<ResourceDescriptor>;

    /// Prompts discovered on the last refresh.
    async fn prompts(&self) -> Vec<PromptDescriptor>;

    /// Re-list tools, resources and prompts.
    async fn refresh_capabilities(&self) -> McpResult<()>;

    /// `resources/read` for one URI.
    async fn read_resource(&self, uri: &str) -> McpResult<Value>;

    /// `prompts/get` with the given arguments.
    async fn get_prompt(&self, name: &str, arguments: Value) -> McpResult<Value>;
}

/// Creates clients for the connection manager.
pub trait ClientFactory: Send + Sync {
    fn create(&self, config: &ServerConfig, events: EventBus<HostEvent>) -> Arc<dyn ToolClient>;
}

/// Picks the client type from the config's transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClientFactory;

impl ClientFactory for DefaultClientFactory {
    fn create(&self, config: &ServerConfig, events: EventBus<HostEvent>) -> Arc<dyn ToolClient> {
        match &config.transport {
            Transport::Stdio { .. } => Arc::new(StdioToolClient::new(config.clone(), events)),
            Transport::Http { .. } => Arc::new(HttpToolClient::new(config.clone(), events)),
        }
    }
}

/// One request/notification channel to a server.
#[async_trait]
pub(crate) trait Rpc: Send + Sync {
    async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value>;
    async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()>;
}

/// Capability sets, replaced wholesale on refresh.
#[derive(Debug, Clone, Default)]
pub(crate) struct Catalog {
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
    pub prompts: Vec<PromptDescriptor>,
}

/// State and catalog shared by both client types.
pub(crate) struct ClientCore {
    server_id: String,
    events: EventBus<HostEvent>,
    state: RwLock<ConnectionState>,
    catalog: RwLock<Catalog>,
    server_info: RwLock<Option<InitializeResult>>,
}

impl ClientCore {
    pub fn new(server_id: impl Into<String>, events: EventBus<HostEvent>) -> Self {
        Self {
            server_id: server_id.into(),
            events,
            state: RwLock::new(ConnectionState::Disconnected),
            catalog: RwLock::new(Catalog::default()),
            server_info: RwLock::new(None),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn events(&self) -> &EventBus<HostEvent> {
        &self.events
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
        self.events
            .emit(&HostEvent::state_changed(&self.server_id, state));
    }

    /// Disconnect with nothing attached: a failed client still resets, an
    /// already disconnected one stays quiet.
    pub async fn settle_disconnected(&self) {
        if self.state().await != ConnectionState::Disconnected {
            self.clear_catalog().await;
            self.set_state(ConnectionState::Disconnected).await;
        }
    }

    /// Move to `Error` and broadcast the message.
    pub async fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(server_id = %self.server_id, error = %message, "tool server error");
        *self.state.write().await = ConnectionState::Error;
        self.events.emit(&HostEvent::errored(&self.server_id, message));
    }

    pub async fn set_server_info(&self, info: InitializeResult) {
        tracing::debug!(
            server_id = %self.server_id,
            server_name = %info.server_info.name,
            server_version = %info.server_info.version,
            "handshake complete"
        );
        *self.server_info.write().await = Some(info);
    }

    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.read().await.clone()
    }

    pub async fn replace_catalog(&self, catalog: Catalog) {
        let tools = catalog.tools.clone();
        *self.catalog.write().await = catalog;
        self.events.emit(&HostEvent::ToolsChanged {
            server_id: self.server_id.clone(),
            tools,
        });
    }

    /// Drop all capability sets; announces the empty tool set if it changed.
    pub async fn clear_catalog(&self) {
        let had_tools = {
            let mut catalog = self.catalog.write().await;
            let had_tools = !catalog.tools.is_empty();
            *catalog = Catalog::default();
            had_tools
        };
        *self.server_info.write().await = None;
        if had_tools {
            self.events.emit(&HostEvent::ToolsChanged {
                server_id: self.server_id.clone(),
                tools: Vec::new(),
            });
        }
    }

    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.catalog.read().await.tools.clone()
    }

    pub async fn resources(&self) -> Vec<ResourceDescriptor> {
        self.catalog.read().await.resources.clone()
    }

    pub async fn prompts(&self) -> Vec<PromptDescriptor> {
        self.catalog.read().await.prompts.clone()
    }
}

/// `initialize` round trip followed by `notifications/initialized`.
pub(crate) async fn handshake(rpc: &dyn Rpc, server_id: &str) -> McpResult<InitializeResult> {
    let result = rpc
        .request("initialize", Some(initialize_params()))
        .await
        .map_err(|e| McpError::handshake_failed(server_id, e.to_string()))?;

    let init: InitializeResult = serde_json::from_value(result)
        .map_err(|e| McpError::handshake_failed(server_id, e.to_string()))?;

    rpc.notify("notifications/initialized", None)
        .await
        .map_err(|e| McpError::handshake_failed(server_id, e.to_string()))?;

    Ok(init)
}

/// List tools, resources and prompts concurrently and store the result.
///
/// A failed listing yields an empty set for that kind only.
pub(crate) async fn discover(rpc: &dyn Rpc, core: &ClientCore) {
    let server_id = core.server_id();
    let (tools, resources, prompts) = tokio::join!(
        list_capability::<ToolDescriptor>(rpc, server_id, "tools/list", "tools"),
        list_capability::<ResourceDescriptor>(rpc, server_id, "resources/list", "resources"),
        list_capability::<PromptDescriptor>(rpc, server_id, "prompts/list", "prompts"),
    );

    tracing::debug!(
        server_id,
        tools = tools.len(),
        resources = resources.len(),
        prompts = prompts.len(),
        "capabilities discovered"
    );

    core.replace_catalog(Catalog {
        tools,
        resources,
        prompts,
    })
    .await;
}

async fn list_capability<T: serde::de::DeserializeOwned>(
    rpc: &dyn Rpc,
    server_id: &str,
    method: &str,
    field: &str,
) -> Vec<T> {
    let listed = rpc
        .request(method, None)
        .await
        .and_then(|result| parse_list(&result, field).map_err(McpError::from));

    match listed {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(server_id, method, error = %e, "capability listing failed");
            Vec::new()
        }
    }
}
