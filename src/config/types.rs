// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration types.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::mcp::ServerConfig;
use crate::orchestrate::OrchestratorSettings;

/// Host configuration as read from a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Tool servers the host can connect to.
    pub servers: Vec<ServerConfig>,

    /// Local process orchestration settings.
    pub orchestrator: OrchestratorSettings,
}

impl HostConfig {
    /// Servers with `enabled` set, in file order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|server| server.enabled)
    }

    /// Look up a server by id.
    pub fn server(&self, id: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|server| server.id == id)
    }

    /// Reject duplicate server ids.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::DuplicateServer(server.id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::Transport;

    #[test]
    fn test_parse_mixed_servers() {
        let config: HostConfig = serde_json::from_str(
            r#"{
                "servers": [
                    {"id": "fs", "command": "mcp-fs", "args": ["/tmp"]},
                    {"id": "weather", "port": 3105},
                    {"id": "remote", "url": "https://mcp.example.com/v1", "enabled": false}
                ],
                "orchestrator": {"base_port": 4100}
            }"#,
        )
        .unwrap();

        assert_eq!(config.servers.len(), 3);
        assert!(matches!(config.servers[0].transport, Transport::Stdio { .. }));
        assert_eq!(config.servers[1].transport_kind(), "http");
        assert_eq!(config.orchestrator.base_port, 4100);
        assert_eq!(config.orchestrator.max_restarts, 3);

        let enabled: Vec<&str> = config.enabled_servers().map(|s| s.id.as_str()).collect();
        assert_eq!(enabled, vec!["fs", "weather"]);
        assert!(config.server("remote").is_some());
        assert!(config.server("missing").is_none());
    }

    #[test]
    fn test_empty_config_defaults() {
        let config: HostConfig = serde_json::from_str("{}").unwrap();
        assert!(config.servers.is_empty());
        assert_eq!(config.orchestrator, OrchestratorSettings::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let config = HostConfig {
            servers: vec![ServerConfig::stdio("fs", "a"), ServerConfig::stdio("fs", "b")],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateServer(id)) if id == "fs"
        ));
    }
}
