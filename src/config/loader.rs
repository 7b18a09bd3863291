// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in the workspace
//! or the user's home directory. Loading never writes.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::HostConfig;

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[".toolhost.json", ".toolhost/config.json", "toolhost.yaml"];

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".toolhost";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR).join(GLOBAL_CONFIG_FILE))
}

/// First workspace config file that exists under `workspace_root`.
pub fn find_workspace_config(workspace_root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|filename| workspace_root.join(filename))
        .find(|path| path.exists())
}

/// Load the workspace config, falling back to the global one.
///
/// Returns the default configuration when neither exists.
pub fn load_config(workspace_root: &Path) -> Result<HostConfig, ConfigError> {
    let path = find_workspace_config(workspace_root)
        .or_else(|| get_global_config_path().filter(|path| path.exists()));

    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            load_config_file(&path)
        }
        None => Ok(HostConfig::default()),
    }
}

/// Load a configuration file (JSON or YAML by extension).
pub fn load_config_file(path: &Path) -> Result<HostConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let config: HostConfig = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content)?,
        _ => serde_json::from_str(&content)?,
    };
    config.validate()?;
    Ok(config)
}
