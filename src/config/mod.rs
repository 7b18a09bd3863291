// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for toolhost.
//!
//! Reads the server list and orchestrator settings from the first of:
//! - Workspace config: .toolhost.json, .toolhost/config.json, or toolhost.yaml
//! - Global config: ~/.toolhost/config.json

mod loader;
mod types;

pub use loader::{
    find_workspace_config, get_global_config_path, load_config, load_config_file, CONFIG_FILES,
    GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE,
};

pub use types::HostConfig;
