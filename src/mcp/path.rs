// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! PATH computation for spawned server processes.
//!
//! GUI-launched hosts often inherit a minimal PATH, so children get the
//! command's own directory, the current PATH, and the usual user and system
//! bin directories, deduplicated in that order.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Effective PATH for a child running `command`.
pub fn effective_path(command: &str) -> OsString {
    let current = std::env::var_os("PATH");
    let entries = path_entries(command, current.as_deref(), dirs::home_dir().as_deref());
    std::env::join_paths(&entries).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not join PATH entries; inheriting PATH");
        current.unwrap_or_default()
    })
}

/// Ordered, deduplicated PATH entries.
pub fn path_entries(
    command: &str,
    current_path: Option<&std::ffi::OsStr>,
    home: Option<&Path>,
) -> Vec<PathBuf> {
    let mut entries = Vec::new();

    let command_path = Path::new(command);
    if command_path.components().count() > 1 {
        if let Some(parent) = command_path.parent() {
            if !parent.as_os_str().is_empty() {
                entries.push(parent.to_path_buf());
            }
        }
    }

    if let Some(current) = current_path {
        entries.extend(std::env::split_paths(current).filter(|p| !p.as_os_str().is_empty()));
    }

    if let Some(home) = home {
        entries.push(home.join(".cargo").join("bin"));
        entries.push(home.join(".local").join("bin"));
    }

    #[cfg(unix)]
    {
        entries.push(PathBuf::from("/usr/local/bin"));
        entries.push(PathBuf::from("/usr/bin"));
        entries.push(PathBuf::from("/bin"));
    }

    #[cfg(target_os = "macos")]
    entries.push(PathBuf::from("/opt/homebrew/bin"));

    let mut seen = HashSet::new();
    entries.retain(|entry| seen.insert(entry.clone()));
    entries
}
