// Copyright 2026 Muvon Un Limited
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the system-wide storage directory for Octostudy
/// Following XDG Base Directory specification on Unix-like systems
/// and proper conventions on other systems
pub fn get_system_storage_dir() -> Result<PathBuf> {
    let base_dir = if cfg!(target_os = "macos") {
        // macOS: ~/.local/share/octostudy
        dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
            .join(".local")
            .join("share")
            .join("octostudy")
    } else if cfg!(target_os = "windows") {
        // Windows: %APPDATA%/octostudy
        dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine data directory"))?
            .join("octostudy")
    } else {
        // Linux and other Unix-like: ~/.local/share/octostudy or $XDG_DATA_HOME/octostudy
        if let Ok(xdg_data_home) = std::env::var("XDG_DATA_HOME") {
            PathBuf::from(xdg_data_home).join("octostudy")
        } else {
            dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
                .join(".local")
                .join("share")
                .join("octostudy")
        }
    };

    // Create directory if it doesn't exist
    if !base_dir.exists() {
        fs::create_dir_all(&base_dir)?;
    }

    Ok(base_dir)
}

/// Get the system config file path
/// Stored directly under ~/.local/share/octostudy/ on all systems
pub fn get_system_config_path() -> Result<PathBuf> {
    let system_dir = get_system_storage_dir()?;
    Ok(system_dir.join("config.toml"))
}

/// Ensure an output directory exists and return it
pub fn ensure_output_dir(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(path.to_path_buf())
}

/// Make a name safe to use as a file stem: forbidden characters become
/// underscores, underscore runs collapse, leading/trailing `_` and `.`
/// are trimmed and the result is capped at 100 characters.
pub fn clean_filename(name: &str) -> String {
    let mut replaced = String::with_capacity(name.len());
    for c in name.trim().chars() {
        match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => replaced.push('_'),
            c if c.is_control() => replaced.push('_'),
            c => replaced.push(c),
        }
    }

    let mut collapsed = String::with_capacity(replaced.len());
    let mut previous_underscore = false;
    for c in replaced.chars() {
        if c == '_' {
            if !previous_underscore {
                collapsed.push('_');
            }
            previous_underscore = true;
        } else {
            collapsed.push(c);
            previous_underscore = false;
        }
    }

    let trimmed = collapsed.trim_matches(|c| c == '_' || c == '.');
    let capped: String = trimmed.chars().take(100).collect();

    if capped.is_empty() {
        "untitled".to_string()
    } else {
        capped
    }
}
