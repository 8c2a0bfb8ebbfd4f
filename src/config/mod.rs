// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Runtime configuration.
//!
//! Configuration comes from several sources:
//! - Global config: ~/.arc/config.json
//! - Workspace config: arc.json, arc.yaml, arc.yml or .arc/config.json
//! - Environment: `ARC_DISABLE`, `ARC_APPLICATION_ID`, `ARC_ENDPOINT`,
//!   `ARC_QUEUE_CAPACITY`, `ARC_BATCH_SIZE`, `ARC_FLUSH_INTERVAL_MS`,
//!   `ARC_PATTERNS_FILE`, `ARC_LOG_LEVEL`
//!
//! Sources are merged with precedence (env > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, get_global_config_dir, get_global_config_path, load_config_file,
    load_global_config, load_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR,
    GLOBAL_CONFIG_FILE,
};

pub use merger::{merge_config, EnvOverrides};

pub use types::{
    FileConfig, RuntimeConfig, DEFAULT_BATCH_SIZE, DEFAULT_ENDPOINT, DEFAULT_FLUSH_INTERVAL_MS,
    DEFAULT_QUEUE_CAPACITY,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load and merge all configuration sources for a workspace.
pub fn load_config(workspace_root: &Path) -> Result<RuntimeConfig, ConfigError> {
    load_config_with_env(workspace_root, EnvOverrides::from_env())
}

/// Same as [`load_config`] with explicit environment overrides.
pub fn load_config_with_env(
    workspace_root: &Path,
    env: EnvOverrides,
) -> Result<RuntimeConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;

    merge_config(global, workspace, env)
}
