// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Precedence, lowest to highest: defaults, global file, workspace file,
//! `ARC_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

use super::types::{FileConfig, RuntimeConfig};

/// Environment variable overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    /// `ARC_DISABLE`: any of `1`, `true`, `yes`, `on` turns interception off.
    pub disable: Option<bool>,
    pub application_id: Option<String>,
    pub endpoint: Option<String>,
    pub queue_capacity: Option<String>,
    pub batch_size: Option<String>,
    pub flush_interval_ms: Option<String>,
    pub patterns_file: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl EnvOverrides {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Read overrides from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut overrides = Self::default();
        for (key, value) in vars {
            let value = value.into();
            match key.as_ref() {
                "ARC_DISABLE" => overrides.disable = Some(is_truthy(&value)),
                "ARC_APPLICATION_ID" => overrides.application_id = Some(value),
                "ARC_ENDPOINT" => overrides.endpoint = Some(value),
                "ARC_QUEUE_CAPACITY" => overrides.queue_capacity = Some(value),
                "ARC_BATCH_SIZE" => overrides.batch_size = Some(value),
                "ARC_FLUSH_INTERVAL_MS" => overrides.flush_interval_ms = Some(value),
                "ARC_PATTERNS_FILE" => overrides.patterns_file = Some(PathBuf::from(value)),
                "ARC_LOG_LEVEL" => overrides.log_level = Some(value),
                _ => {}
            }
        }
        overrides
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Merge all sources into a validated [`RuntimeConfig`].
pub fn merge_config(
    global: Option<FileConfig>,
    workspace: Option<FileConfig>,
    env: EnvOverrides,
) -> Result<RuntimeConfig, ConfigError> {
    let mut result = RuntimeConfig::default();

    if let Some(config) = global {
        apply_file_config(&mut result, config);
    }

    if let Some(config) = workspace {
        apply_file_config(&mut result, config);
    }

    apply_env_overrides(&mut result, env)?;
    validate(&result)?;

    Ok(result)
}

fn apply_file_config(result: &mut RuntimeConfig, config: FileConfig) {
    if let Some(enabled) = config.enabled {
        result.enabled = enabled;
    }

    if config.application_id.is_some() {
        result.application_id = config.application_id;
    }

    if let Some(endpoint) = config.endpoint {
        result.endpoint = endpoint;
    }

    if let Some(capacity) = config.queue_capacity {
        result.queue_capacity = capacity;
    }

    if let Some(batch_size) = config.batch_size {
        result.batch_size = batch_size;
    }

    if let Some(ms) = config.flush_interval_ms {
        result.flush_interval = Duration::from_millis(ms);
    }

    if config.patterns_file.is_some() {
        result.patterns_file = config.patterns_file;
    }

    if let Some(level) = config.log_level {
        result.log_level = level;
    }
}

fn apply_env_overrides(result: &mut RuntimeConfig, env: EnvOverrides) -> Result<(), ConfigError> {
    if let Some(disable) = env.disable {
        result.enabled = !disable;
    }

    if env.application_id.is_some() {
        result.application_id = env.application_id;
    }

    if let Some(endpoint) = env.endpoint {
        result.endpoint = endpoint;
    }

    if let Some(raw) = env.queue_capacity {
        result.queue_capacity = parse_number("ARC_QUEUE_CAPACITY", &raw)?;
    }

    if let Some(raw) = env.batch_size {
        result.batch_size = parse_number("ARC_BATCH_SIZE", &raw)?;
    }

    if let Some(raw) = env.flush_interval_ms {
        result.flush_interval = Duration::from_millis(parse_number("ARC_FLUSH_INTERVAL_MS", &raw)?);
    }

    if env.patterns_file.is_some() {
        result.patterns_file = env.patterns_file;
    }

    if let Some(level) = env.log_level {
        result.log_level = level;
    }

    Ok(())
}

fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("expected a non-negative integer, got {raw:?}"),
    })
}

fn validate(config: &RuntimeConfig) -> Result<(), ConfigError> {
    let positive = [
        ("queueCapacity", config.queue_capacity as u128),
        ("batchSize", config.batch_size as u128),
        ("flushIntervalMs", config.flush_interval.as_millis()),
    ];
    for (field, value) in positive {
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
    }

    if config.endpoint.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "endpoint".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    Ok(())
}
