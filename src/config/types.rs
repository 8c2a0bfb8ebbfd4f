// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`FileConfig`] is what a config file may contain (every field optional),
//! [`RuntimeConfig`] is the fully resolved result.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default collector endpoint.
pub const DEFAULT_ENDPOINT: &str = "localhost:50051";

/// Default telemetry queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default events per collector stream.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default flush interval in milliseconds.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;

/// Runtime configuration as written in `arc.json`, `arc.yaml` or
/// `.arc/config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    /// Turn interception on or off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Application identifier reported on every event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,

    /// Telemetry collector address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush_interval_ms: Option<u64>,

    /// Rule file (JSON or YAML) loaded into the pattern registry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patterns_file: Option<PathBuf>,

    /// Default log level (trace, debug, info, warn, error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub enabled: bool,
    pub application_id: Option<String>,
    pub endpoint: String,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub patterns_file: Option<PathBuf>,
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            application_id: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            patterns_file: None,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.enabled);
        assert_eq!(config.endpoint, "localhost:50051");
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_file_config_camel_case() {
        let config: FileConfig = serde_json::from_str(
            r#"{"applicationId": "bot", "flushIntervalMs": 250, "patternsFile": "rules.yaml"}"#,
        )
        .unwrap();
        assert_eq!(config.application_id.as_deref(), Some("bot"));
        assert_eq!(config.flush_interval_ms, Some(250));
        assert_eq!(config.patterns_file, Some(PathBuf::from("rules.yaml")));
        assert!(config.enabled.is_none());
    }

    #[test]
    fn test_file_config_skips_unset() {
        let json = serde_json::to_string(&FileConfig {
            batch_size: Some(5),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json, r#"{"batchSize":5}"#);
    }
}
