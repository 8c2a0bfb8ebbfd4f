// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Log subscriber setup for host applications.
//!
//! The runtime only emits `tracing` events; installing a subscriber is up to
//! the host. [`init_telemetry`] is a convenience for hosts that have none.

use std::io;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::RuntimeConfig;

/// Configuration for the log subscriber.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Default log level if RUST_LOG is not set.
    pub default_level: Level,

    /// Log a line when each `llm_request` span closes, with its fields.
    pub log_span_close: bool,

    /// Whether to include file/line information.
    pub include_file_line: bool,

    /// Whether to use ANSI colors in output.
    pub ansi_colors: bool,

    /// Custom filter directive (overrides default_level and RUST_LOG).
    pub filter_directive: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            log_span_close: false,
            include_file_line: false,
            ansi_colors: true,
            filter_directive: None,
        }
    }
}

impl TelemetryConfig {
    /// Verbose output, including a line per closed call span.
    pub fn development() -> Self {
        Self {
            default_level: Level::DEBUG,
            log_span_close: true,
            include_file_line: true,
            ansi_colors: true,
            filter_directive: None,
        }
    }

    /// Warnings only: dropped telemetry and instrumentation failures.
    pub fn production() -> Self {
        Self {
            default_level: Level::WARN,
            log_span_close: false,
            include_file_line: false,
            ansi_colors: false,
            filter_directive: None,
        }
    }

    /// Trace-level output scoped to this crate.
    pub fn testing() -> Self {
        Self {
            default_level: Level::TRACE,
            log_span_close: true,
            include_file_line: true,
            ansi_colors: false,
            filter_directive: Some("arc_runtime=trace".to_string()),
        }
    }

    /// Derive from the runtime configuration's `log_level`.
    ///
    /// Unknown level names fall back to `info`.
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        let level = Level::from_str(&config.log_level).unwrap_or(Level::INFO);
        Self::default().with_level(level)
    }

    /// Set the default log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Set a custom filter directive.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_directive = Some(filter.into());
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi_colors = ansi;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.default_level.to_string());
        match &self.filter_directive {
            Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Install a global fmt subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<()> {
    let span_events = if config.log_span_close {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_ansi(config.ansi_colors)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events);

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_level, Level::INFO);
        assert!(!config.log_span_close);
    }

    #[test]
    fn test_telemetry_config_presets() {
        assert_eq!(TelemetryConfig::development().default_level, Level::DEBUG);
        assert_eq!(TelemetryConfig::production().default_level, Level::WARN);
        assert_eq!(
            TelemetryConfig::testing().filter_directive.as_deref(),
            Some("arc_runtime=trace")
        );
    }

    #[test]
    fn test_from_runtime_level() {
        let mut runtime = RuntimeConfig::default();
        runtime.log_level = "debug".to_string();
        assert_eq!(TelemetryConfig::from_runtime(&runtime).default_level, Level::DEBUG);

        runtime.log_level = "loud".to_string();
        assert_eq!(TelemetryConfig::from_runtime(&runtime).default_level, Level::INFO);
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::default()
            .with_level(Level::DEBUG)
            .with_filter("arc_runtime=trace")
            .with_ansi(false);

        assert_eq!(config.default_level, Level::DEBUG);
        assert_eq!(config.filter_directive, Some("arc_runtime=trace".to_string()));
        assert!(!config.ansi_colors);
    }

    #[test]
    fn test_init_twice_fails() {
        let config = TelemetryConfig::testing();
        let _ = init_telemetry(&config);
        assert!(init_telemetry(&config).is_err());
    }
}
