// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the Arc runtime.
//!
//! Each instrumentation concern gets its own `thiserror` enum. None of these
//! ever reach the caller of an intercepted function: the engine logs them and
//! carries on. `anyhow` is used for setup paths.

use thiserror::Error;

/// Errors raised by a pattern registry lookup.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid rule {rule}: {message}")]
    InvalidRule { rule: String, message: String },

    #[error("Rule file error: {0}")]
    RuleFile(String),

    #[error("Registry lookup failed: {0}")]
    Lookup(String),
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        Self::RuleFile(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::RuleFile(err.to_string())
    }
}

impl From<serde_yaml::Error> for RegistryError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::RuleFile(err.to_string())
    }
}

/// Errors raised by the telemetry transport or the tracing backend.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Telemetry queue full, event {0} dropped")]
    QueueFull(String),

    #[error("Telemetry transport closed")]
    Closed,

    #[error("Tracing backend unavailable: {0}")]
    SpanUnavailable(String),

    #[error("Collector stream failed: {0}")]
    Stream(String),

    #[error("Collector rejected batch: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Check if this error means the event never left the process.
    pub fn is_drop(&self) -> bool {
        matches!(self, Self::QueueFull(_) | Self::Closed)
    }
}

/// Errors raised by provider adapters and the bundled HTTP clients.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("API error: {message}")]
    ApiError {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Response parsing error: {0}")]
    ParseError(String),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl AdapterError {
    /// Create an API error with status code.
    pub fn api(message: impl Into<String>, status_code: u16) -> Self {
        Self::ApiError {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::NetworkError(_) | Self::Timeout(_)
        )
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
