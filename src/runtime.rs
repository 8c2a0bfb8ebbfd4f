// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Runtime bootstrap.
//!
//! [`ArcRuntime`] wires a [`RuntimeConfig`] into a ready interceptor: the
//! rule registry from `patterns_file`, a [`StreamingTransport`] with its
//! shipper task, and the process metrics.
//!
//! ```rust,ignore
//! let config = arc_runtime::config::load_config(Path::new("."))?;
//! let runtime = ArcRuntime::from_config(&config, Arc::new(GrpcCollector::new(&config.endpoint)?))?;
//! let client = runtime.interceptor().protect(OpenAiClient::from_env()?, Arc::new(OpenAiAdapter), "chat.completions.create")?;
//! // ...
//! runtime.shutdown().await?;
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::{load_config, RuntimeConfig};
use crate::engine::{Interceptor, InterceptorConfig};
use crate::error::Result;
use crate::registry::{NoopRegistry, PatternRegistry, RuleRegistry};
use crate::telemetry::{Metrics, GLOBAL_METRICS};
use crate::transport::{
    CollectorClient, GrpcCollector, ShipperConfig, ShipperHandle, ShipperStats,
    StreamingTransport, TelemetryTransport,
};

/// A configured interceptor plus the background shipper feeding the collector.
pub struct ArcRuntime {
    config: RuntimeConfig,
    interceptor: Arc<Interceptor>,
    transport: Arc<StreamingTransport>,
    shipper: ShipperHandle,
    metrics: Arc<Metrics>,
}

impl ArcRuntime {
    /// Build from a resolved configuration, reporting into [`GLOBAL_METRICS`].
    ///
    /// Must be called inside a tokio runtime; the shipper is spawned on it.
    pub fn from_config(config: &RuntimeConfig, client: Arc<dyn CollectorClient>) -> Result<Self> {
        Self::with_metrics(config, client, Arc::clone(&GLOBAL_METRICS))
    }

    /// Build with a private metrics registry.
    pub fn with_metrics(
        config: &RuntimeConfig,
        client: Arc<dyn CollectorClient>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let registry = load_registry(config)?;

        let (transport, shipper) = StreamingTransport::spawn(
            ShipperConfig::from_runtime(config),
            client,
            Arc::clone(&metrics),
        );
        let transport = Arc::new(transport);

        let interceptor = Interceptor::new(
            registry,
            Arc::clone(&transport) as Arc<dyn TelemetryTransport>,
        )
        .with_config(InterceptorConfig::from_runtime(config));

        info!(
            enabled = config.enabled,
            endpoint = %config.endpoint,
            application_id = config.application_id.as_deref().unwrap_or(""),
            "Arc runtime started"
        );

        Ok(Self {
            config: config.clone(),
            interceptor: Arc::new(interceptor),
            transport,
            shipper,
            metrics,
        })
    }

    /// Load configuration for `workspace_root` and ship to the gRPC collector
    /// at the configured endpoint.
    pub fn init(workspace_root: &Path) -> Result<Self> {
        let config = load_config(workspace_root).context("Failed to load arc configuration")?;
        let client = GrpcCollector::new(&config.endpoint)
            .with_context(|| format!("Invalid collector endpoint {}", config.endpoint))?;
        Self::from_config(&config, Arc::new(client))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    pub fn transport(&self) -> &Arc<StreamingTransport> {
        &self.transport
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Stop the shipper after a final flush of everything already queued.
    pub async fn shutdown(self) -> Result<ShipperStats> {
        let stats = self
            .shipper
            .shutdown()
            .await
            .context("Telemetry shipper did not shut down cleanly")?;

        info!(
            events_shipped = stats.events_shipped,
            events_failed = stats.events_failed,
            "Arc runtime stopped"
        );
        Ok(stats)
    }
}

fn load_registry(config: &RuntimeConfig) -> Result<Arc<dyn PatternRegistry>> {
    match &config.patterns_file {
        Some(path) => {
            let registry = RuleRegistry::from_file(path)
                .with_context(|| format!("Failed to load pattern rules from {}", path.display()))?;
            info!(path = %path.display(), rules = registry.len(), "Pattern rules loaded");
            Ok(Arc::new(registry))
        }
        None => Ok(Arc::new(NoopRegistry)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::OpenAiAdapter;
    use crate::engine::{CallSite, InterceptOptions};
    use crate::telemetry::metrics::names;
    use crate::transport::MemoryCollector;
    use crate::types::CallArgs;
    use serde_json::{json, Value};
    use std::convert::Infallible;
    use tempfile::TempDir;

    fn config_with_rules(dir: &TempDir) -> RuntimeConfig {
        let path = dir.path().join("rules.yaml");
        std::fs::write(
            &path,
            "rules:\n  - name: hot\n    when:\n      temperature: { gt: 0.9 }\n    fix:\n      temperature: 0.5\n",
        )
        .unwrap();
        RuntimeConfig {
            application_id: Some("support-bot".to_string()),
            patterns_file: Some(path),
            ..RuntimeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_runtime_applies_rules_and_ships() {
        let dir = TempDir::new().unwrap();
        let config = config_with_rules(&dir);
        let collector = Arc::new(MemoryCollector::new());
        let metrics = Arc::new(Metrics::new());

        let runtime = ArcRuntime::with_metrics(&config, collector.clone(), Arc::clone(&metrics)).unwrap();

        let adapter = OpenAiAdapter;
        let site = CallSite::new(&adapter, "chat.completions.create");
        let args = CallArgs::from_json(json!({"model": "gpt-4.1", "temperature": 1.2}));
        let sent: std::result::Result<Value, Infallible> = runtime.interceptor().intercept(
            site,
            args,
            &InterceptOptions::default(),
            |args| Ok(args.kwarg("temperature").cloned().unwrap_or(Value::Null)),
        );
        assert_eq!(sent.unwrap(), json!(0.5));

        let stats = runtime.shutdown().await.unwrap();
        assert_eq!(stats.events_shipped, 1);

        let events = collector.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].pattern_matched);
        assert_eq!(events[0].application_id, "support-bot");
        assert_eq!(metrics.counter(names::FIXES_APPLIED), 1);
    }

    #[tokio::test]
    async fn test_runtime_without_rules_uses_noop_registry() {
        let collector = Arc::new(MemoryCollector::new());
        let runtime = ArcRuntime::with_metrics(
            &RuntimeConfig::default(),
            collector,
            Arc::new(Metrics::new()),
        )
        .unwrap();
        assert!(runtime.interceptor().is_enabled());
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_init_ships_to_configured_endpoint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("arc.json"), r#"{"endpoint": "127.0.0.1:1"}"#).unwrap();

        let runtime = ArcRuntime::init(dir.path()).unwrap();
        assert_eq!(runtime.config().endpoint, "127.0.0.1:1");

        let adapter = OpenAiAdapter;
        let sent: std::result::Result<Value, Infallible> = runtime.interceptor().intercept(
            CallSite::new(&adapter, "chat.completions.create"),
            CallArgs::from_json(json!({"model": "gpt-4.1"})),
            &InterceptOptions::default(),
            |_| Ok(json!({"id": "r1"})),
        );
        assert_eq!(sent.unwrap(), json!({"id": "r1"}));

        let stats = runtime.shutdown().await.unwrap();
        assert_eq!(stats.events_shipped, 0);
        assert_eq!(stats.events_failed, 1);
    }

    #[tokio::test]
    async fn test_missing_rule_file_is_error() {
        let config = RuntimeConfig {
            patterns_file: Some("/nonexistent/arc-rules.yaml".into()),
            ..RuntimeConfig::default()
        };
        let result = ArcRuntime::with_metrics(
            &config,
            Arc::new(MemoryCollector::new()),
            Arc::new(Metrics::new()),
        );
        assert!(result.is_err());
    }
}
