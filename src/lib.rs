// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Arc runtime - interception and telemetry for LLM provider calls.
//!
//! Wraps outbound calls to model providers, matches their parameters against
//! a pattern registry, rewrites problematic requests before they are sent,
//! and streams one telemetry event per call to a collector. Instrumentation
//! never changes what the wrapped call returns.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Request parameters, call arguments, fixes and agent metadata
//! - [`response`] - The [`LlmResponse`] contract used to read provider responses
//! - [`error`] - Error types and result aliases
//! - [`config`] - Configuration loading and merging
//! - [`context`] - Multi-agent pipeline context and its scoped propagation
//! - [`registry`] - Pattern registry trait and the rule-based registry
//! - [`engine`] - The interceptor itself
//! - [`event`] - Telemetry event construction and truncation
//! - [`transport`] - Telemetry transports and the collector shipper
//! - [`adapters`] - OpenAI and Anthropic adapters and clients
//! - [`telemetry`] - Tracing spans, metrics and log subscriber setup
//! - [`runtime`] - Bootstrapping a configured interceptor
//!
//! # Example
//!
//! ```rust,ignore
//! use arc_runtime::{ArcRuntime, OpenAiAdapter, OpenAiClient, ChatCompletions, CallArgs};
//!
//! let runtime = ArcRuntime::init(Path::new("."))?;
//! let client = runtime
//!     .interceptor()
//!     .protect(OpenAiClient::from_env()?, Arc::new(OpenAiAdapter), "chat.completions.create")?;
//!
//! let completion = client.create(CallArgs::from_json(request)).await?;
//! runtime.shutdown().await?;
//! ```

pub mod adapters;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod event;
pub mod registry;
pub mod response;
pub mod runtime;
pub mod telemetry;
pub mod transport;
pub mod types;

// Re-export commonly used types at crate root
pub use adapters::{
    AnthropicAdapter, AnthropicClient, ChatCompletions, GenericAdapter, OpenAiAdapter,
    OpenAiClient, Protected, ProviderAdapter,
};
pub use config::{load_config, RuntimeConfig};
pub use context::{
    AgentActivityRecord, AmbientContext, ContextHandle, PipelineContext, ScopedContext,
};
pub use engine::{CallSite, InterceptOptions, Interceptor, InterceptorConfig};
pub use error::{AdapterError, ConfigError, RegistryError, Result, TransportError};
pub use event::TelemetryEvent;
pub use registry::{NoopRegistry, PatternRegistry, PatternRule, RuleRegistry};
pub use response::LlmResponse;
pub use runtime::ArcRuntime;
pub use transport::{
    CollectorClient, GrpcCollector, LoggingCollector, MemoryTransport, StreamingTransport,
    TelemetryTransport,
};
pub use types::{
    AgentMetadata, CallArgs, FixDescriptor, PatternMatch, RequestParameters, TokenUsage,
    ToolCallInfo,
};

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
