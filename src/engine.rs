// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Interception engine.
//!
//! [`Interceptor`] wraps one outbound call: it normalizes the arguments,
//! asks the registry for a fix, forwards the (possibly fixed) arguments to
//! the real callable, and reports what happened to the transport and the
//! ambient pipeline context.
//!
//! The callable's result is returned as-is. Every instrumentation step runs
//! isolated: an error or panic in the registry, span backend, metrics or
//! transport is logged, counted under `arc_instrumentation_errors_total`,
//! and skipped.
//!
//! ```rust,ignore
//! let interceptor = Arc::new(Interceptor::new(registry, transport));
//! let create = interceptor.wrap(Arc::new(OpenAiAdapter), "chat.completions.create", send)?;
//! let response = create(CallArgs::from_json(request))?;
//! ```

use std::any::Any;
use std::error::Error as StdError;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn, Instrument};

use crate::adapters::{ChatCompletions, ProviderAdapter, Protected};
use crate::config::RuntimeConfig;
use crate::context::{
    AgentActivityRecord, AmbientContext, ContextHandle, PipelineContext, ScopedContext,
    AGENT_TYPE_LLM,
};
use crate::error::AdapterError;
use crate::event::{
    build_event, emit, CallOutcome, ContextSnapshot, FailureInfo, InterceptionRecord,
};
use crate::registry::PatternRegistry;
use crate::response::LlmResponse;
use crate::telemetry::metrics::names;
use crate::telemetry::{LlmSpan, RequestId, SpanRequest};
use crate::transport::TelemetryTransport;
use crate::types::{AgentMetadata, CallArgs, FixDescriptor, PatternMatch, RequestParameters};

/// Engine switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorConfig {
    /// When false, calls are forwarded untouched: no matching, no telemetry.
    pub enabled: bool,
    /// Reported on events made outside any pipeline context.
    pub application_id: Option<String>,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            application_id: None,
        }
    }
}

impl InterceptorConfig {
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        Self {
            enabled: config.enabled,
            application_id: config.application_id.clone(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct InterceptOptions {
    /// Explicit agent attribution; wins over anything found in the context.
    pub agent: Option<AgentMetadata>,
    /// Explicit pipeline context; wins over the ambient lookup.
    pub context: Option<ContextHandle>,
}

impl InterceptOptions {
    pub fn with_agent(mut self, agent: AgentMetadata) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_context(mut self, context: ContextHandle) -> Self {
        self.context = Some(context);
        self
    }
}

/// The call site being intercepted.
#[derive(Clone, Copy)]
pub struct CallSite<'a> {
    pub adapter: &'a dyn ProviderAdapter,
    pub method: &'a str,
}

impl<'a> CallSite<'a> {
    pub fn new(adapter: &'a dyn ProviderAdapter, method: &'a str) -> Self {
        Self { adapter, method }
    }

    pub fn provider(&self) -> &'a str {
        self.adapter.provider()
    }
}

/// State carried from call entry to call completion.
struct Prepared<'a> {
    site: CallSite<'a>,
    request_id: RequestId,
    started_at: DateTime<Utc>,
    start: Instant,
    params: RequestParameters,
    pattern_match: Option<PatternMatch>,
    interception_latency: Duration,
    context: Option<ContextHandle>,
    snapshot: ContextSnapshot,
    span: Option<LlmSpan>,
}

impl Prepared<'_> {
    fn fix(&self) -> Option<&FixDescriptor> {
        self.pattern_match
            .as_ref()
            .map(|m| &m.fix)
            .filter(|fix| !fix.is_empty())
    }
}

/// Wraps outbound LLM calls with pattern matching and telemetry.
pub struct Interceptor {
    registry: Arc<dyn PatternRegistry>,
    transport: Arc<dyn TelemetryTransport>,
    context: Arc<dyn AmbientContext>,
    config: InterceptorConfig,
}

impl Interceptor {
    /// Interceptor using [`ScopedContext`] for ambient pipeline lookup.
    pub fn new(registry: Arc<dyn PatternRegistry>, transport: Arc<dyn TelemetryTransport>) -> Self {
        Self {
            registry,
            transport,
            context: Arc::new(ScopedContext),
            config: InterceptorConfig::default(),
        }
    }

    /// Replace the ambient context source.
    pub fn with_ambient(mut self, context: Arc<dyn AmbientContext>) -> Self {
        self.context = context;
        self
    }

    pub fn with_config(mut self, config: InterceptorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn transport(&self) -> &Arc<dyn TelemetryTransport> {
        &self.transport
    }

    /// Intercept one synchronous call.
    ///
    /// `f` receives the arguments to send (fixed when a pattern matched) and
    /// its result is returned unchanged.
    pub fn intercept<R, E, F>(
        &self,
        site: CallSite<'_>,
        args: CallArgs,
        options: &InterceptOptions,
        f: F,
    ) -> Result<R, E>
    where
        F: FnOnce(CallArgs) -> Result<R, E>,
        R: LlmResponse,
        E: StdError + 'static,
    {
        if !self.config.enabled {
            return f(args);
        }

        let (prepared, args) = self.prepare(site, args, options);
        let result = match prepared.span.as_ref() {
            Some(span) => span.span().in_scope(|| f(args)),
            None => f(args),
        };
        self.complete(prepared, &result);
        result
    }

    /// Intercept one asynchronous call.
    pub async fn intercept_async<R, E, F, Fut>(
        &self,
        site: CallSite<'_>,
        args: CallArgs,
        options: &InterceptOptions,
        f: F,
    ) -> Result<R, E>
    where
        F: FnOnce(CallArgs) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: LlmResponse,
        E: StdError + 'static,
    {
        if !self.config.enabled {
            return f(args).await;
        }

        let (prepared, args) = self.prepare(site, args, options);
        let call = f(args);
        let result = match prepared.span.as_ref() {
            Some(span) => call.instrument(span.span().clone()).await,
            None => call.await,
        };
        self.complete(prepared, &result);
        result
    }

    /// Wrap a callable so every invocation goes through [`intercept`](Self::intercept).
    ///
    /// Fails when the adapter does not bind `method`.
    pub fn wrap<R, E, F>(
        self: &Arc<Self>,
        adapter: Arc<dyn ProviderAdapter>,
        method: impl Into<String>,
        f: F,
    ) -> Result<impl Fn(CallArgs) -> Result<R, E>, AdapterError>
    where
        F: Fn(CallArgs) -> Result<R, E>,
        R: LlmResponse,
        E: StdError + 'static,
    {
        let method = bound_method(adapter.as_ref(), method.into())?;
        let interceptor = Arc::clone(self);
        let options = InterceptOptions::default();

        Ok(move |args: CallArgs| {
            let site = CallSite::new(adapter.as_ref(), &method);
            interceptor.intercept(site, args, &options, &f)
        })
    }

    /// Wrap a client object so its `create` goes through [`intercept_async`](Self::intercept_async).
    pub fn protect<C: ChatCompletions>(
        self: &Arc<Self>,
        client: C,
        adapter: Arc<dyn ProviderAdapter>,
        method: impl Into<String>,
    ) -> Result<Protected<C>, AdapterError> {
        let method = bound_method(adapter.as_ref(), method.into())?;
        Ok(Protected::new(client, Arc::clone(self), adapter, method))
    }

    fn prepare<'a>(
        &self,
        site: CallSite<'a>,
        args: CallArgs,
        options: &InterceptOptions,
    ) -> (Prepared<'a>, CallArgs) {
        let start = Instant::now();
        let started_at = Utc::now();
        let request_id = RequestId::new();

        let params = self
            .isolate("extract_params", || site.adapter.extract_params(&args))
            .unwrap_or_else(|| args.kwargs.clone());

        let context = options.context.clone().or_else(|| {
            self.isolate("context_lookup", || self.context.current_context())
                .flatten()
        });
        let agent_name =
            resolve_agent_name(options.agent.as_ref(), &args.kwargs, context.as_deref());
        let snapshot = ContextSnapshot {
            pipeline_id: context.as_ref().map(|ctx| ctx.pipeline_id().to_string()),
            application_id: context
                .as_ref()
                .and_then(|ctx| ctx.application_id().map(str::to_string))
                .or_else(|| self.config.application_id.clone()),
            agent_name,
        };

        let span_request = SpanRequest {
            request_id: &request_id,
            provider: site.provider(),
            method: site.method,
            params: &params,
            agent_name: snapshot.agent_name.as_deref(),
            pipeline_id: snapshot.pipeline_id.as_deref(),
        };
        let span = match self.isolate("trace_llm_request", || {
            self.transport.trace_llm_request(&span_request)
        }) {
            Some(Ok(span)) => Some(span),
            Some(Err(err)) => {
                self.instrumentation_failed("trace_llm_request", &err.to_string());
                None
            }
            None => None,
        };

        let interception_start = Instant::now();
        let pattern_match = match self.isolate("pattern_match", || self.registry.match_params(&params)) {
            Some(Ok(found)) => found,
            Some(Err(err)) => {
                self.instrumentation_failed("pattern_match", &err.to_string());
                None
            }
            None => None,
        };

        let args = match pattern_match.as_ref().filter(|m| !m.fix.is_empty()) {
            Some(found) => {
                info!(
                    request_id = %request_id,
                    provider = site.provider(),
                    pattern = found.pattern.as_deref().unwrap_or(""),
                    fix = %found.fix,
                    "Applied fix to intercepted request"
                );
                args.with_fix(&found.fix)
            }
            None => args,
        };
        let interception_latency = interception_start.elapsed();

        let prepared = Prepared {
            site,
            request_id,
            started_at,
            start,
            params,
            pattern_match,
            interception_latency,
            context,
            snapshot,
            span,
        };

        if let Some(span) = prepared.span.as_ref() {
            let matched = prepared.pattern_match.is_some();
            let fix = prepared.fix();
            let latency_ms = as_ms(interception_latency);
            self.isolate("record_arc_intervention", || {
                self.transport
                    .record_arc_intervention(span, matched, fix, latency_ms)
            });
        }

        (prepared, args)
    }

    fn complete<R, E>(&self, mut prepared: Prepared<'_>, result: &Result<R, E>)
    where
        R: LlmResponse,
        E: StdError + 'static,
    {
        let latency = prepared.start.elapsed();
        let latency_ms = as_ms(latency);
        let interception_ms = as_ms(prepared.interception_latency);
        let matched = prepared.pattern_match.is_some();
        let fix_applied = prepared.fix().is_some();
        let span = prepared.span.take();

        let outcome = match result {
            Ok(response) => {
                if let Some(span) = span {
                    self.isolate("record_llm_response", || {
                        self.transport.record_llm_response(&span, response, latency_ms)
                    });
                    self.isolate("finish_span", || span.finish_ok());
                }
                self.isolate("metrics", || {
                    let metrics = self.transport.metrics();
                    metrics.increment(names::REQUESTS_INTERCEPTED);
                    if matched {
                        metrics.increment(names::PATTERN_MATCHES);
                    }
                    if fix_applied {
                        metrics.increment(names::FIXES_APPLIED);
                    }
                    metrics.record_histogram(names::INTERCEPTION_LATENCY_MS, interception_ms);
                    metrics.record_histogram(names::REQUEST_LATENCY_MS, latency_ms);
                });
                CallOutcome::Success(response)
            }
            Err(err) => {
                let failure = FailureInfo::from_error(err);
                if let Some(span) = span {
                    self.isolate("record_error", || {
                        span.finish_err(&failure.kind, &failure.message)
                    });
                }
                self.isolate("metrics", || {
                    let metrics = self.transport.metrics();
                    metrics.increment(names::REQUESTS_FAILED);
                    metrics.record_histogram(names::REQUEST_LATENCY_MS, latency_ms);
                });
                CallOutcome::Failure(failure)
            }
        };
        let success = outcome.is_success();

        if let Some(context) = prepared.context.as_ref() {
            let record = AgentActivityRecord {
                name: prepared.snapshot.agent_name.clone(),
                agent_type: AGENT_TYPE_LLM.to_string(),
                provider: prepared.site.provider().to_string(),
                method: prepared.site.method.to_string(),
                pattern_matched: matched,
                fix_applied: prepared.fix().cloned(),
                latency_ms,
                timestamp: prepared.started_at,
                success,
            };
            self.isolate("append_agent_activity", || {
                context.append_agent_activity(record)
            });
        }

        debug!(
            request_id = %prepared.request_id,
            provider = prepared.site.provider(),
            method = prepared.site.method,
            success,
            latency_ms,
            "Intercepted call complete"
        );

        let Prepared {
            site,
            request_id,
            started_at,
            params,
            pattern_match,
            interception_latency,
            snapshot,
            ..
        } = prepared;
        let record = InterceptionRecord {
            request_id,
            provider: site.provider(),
            method: site.method,
            started_at,
            latency,
            interception_latency,
            request_params: params,
            pattern_match,
            outcome,
        };
        let transport = self.transport.as_ref();
        self.isolate("emit_event", || emit(transport, build_event(record, &snapshot)));
    }

    /// Run one instrumentation step, containing any panic it raises.
    fn isolate<T>(&self, stage: &'static str, f: impl FnOnce() -> T) -> Option<T> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Some(value),
            Err(payload) => {
                self.instrumentation_failed(stage, &panic_message(payload.as_ref()));
                None
            }
        }
    }

    fn instrumentation_failed(&self, stage: &'static str, error: &str) {
        warn!(stage, error, "Instrumentation step failed, continuing without it");
        let _ = panic::catch_unwind(AssertUnwindSafe(|| {
            self.transport
                .metrics()
                .increment(names::INSTRUMENTATION_ERRORS)
        }));
    }
}

fn bound_method(adapter: &dyn ProviderAdapter, method: String) -> Result<String, AdapterError> {
    if adapter.binds(&method) {
        Ok(method)
    } else {
        Err(AdapterError::UnsupportedMethod(format!(
            "{}.{}",
            adapter.provider(),
            method
        )))
    }
}

/// Agent attribution, most explicit source first: caller metadata, then
/// `metadata.agent_name` in the call's keyword arguments, then the
/// pipeline's current agent. The last two only apply inside a pipeline.
fn resolve_agent_name(
    agent: Option<&AgentMetadata>,
    kwargs: &RequestParameters,
    context: Option<&PipelineContext>,
) -> Option<String> {
    if let Some(name) = agent.and_then(|meta| meta.agent_name.clone()) {
        return Some(name);
    }
    let context = context?;
    kwargs
        .get("metadata")
        .and_then(|meta| meta.get("agent_name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| context.current_agent())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

fn as_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{GenericAdapter, OpenAiAdapter};
    use crate::context::{FixedContext, PipelineContext};
    use crate::error::RegistryError;
    use crate::registry::{MockPatternRegistry, NoopRegistry};
    use crate::transport::MemoryTransport;
    use serde_json::json;
    use std::sync::Mutex;

    fn args() -> CallArgs {
        CallArgs::from_json(json!({
            "model": "gpt-x",
            "temperature": 0.9,
            "messages": [{"role": "user", "content": "hello"}]
        }))
    }

    fn interceptor_with(registry: Arc<dyn PatternRegistry>) -> (Arc<Interceptor>, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let interceptor = Interceptor::new(registry, transport.clone())
            .with_ambient(Arc::new(FixedContext::none()));
        (Arc::new(interceptor), transport)
    }

    fn ok_response() -> Value {
        json!({"id": "r1", "choices": [{"finish_reason": "stop", "message": {"content": "hi"}}]})
    }

    #[test]
    fn test_no_match_forwards_identical_args() {
        let (interceptor, transport) = interceptor_with(Arc::new(NoopRegistry));
        let original = args();
        let seen = Mutex::new(None);

        let result: Result<Value, AdapterError> = interceptor.intercept(
            CallSite::new(&OpenAiAdapter, "chat.completions.create"),
            original.clone(),
            &InterceptOptions::default(),
            |forwarded| {
                *seen.lock().unwrap() = Some(forwarded);
                Ok(ok_response())
            },
        );

        assert_eq!(result.unwrap(), ok_response());
        assert_eq!(seen.into_inner().unwrap(), Some(original));

        let events = transport.events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].pattern_matched);
        assert!(events[0].fix_applied.is_none());
        assert_eq!(events[0].llm_interaction.user_input, "hello");
        assert!(events[0].is_success());
    }

    #[test]
    fn test_fix_applied_and_counted() {
        let mut registry = MockPatternRegistry::new();
        registry.expect_match_params().returning(|_| {
            Ok(Some(PatternMatch::named(
                "hot",
                FixDescriptor::new().with("temperature", 0),
            )))
        });
        let (interceptor, transport) = interceptor_with(Arc::new(registry));
        let seen = Mutex::new(None);

        let result: Result<Value, AdapterError> = interceptor.intercept(
            CallSite::new(&OpenAiAdapter, "chat.completions.create"),
            args(),
            &InterceptOptions::default(),
            |forwarded| {
                *seen.lock().unwrap() = Some(forwarded);
                Ok(ok_response())
            },
        );
        assert!(result.is_ok());

        let forwarded = seen.into_inner().unwrap().unwrap();
        assert_eq!(forwarded.kwarg("temperature"), Some(&json!(0)));
        assert_eq!(forwarded.kwarg("model"), Some(&json!("gpt-x")));

        let event = &transport.events()[0];
        assert!(event.pattern_matched);
        assert_eq!(event.fix_applied, Some(FixDescriptor::new().with("temperature", 0)));
        // The recorded request is what the caller sent.
        assert_eq!(event.llm_interaction.request_body.get("temperature"), Some(&json!(0.9)));

        let metrics = transport.registry();
        assert_eq!(metrics.counter(names::REQUESTS_INTERCEPTED), 1);
        assert_eq!(metrics.counter(names::PATTERN_MATCHES), 1);
        assert_eq!(metrics.counter(names::FIXES_APPLIED), 1);
        assert_eq!(
            metrics.histogram(names::INTERCEPTION_LATENCY_MS).unwrap().count(),
            1
        );
    }

    #[test]
    fn test_error_propagates_unchanged() {
        let (interceptor, transport) = interceptor_with(Arc::new(NoopRegistry));

        let result: Result<Value, AdapterError> = interceptor.intercept(
            CallSite::new(&OpenAiAdapter, "chat.completions.create"),
            args(),
            &InterceptOptions::default(),
            |_| Err(AdapterError::Timeout(30_000)),
        );

        assert!(matches!(result, Err(AdapterError::Timeout(30_000))));
        let event = &transport.events()[0];
        assert!(!event.is_success());
        assert!(event.llm_interaction.response_body.is_none());
        let info = event.error_info.as_ref().unwrap();
        assert_eq!(info.error_type, "AdapterError::Timeout");
        assert_eq!(info.error_message, "Timeout after 30000ms");
        assert_eq!(transport.registry().counter(names::REQUESTS_FAILED), 1);
        assert_eq!(transport.registry().counter(names::REQUESTS_INTERCEPTED), 0);
    }

    #[test]
    fn test_registry_error_is_no_match() {
        let mut registry = MockPatternRegistry::new();
        registry
            .expect_match_params()
            .returning(|_| Err(RegistryError::Unavailable("down".to_string())));
        let (interceptor, transport) = interceptor_with(Arc::new(registry));

        let result: Result<Value, AdapterError> = interceptor.intercept(
            CallSite::new(&OpenAiAdapter, "chat.completions.create"),
            args(),
            &InterceptOptions::default(),
            |_| Ok(ok_response()),
        );

        assert!(result.is_ok());
        assert!(!transport.events()[0].pattern_matched);
        assert_eq!(transport.registry().counter(names::INSTRUMENTATION_ERRORS), 1);
    }

    #[test]
    fn test_registry_panic_is_contained() {
        struct Exploding;
        impl PatternRegistry for Exploding {
            fn match_params(
                &self,
                _params: &RequestParameters,
            ) -> Result<Option<PatternMatch>, RegistryError> {
                panic!("registry exploded")
            }
        }

        let (interceptor, transport) = interceptor_with(Arc::new(Exploding));
        let mut called = false;

        let result: Result<Value, AdapterError> = interceptor.intercept(
            CallSite::new(&OpenAiAdapter, "chat.completions.create"),
            args(),
            &InterceptOptions::default(),
            |_| {
                called = true;
                Ok(ok_response())
            },
        );

        assert!(result.is_ok());
        assert!(called);
        assert_eq!(transport.len(), 1);
        assert_eq!(transport.registry().counter(names::INSTRUMENTATION_ERRORS), 1);
    }

    #[test]
    fn test_transport_failure_does_not_reach_caller() {
        let (interceptor, transport) = interceptor_with(Arc::new(NoopRegistry));
        transport.set_unavailable(true);

        let result: Result<Value, AdapterError> = interceptor.intercept(
            CallSite::new(&OpenAiAdapter, "chat.completions.create"),
            args(),
            &InterceptOptions::default(),
            |_| Ok(ok_response()),
        );

        assert_eq!(result.unwrap(), ok_response());
        assert_eq!(transport.registry().counter(names::TELEMETRY_DROPPED), 1);
    }

    #[derive(Clone, Default)]
    struct StatusLog(Arc<Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for StatusLog {
        fn on_record(
            &self,
            _id: &tracing::span::Id,
            values: &tracing::span::Record<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            values.record(&mut StatusVisitor(&self.0));
        }
    }

    struct StatusVisitor<'a>(&'a Mutex<Vec<String>>);

    impl tracing::field::Visit for StatusVisitor<'_> {
        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            if field.name() == "status" {
                self.0.lock().unwrap().push(value.to_string());
            }
        }

        fn record_debug(&mut self, _field: &tracing::field::Field, _value: &dyn std::fmt::Debug) {}
    }

    /// Transport whose response annotation always panics.
    struct BrokenAnnotations(MemoryTransport);

    impl TelemetryTransport for BrokenAnnotations {
        fn record_llm_response(&self, _span: &LlmSpan, _response: &dyn LlmResponse, _latency_ms: f64) {
            panic!("annotation failed");
        }

        fn metrics(&self) -> &dyn crate::telemetry::MetricsSink {
            self.0.metrics()
        }

        fn record(&self, event: crate::event::TelemetryEvent) -> Result<(), crate::error::TransportError> {
            self.0.record(event)
        }
    }

    #[test]
    fn test_span_closes_ok_when_response_annotation_panics() {
        use tracing_subscriber::layer::SubscriberExt;

        let transport = Arc::new(BrokenAnnotations(MemoryTransport::new()));
        let interceptor = Interceptor::new(Arc::new(NoopRegistry), transport.clone())
            .with_ambient(Arc::new(FixedContext::none()));
        let statuses = StatusLog::default();
        let subscriber = tracing_subscriber::registry().with(statuses.clone());

        let result: Result<Value, AdapterError> = tracing::subscriber::with_default(subscriber, || {
            interceptor.intercept(
                CallSite::new(&OpenAiAdapter, "chat.completions.create"),
                args(),
                &InterceptOptions::default(),
                |_| Ok(ok_response()),
            )
        });

        assert_eq!(result.unwrap(), ok_response());
        assert_eq!(transport.0.len(), 1);
        assert!(transport.0.events()[0].is_success());
        assert_eq!(transport.0.registry().counter(names::INSTRUMENTATION_ERRORS), 1);
        assert_eq!(*statuses.0.lock().unwrap(), vec!["ok".to_string()]);
    }

    #[test]
    fn test_disabled_forwards_untouched() {
        let mut registry = MockPatternRegistry::new();
        registry.expect_match_params().never();
        let transport = Arc::new(MemoryTransport::new());
        let interceptor = Interceptor::new(Arc::new(registry), transport.clone())
            .with_config(InterceptorConfig::disabled());
        let original = args();

        let result: Result<Value, AdapterError> = interceptor.intercept(
            CallSite::new(&OpenAiAdapter, "chat.completions.create"),
            original.clone(),
            &InterceptOptions::default(),
            |forwarded| {
                assert_eq!(forwarded, original);
                Ok(ok_response())
            },
        );

        assert!(result.is_ok());
        assert!(transport.is_empty());
        assert_eq!(transport.registry().counter(names::REQUESTS_INTERCEPTED), 0);
    }

    #[test]
    fn test_context_records_activity() {
        let ctx = PipelineContext::new("pipe-7")
            .with_application_id("support-bot")
            .with_current_agent("router")
            .into_handle();
        let transport = Arc::new(MemoryTransport::new());
        let interceptor = Interceptor::new(Arc::new(NoopRegistry), transport.clone())
            .with_ambient(Arc::new(FixedContext::new(ctx.clone())));
        let site = CallSite::new(&OpenAiAdapter, "chat.completions.create");

        let _: Result<Value, AdapterError> =
            interceptor.intercept(site, args(), &InterceptOptions::default(), |_| Ok(ok_response()));
        let _: Result<Value, AdapterError> = interceptor.intercept(
            site,
            args(),
            &InterceptOptions::default(),
            |_| Err(AdapterError::NetworkError("reset".to_string())),
        );

        let agents = ctx.agents();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].name.as_deref(), Some("router"));
        assert_eq!(agents[0].agent_type, AGENT_TYPE_LLM);
        assert!(agents[0].success);
        assert!(!agents[1].success);

        let events = transport.events();
        assert_eq!(events[0].pipeline_id, "pipe-7");
        assert_eq!(events[0].application_id, "support-bot");
        assert_eq!(events[0].agent_name, "router");
    }

    #[test]
    fn test_agent_name_precedence() {
        let ctx = PipelineContext::new("p").with_current_agent("ambient");
        let kwargs = RequestParameters::new().with("metadata", json!({"agent_name": "from-kwargs"}));
        let explicit = AgentMetadata::named("explicit");

        assert_eq!(
            resolve_agent_name(Some(&explicit), &kwargs, Some(&ctx)).as_deref(),
            Some("explicit")
        );
        assert_eq!(
            resolve_agent_name(None, &kwargs, Some(&ctx)).as_deref(),
            Some("from-kwargs")
        );
        assert_eq!(
            resolve_agent_name(None, &RequestParameters::new(), Some(&ctx)).as_deref(),
            Some("ambient")
        );
        // Outside a pipeline only explicit metadata counts.
        assert_eq!(resolve_agent_name(None, &kwargs, None), None);
        assert_eq!(
            resolve_agent_name(Some(&explicit), &kwargs, None).as_deref(),
            Some("explicit")
        );
    }

    #[test]
    fn test_wrap_rejects_unbound_method() {
        let (interceptor, _) = interceptor_with(Arc::new(NoopRegistry));
        let wrapped = interceptor.wrap(Arc::new(OpenAiAdapter), "messages.create", |_args: CallArgs| {
            Ok::<Value, AdapterError>(ok_response())
        });
        assert!(matches!(wrapped, Err(AdapterError::UnsupportedMethod(_))));
    }

    #[test]
    fn test_wrap_intercepts_every_call() {
        let (interceptor, transport) = interceptor_with(Arc::new(NoopRegistry));
        let create = interceptor
            .wrap(Arc::new(GenericAdapter::new("mistral")), "chat.complete", |_args: CallArgs| {
                Ok::<Value, AdapterError>(ok_response())
            })
            .unwrap();

        create(args()).unwrap();
        create(args()).unwrap();

        let events = transport.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].llm_interaction.provider, "mistral");
        assert_eq!(events[1].metadata["method"], "chat.complete");
        assert_ne!(events[0].request_id, events[1].request_id);
    }

    #[tokio::test]
    async fn test_intercept_async_with_scoped_context() {
        let transport = Arc::new(MemoryTransport::new());
        let interceptor = Interceptor::new(Arc::new(NoopRegistry), transport.clone());
        let ctx = PipelineContext::new("async-pipe").into_handle();

        let result: Result<Value, AdapterError> = ScopedContext::scope(ctx.clone(), async {
            interceptor
                .intercept_async(
                    CallSite::new(&OpenAiAdapter, "chat.completions.create"),
                    args(),
                    &InterceptOptions::default().with_agent(AgentMetadata::named("writer")),
                    |_| async { Ok(ok_response()) },
                )
                .await
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(ctx.agent_count(), 1);
        assert_eq!(transport.events()[0].pipeline_id, "async-pipe");
        assert_eq!(transport.events()[0].agent_name, "writer");
    }
}
