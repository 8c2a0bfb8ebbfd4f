// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry transport: spans, metric observations and finished events.
//!
//! The engine talks to a [`TelemetryTransport`] only. Two implementations
//! ship with the crate:
//!
//! - [`StreamingTransport`]: bounded queue drained by a [`Shipper`] task
//!   that batches events into client streams through a [`CollectorClient`]
//! - [`MemoryTransport`]: keeps events in memory, for tests and local runs

mod collector;
mod grpc;
mod memory;
mod streaming;

pub use collector::{CollectorClient, LoggingCollector, MemoryCollector, StreamAck};
pub use grpc::{encode_event, proto, GrpcCollector, STREAM_TELEMETRY_PATH};
pub use memory::MemoryTransport;
pub use streaming::{Shipper, ShipperConfig, ShipperHandle, ShipperStats, StreamingTransport};

use crate::error::TransportError;
use crate::event::TelemetryEvent;
use crate::response::LlmResponse;
use crate::telemetry::{LlmSpan, MetricsSink, SpanRequest};
use crate::types::FixDescriptor;

/// Sink for everything the engine observes about a call.
///
/// `record` must not block: delivery happens asynchronously and is best
/// effort.
pub trait TelemetryTransport: Send + Sync {
    /// Open the span covering one intercepted call.
    fn trace_llm_request(&self, request: &SpanRequest<'_>) -> Result<LlmSpan, TransportError> {
        Ok(LlmSpan::open(request))
    }

    /// Annotate the span with the registry decision.
    fn record_arc_intervention(
        &self,
        span: &LlmSpan,
        matched: bool,
        fix: Option<&FixDescriptor>,
        interception_latency_ms: f64,
    ) {
        span.record_intervention(matched, fix, interception_latency_ms);
    }

    /// Annotate the span with the response summary.
    fn record_llm_response(&self, span: &LlmSpan, response: &dyn LlmResponse, latency_ms: f64) {
        span.record_response(response, latency_ms);
    }

    /// Counter and histogram sink.
    fn metrics(&self) -> &dyn MetricsSink;

    /// Queue a finished event for delivery.
    fn record(&self, event: TelemetryEvent) -> Result<(), TransportError>;
}

impl<T: TelemetryTransport + ?Sized> TelemetryTransport for std::sync::Arc<T> {
    fn trace_llm_request(&self, request: &SpanRequest<'_>) -> Result<LlmSpan, TransportError> {
        (**self).trace_llm_request(request)
    }

    fn record_arc_intervention(
        &self,
        span: &LlmSpan,
        matched: bool,
        fix: Option<&FixDescriptor>,
        interception_latency_ms: f64,
    ) {
        (**self).record_arc_intervention(span, matched, fix, interception_latency_ms)
    }

    fn record_llm_response(&self, span: &LlmSpan, response: &dyn LlmResponse, latency_ms: f64) {
        (**self).record_llm_response(span, response, latency_ms)
    }

    fn metrics(&self) -> &dyn MetricsSink {
        (**self).metrics()
    }

    fn record(&self, event: TelemetryEvent) -> Result<(), TransportError> {
        (**self).record(event)
    }
}
