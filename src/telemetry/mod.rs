// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing, metrics, and request identifiers.
//!
//! - **Spans**: one `llm_request` span per intercepted call ([`LlmSpan`])
//! - **Metrics**: counters and histograms for interception overhead ([`Metrics`])
//! - **Request IDs**: joins spans, logs and telemetry events ([`RequestId`])
//!
//! Metric names are listed in [`metrics::names`].

mod init;
pub mod metrics;
mod request_id;
mod spans;

pub use init::{init_telemetry, TelemetryConfig};
pub use metrics::{Histogram, Metrics, MetricsSink, MetricsSnapshot, GLOBAL_METRICS};
pub use request_id::RequestId;
pub use spans::{LlmSpan, SpanRequest};
