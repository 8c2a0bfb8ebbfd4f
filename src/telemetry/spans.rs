// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scoped span for one intercepted LLM call.

use std::time::Instant;
use tracing::{debug, field::Empty, info_span, Span};

use crate::response::LlmResponse;
use crate::types::{FixDescriptor, RequestParameters};

use super::request_id::RequestId;

/// What the span is opened for.
#[derive(Debug, Clone, Copy)]
pub struct SpanRequest<'a> {
    pub request_id: &'a RequestId,
    pub provider: &'a str,
    pub method: &'a str,
    pub params: &'a RequestParameters,
    pub agent_name: Option<&'a str>,
    pub pipeline_id: Option<&'a str>,
}

/// RAII guard around the `llm_request` span.
///
/// Finalized exactly once: through [`finish_ok`](Self::finish_ok),
/// [`finish_err`](Self::finish_err), or on drop (status `aborted`) when the
/// wrapped call unwinds.
#[derive(Debug)]
pub struct LlmSpan {
    span: Span,
    start: Instant,
    finished: bool,
}

impl LlmSpan {
    /// Open a new span for the request.
    pub fn open(request: &SpanRequest<'_>) -> Self {
        let span = info_span!(
            "llm_request",
            request_id = %request.request_id,
            provider = %request.provider,
            method = %request.method,
            model = request.params.model().unwrap_or(""),
            agent_name = request.agent_name.unwrap_or(""),
            pipeline_id = request.pipeline_id.unwrap_or(""),
            pattern_matched = Empty,
            fix_applied = Empty,
            interception_latency_ms = Empty,
            response = Empty,
            prompt_tokens = Empty,
            completion_tokens = Empty,
            latency_ms = Empty,
            status = Empty,
            error_kind = Empty,
            error = Empty,
        );

        Self {
            span,
            start: Instant::now(),
            finished: false,
        }
    }

    /// Get the underlying tracing span.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Record the registry decision and its overhead.
    pub fn record_intervention(
        &self,
        matched: bool,
        fix: Option<&FixDescriptor>,
        latency_ms: f64,
    ) {
        self.span.record("pattern_matched", matched);
        self.span.record("interception_latency_ms", latency_ms);
        if let Some(fix) = fix {
            self.span.record("fix_applied", fix.to_string().as_str());
        }
    }

    /// Record a summary of the provider response.
    pub fn record_response(&self, response: &dyn LlmResponse, latency_ms: f64) {
        self.span.record("response", response.summary().as_str());
        self.span.record("latency_ms", latency_ms);
        if let Some(usage) = response.usage() {
            self.span.record("prompt_tokens", usage.prompt_tokens);
            self.span.record("completion_tokens", usage.completion_tokens);
        }
    }

    /// Close the span as successful.
    pub fn finish_ok(mut self) {
        self.finished = true;
        self.span.record("status", "ok");
        debug!(parent: &self.span, elapsed_ms = elapsed_ms(self.start), "LLM request complete");
    }

    /// Close the span as errored.
    pub fn finish_err(mut self, kind: &str, message: &str) {
        self.finished = true;
        self.span.record("status", "error");
        self.span.record("error_kind", kind);
        self.span.record("error", message);
        self.span.record("latency_ms", elapsed_ms(self.start));
        debug!(parent: &self.span, error_kind = kind, "LLM request failed");
    }
}

impl Drop for LlmSpan {
    fn drop(&mut self) {
        if !self.finished {
            self.span.record("status", "aborted");
            self.span.record("latency_ms", elapsed_ms(self.start));
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
