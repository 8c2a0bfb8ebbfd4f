// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry event construction.
//!
//! Turns an [`InterceptionRecord`] into the [`TelemetryEvent`] shipped to the
//! collector. Every string that can carry user or model text is
//! prefix-truncated to a fixed number of characters, so one pathological
//! payload cannot blow up the transport. Extraction never fails: anything a
//! response does not expose becomes an empty default.

use std::any::type_name;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::response::LlmResponse;
use crate::telemetry::RequestId;
use crate::transport::TelemetryTransport;
use crate::types::{
    FixDescriptor, FunctionCall, PatternMatch, RequestParameters, TokenUsage, ToolCallInfo,
};

/// Maximum characters kept from the latest user message.
pub const MAX_USER_INPUT_CHARS: usize = 500;
/// Maximum characters kept from the model's reply.
pub const MAX_AGENT_OUTPUT_CHARS: usize = 500;
/// Maximum characters kept from each tool-call argument string.
pub const MAX_TOOL_ARGUMENT_CHARS: usize = 200;
/// Maximum characters kept from an error's trace.
pub const MAX_STACK_TRACE_CHARS: usize = 2000;
/// Maximum characters kept from an error message.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 2000;

/// Keep the first `max` characters of `s`.
///
/// Never splits a code point, and `truncate(truncate(s, n), n) == truncate(s, n)`.
pub fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

// ============================================================================
// Wire Event
// ============================================================================

/// One intercepted call, ready for the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub pipeline_id: String,
    pub application_id: String,
    pub agent_name: String,
    pub llm_interaction: LlmInteraction,
    pub pattern_matched: bool,
    pub fix_applied: Option<FixDescriptor>,
    pub interception_latency_ms: f64,
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
}

impl TelemetryEvent {
    /// The `success` metadata flag.
    pub fn is_success(&self) -> bool {
        self.metadata.get("success").map(String::as_str) == Some("true")
    }
}

/// Request/response pair of an intercepted call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmInteraction {
    pub provider: String,
    pub model: String,
    pub request_body: RequestParameters,
    pub response_body: Option<ResponseBody>,
    pub latency_ms: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub response_id: String,
    pub response_model: String,
    pub finish_reason: String,
    pub user_input: String,
    pub agent_output: String,
    pub tool_calls: Vec<ToolCallInfo>,
}

/// Condensed view of a successful response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub id: String,
    pub model: String,
    pub choices: Vec<ChoiceSummary>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceSummary {
    pub finish_reason: String,
    pub message: MessageSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub content: String,
}

/// Failure details attached to unsuccessful calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_type: String,
    pub error_message: String,
    pub stack_trace: String,
}

// ============================================================================
// Interception Record
// ============================================================================

/// How the wrapped call ended.
pub enum CallOutcome<'a> {
    Success(&'a dyn LlmResponse),
    Failure(FailureInfo),
}

impl CallOutcome<'_> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Description of a failed call, captured at the point of failure.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureInfo {
    pub kind: String,
    pub message: String,
    pub trace: String,
}

impl FailureInfo {
    /// Describe an error: its category, message and source chain.
    ///
    /// The trace is the `caused by` chain followed by a backtrace of the
    /// interception point when `RUST_BACKTRACE` enables capture.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: StdError + 'static,
    {
        let kind = error_kind(err);
        let message = err.to_string();

        let mut trace = format!("{kind}: {message}");
        let mut source = err.source();
        while let Some(cause) = source {
            let _ = write!(trace, "\ncaused by: {cause}");
            source = cause.source();
        }
        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            let _ = write!(trace, "\n\nbacktrace:\n{backtrace}");
        }

        Self {
            kind,
            message,
            trace,
        }
    }
}

/// Category name of an error: its type name, plus the enum variant when the
/// `Debug` output starts with one (`AdapterError::Timeout`).
pub fn error_kind<E: std::fmt::Debug>(err: &E) -> String {
    let full = type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    let short = base.rsplit("::").next().unwrap_or(base);

    let debug = format!("{err:?}");
    let variant: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();

    let is_variant = variant != short && variant.chars().next().is_some_and(char::is_uppercase);
    if is_variant {
        format!("{short}::{variant}")
    } else {
        short.to_string()
    }
}

/// Everything the event builder needs about one call.
pub struct InterceptionRecord<'a> {
    pub request_id: RequestId,
    pub provider: &'a str,
    pub method: &'a str,
    pub started_at: DateTime<Utc>,
    pub latency: Duration,
    pub interception_latency: Duration,
    pub request_params: RequestParameters,
    pub pattern_match: Option<PatternMatch>,
    pub outcome: CallOutcome<'a>,
}

/// Ambient identifiers captured when the call started.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextSnapshot {
    pub pipeline_id: Option<String>,
    pub application_id: Option<String>,
    pub agent_name: Option<String>,
}

// ============================================================================
// Builder
// ============================================================================

/// Build the telemetry event for a finished call.
pub fn build_event(record: InterceptionRecord<'_>, context: &ContextSnapshot) -> TelemetryEvent {
    let InterceptionRecord {
        request_id,
        provider,
        method,
        started_at,
        latency,
        interception_latency,
        request_params,
        pattern_match,
        outcome,
    } = record;

    let success = outcome.is_success();
    let user_input = extract_user_input(&request_params);
    let model = request_params.model().unwrap_or_default().to_string();

    let mut interaction = LlmInteraction {
        provider: provider.to_string(),
        model,
        user_input,
        latency_ms: as_ms(latency),
        ..LlmInteraction::default()
    };

    let error_info = match outcome {
        CallOutcome::Success(response) => {
            fill_response(&mut interaction, response);
            None
        }
        CallOutcome::Failure(failure) => Some(ErrorInfo {
            error_type: failure.kind,
            error_message: truncate(&failure.message, MAX_ERROR_MESSAGE_CHARS).to_string(),
            stack_trace: truncate(&failure.trace, MAX_STACK_TRACE_CHARS).to_string(),
        }),
    };
    interaction.request_body = request_params;

    let mut metadata = BTreeMap::new();
    metadata.insert("method".to_string(), method.to_string());
    metadata.insert("success".to_string(), success.to_string());

    TelemetryEvent {
        timestamp: started_at,
        request_id: request_id.to_string(),
        pipeline_id: context.pipeline_id.clone().unwrap_or_default(),
        application_id: context.application_id.clone().unwrap_or_default(),
        agent_name: context.agent_name.clone().unwrap_or_default(),
        llm_interaction: interaction,
        pattern_matched: pattern_match.is_some(),
        fix_applied: pattern_match.map(|m| m.fix).filter(|fix| !fix.is_empty()),
        interception_latency_ms: as_ms(interception_latency),
        metadata,
        error_info,
    }
}

fn fill_response(interaction: &mut LlmInteraction, response: &dyn LlmResponse) {
    let usage = response.usage().unwrap_or_default();
    let response_id = response.id().unwrap_or_default().to_string();
    let response_model = response.model().unwrap_or_default().to_string();
    let finish_reason = response.finish_reason().unwrap_or_default().to_string();
    let agent_output = response
        .message_content()
        .map(|content| truncate(&content, MAX_AGENT_OUTPUT_CHARS).to_string())
        .unwrap_or_default();

    let choices = if agent_output.is_empty() {
        Vec::new()
    } else {
        vec![ChoiceSummary {
            finish_reason: finish_reason.clone(),
            message: MessageSummary {
                content: agent_output.clone(),
            },
        }]
    };

    interaction.response_body = Some(ResponseBody {
        id: response_id.clone(),
        model: response_model.clone(),
        choices,
        usage,
    });
    interaction.prompt_tokens = usage.prompt_tokens;
    interaction.completion_tokens = usage.completion_tokens;
    interaction.total_tokens = usage.total_tokens;
    interaction.response_id = response_id;
    interaction.response_model = response_model;
    interaction.finish_reason = finish_reason;
    interaction.agent_output = agent_output;
    interaction.tool_calls = response
        .tool_calls()
        .into_iter()
        .map(truncate_tool_call)
        .collect();
}

fn truncate_tool_call(call: ToolCallInfo) -> ToolCallInfo {
    ToolCallInfo {
        function: call.function.map(|f| FunctionCall {
            arguments: truncate(&f.arguments, MAX_TOOL_ARGUMENT_CHARS).to_string(),
            name: f.name,
        }),
        ..call
    }
}

/// Text of the last message when it comes from the user.
///
/// String content is used as-is; content-part arrays contribute their
/// `text` parts joined by newlines.
pub fn extract_user_input(params: &RequestParameters) -> String {
    let Some(last) = params.messages().and_then(<[Value]>::last) else {
        return String::new();
    };
    if last.get("role").and_then(Value::as_str) != Some("user") {
        return String::new();
    }

    let text = match last.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };
    truncate(&text, MAX_USER_INPUT_CHARS).to_string()
}

/// Hand an event to the transport. Failures are logged, never returned.
pub fn emit(transport: &dyn TelemetryTransport, event: TelemetryEvent) {
    let request_id = event.request_id.clone();
    if let Err(err) = transport.record(event) {
        warn!(request_id = %request_id, error = %err, "Telemetry event not recorded");
    }
}

fn as_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
