// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The response contract the event builder extracts from.
//!
//! Providers shape their responses differently. Instead of probing for
//! fields at runtime, every response type handed back through the engine
//! implements [`LlmResponse`]; each accessor is optional and defaults to
//! "not present", so a response type only overrides what it actually has.

use std::borrow::Cow;

use serde_json::Value;

use crate::types::{FunctionCall, TokenUsage, ToolCallInfo};

/// Read-only view over a provider response.
pub trait LlmResponse {
    /// Provider-assigned response identifier.
    fn id(&self) -> Option<&str> {
        None
    }

    /// Model that actually served the request.
    fn model(&self) -> Option<&str> {
        None
    }

    fn usage(&self) -> Option<TokenUsage> {
        None
    }

    /// Finish reason of the first choice.
    fn finish_reason(&self) -> Option<&str> {
        None
    }

    /// Message text of the first choice.
    fn message_content(&self) -> Option<Cow<'_, str>> {
        None
    }

    /// Tool calls of the first choice.
    fn tool_calls(&self) -> Vec<ToolCallInfo> {
        Vec::new()
    }

    /// One-line description for span annotation.
    fn summary(&self) -> String {
        format!(
            "id={} model={} finish_reason={}",
            self.id().unwrap_or("-"),
            self.model().unwrap_or("-"),
            self.finish_reason().unwrap_or("-"),
        )
    }
}

impl<T: LlmResponse + ?Sized> LlmResponse for Box<T> {
    fn id(&self) -> Option<&str> {
        (**self).id()
    }

    fn model(&self) -> Option<&str> {
        (**self).model()
    }

    fn usage(&self) -> Option<TokenUsage> {
        (**self).usage()
    }

    fn finish_reason(&self) -> Option<&str> {
        (**self).finish_reason()
    }

    fn message_content(&self) -> Option<Cow<'_, str>> {
        (**self).message_content()
    }

    fn tool_calls(&self) -> Vec<ToolCallInfo> {
        (**self).tool_calls()
    }

    fn summary(&self) -> String {
        (**self).summary()
    }
}

/// Raw JSON responses in the chat-completions shape.
///
/// Unknown shapes simply yield nothing.
impl LlmResponse for Value {
    fn id(&self) -> Option<&str> {
        self.get("id").and_then(Value::as_str)
    }

    fn model(&self) -> Option<&str> {
        self.get("model").and_then(Value::as_str)
    }

    fn usage(&self) -> Option<TokenUsage> {
        let usage = self.get("usage")?;
        let field = |name: &str| usage.get(name).and_then(Value::as_u64);

        let prompt = field("prompt_tokens").or_else(|| field("input_tokens")).unwrap_or(0);
        let completion = field("completion_tokens")
            .or_else(|| field("output_tokens"))
            .unwrap_or(0);
        let total = field("total_tokens").unwrap_or_else(|| prompt.saturating_add(completion));

        Some(TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
        })
    }

    fn finish_reason(&self) -> Option<&str> {
        self.pointer("/choices/0/finish_reason").and_then(Value::as_str)
    }

    fn message_content(&self) -> Option<Cow<'_, str>> {
        self.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(Cow::Borrowed)
    }

    fn tool_calls(&self) -> Vec<ToolCallInfo> {
        let Some(calls) = self
            .pointer("/choices/0/message/tool_calls")
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        let text = |v: &Value, key: &str| {
            v.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        calls
            .iter()
            .map(|call| ToolCallInfo {
                id: text(call, "id"),
                call_type: text(call, "type"),
                function: call.get("function").map(|f| FunctionCall {
                    name: text(f, "name"),
                    arguments: text(f, "arguments"),
                }),
            })
            .collect()
    }
}
