// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Anthropic Messages API adapter, response type and HTTP client.

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::AdapterError;
use crate::response::LlmResponse;
use crate::types::{CallArgs, FunctionCall, RequestParameters, TokenUsage, ToolCallInfo};

use super::{ChatCompletions, ProviderAdapter};

/// Default Anthropic API base URL.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Adapter for `messages.create`.
///
/// The Messages API takes the system prompt as a top-level `system` field.
/// For matching it is folded into a leading `system` message, so rules see
/// the same `messages` shape as for chat-completion providers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdapter;

impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> &str {
        "anthropic"
    }

    fn methods(&self) -> &[&'static str] {
        &["messages.create"]
    }

    fn extract_params(&self, args: &CallArgs) -> RequestParameters {
        let Some(system) = args.kwargs.get("system").cloned() else {
            return args.kwargs.clone();
        };

        let mut messages = vec![json!({"role": "system", "content": system})];
        if let Some(existing) = args.kwargs.messages() {
            messages.extend(existing.iter().cloned());
        }
        let messages = Value::Array(messages);

        let mut params = RequestParameters::new();
        for (key, value) in args.kwargs.iter() {
            match key.as_str() {
                "system" => {}
                "messages" => params = params.with(key.clone(), messages.clone()),
                _ => params = params.with(key.clone(), value.clone()),
            }
        }
        if !params.contains_key("messages") {
            params = params.with("messages", messages);
        }
        params
    }
}

// ============================================================================
// Response
// ============================================================================

/// Messages API response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnthropicMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

/// Content block in the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl LlmResponse for AnthropicMessage {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    fn usage(&self) -> Option<TokenUsage> {
        self.usage
            .map(|usage| TokenUsage::new(usage.input_tokens, usage.output_tokens))
    }

    fn finish_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    fn message_content(&self) -> Option<Cow<'_, str>> {
        let texts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();

        match texts.as_slice() {
            [] => None,
            [single] => Some(Cow::Borrowed(*single)),
            many => Some(Cow::Owned(many.join(""))),
        }
    }

    fn tool_calls(&self) -> Vec<ToolCallInfo> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCallInfo {
                    id: id.clone(),
                    call_type: "tool_use".to_string(),
                    function: Some(FunctionCall {
                        name: name.clone(),
                        arguments: input.to_string(),
                    }),
                }),
                _ => None,
            })
            .collect()
    }
}

// ============================================================================
// Client
// ============================================================================

/// Minimal Messages API client.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, AdapterError> {
        let timeout = timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Client using `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, AdapterError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| AdapterError::AuthError("ANTHROPIC_API_KEY not set".to_string()))?;
        Self::new(api_key, ANTHROPIC_BASE_URL, None)
    }

    fn handle_error_response(status_code: u16, body: &str) -> AdapterError {
        if let Ok(error) = serde_json::from_str::<ApiError>(body) {
            let message = error.error.message;
            match error.error.error_type.as_str() {
                "authentication_error" => AdapterError::AuthError(message),
                "rate_limit_error" => AdapterError::RateLimited(message),
                "overloaded_error" => AdapterError::RateLimited(message),
                _ => AdapterError::api(message, status_code),
            }
        } else {
            AdapterError::api(body.to_string(), status_code)
        }
    }
}

#[async_trait]
impl ChatCompletions for AnthropicClient {
    type Response = AnthropicMessage;
    type Error = AdapterError;

    async fn create(&self, args: CallArgs) -> Result<AnthropicMessage, AdapterError> {
        debug!(model = args.kwargs.model().unwrap_or(""), "Sending messages request");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&args.kwargs)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    AdapterError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Self::handle_error_response(status.as_u16(), &error_text));
        }

        response
            .json()
            .await
            .map_err(|e| AdapterError::ParseError(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
