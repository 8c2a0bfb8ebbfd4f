// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OpenAI-compatible adapter, response type and HTTP client.
//!
//! [`OpenAiClient`] speaks the Chat Completions API of OpenAI and any
//! compatible server (Ollama, Azure OpenAI, Together, Groq, etc.). Requests
//! are passed through as JSON, so whatever fix the registry applies reaches
//! the wire verbatim.
//!
//! See [OpenAI Chat Completions API](https://platform.openai.com/docs/api-reference/chat)

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AdapterError;
use crate::response::LlmResponse;
use crate::types::{CallArgs, TokenUsage, ToolCallInfo};

use super::{ChatCompletions, ProviderAdapter};

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Adapter for the OpenAI SDK call sites.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiAdapter;

impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> &str {
        "openai"
    }

    fn methods(&self) -> &[&'static str] {
        &["chat.completions.create", "completions.create"]
    }
}

// ============================================================================
// Response
// ============================================================================

/// Chat completion response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

/// A choice in the response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallInfo>,
}

/// Token usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

impl ChatCompletion {
    fn first_choice(&self) -> Option<&ChatChoice> {
        self.choices.first()
    }
}

impl LlmResponse for ChatCompletion {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    fn usage(&self) -> Option<TokenUsage> {
        self.usage.map(|usage| {
            let mut tokens = TokenUsage::new(usage.prompt_tokens, usage.completion_tokens);
            if let Some(total) = usage.total_tokens {
                tokens.total_tokens = total;
            }
            tokens
        })
    }

    fn finish_reason(&self) -> Option<&str> {
        self.first_choice()?.finish_reason.as_deref()
    }

    fn message_content(&self) -> Option<Cow<'_, str>> {
        self.first_choice()?
            .message
            .content
            .as_deref()
            .map(Cow::Borrowed)
    }

    fn tool_calls(&self) -> Vec<ToolCallInfo> {
        self.first_choice()
            .map(|choice| choice.message.tool_calls.clone())
            .unwrap_or_default()
    }
}

// ============================================================================
// Client
// ============================================================================

/// Minimal Chat Completions client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

impl OpenAiClient {
    /// Create a client for the given base URL.
    pub fn new(
        api_key: Option<String>,
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
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Client for api.openai.com using `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, AdapterError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AdapterError::AuthError("OPENAI_API_KEY not set".to_string()))?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| OPENAI_BASE_URL.to_string());
        Self::new(Some(api_key), base_url, None)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Handle error responses from the API.
    fn handle_error_response(status_code: u16, body: &str) -> AdapterError {
        if let Ok(error) = serde_json::from_str::<ApiError>(body) {
            let message = error.error.message;
            match error.error.error_type.as_deref() {
                Some("authentication_error") | Some("invalid_api_key") => {
                    AdapterError::AuthError(message)
                }
                Some("rate_limit_error") | Some("rate_limit_exceeded") => {
                    AdapterError::RateLimited(message)
                }
                _ => AdapterError::api(message, status_code),
            }
        } else {
            AdapterError::api(body.to_string(), status_code)
        }
    }
}

#[async_trait]
impl ChatCompletions for OpenAiClient {
    type Response = ChatCompletion;
    type Error = AdapterError;

    async fn create(&self, args: CallArgs) -> Result<ChatCompletion, AdapterError> {
        let message_count = args.kwargs.messages().map_or(0, |m| m.len());
        debug!(
            model = args.kwargs.model().unwrap_or(""),
            messages = message_count,
            "Sending chat request"
        );

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json");

        if let Some(ref api_key) = self.api_key {
            req = req.header("authorization", format!("Bearer {}", api_key));
        }

        let response = req.json(&args.kwargs).send().await.map_err(|e| {
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

/// API error response.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}
