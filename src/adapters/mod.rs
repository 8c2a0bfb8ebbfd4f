// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Provider adapters: which call sites exist and how their parameters look.
//!
//! An adapter never touches the engine's internals. It names its provider,
//! lists the methods it binds, and normalizes call arguments into
//! [`RequestParameters`] for matching. Wrapping happens explicitly, either
//! through [`Interceptor::wrap`](crate::engine::Interceptor::wrap) for plain
//! callables or through [`Protected`] for client objects.
//!
//! ```rust,ignore
//! let client = OpenAiClient::from_env()?;
//! let protected = interceptor.protect(client, Arc::new(OpenAiAdapter), "chat.completions.create")?;
//! let completion = protected.create(CallArgs::from_json(request)).await?;
//! ```

mod anthropic;
mod openai;

pub use anthropic::{
    AnthropicAdapter, AnthropicClient, AnthropicMessage, AnthropicUsage, ContentBlock,
    ANTHROPIC_BASE_URL,
};
pub use openai::{
    ChatChoice, ChatCompletion, ChatMessage, ChatUsage, OpenAiAdapter, OpenAiClient,
    OPENAI_BASE_URL,
};

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ContextHandle;
use crate::engine::{CallSite, InterceptOptions, Interceptor};
use crate::response::LlmResponse;
use crate::types::{AgentMetadata, CallArgs, RequestParameters};

/// Binding between the engine and one provider's call sites.
pub trait ProviderAdapter: Send + Sync {
    /// Provider name recorded on spans and events (`openai`, `anthropic`).
    fn provider(&self) -> &str;

    /// Methods this adapter binds, in dotted form. Empty binds any method.
    fn methods(&self) -> &[&'static str];

    fn binds(&self, method: &str) -> bool {
        let methods = self.methods();
        methods.is_empty() || methods.contains(&method)
    }

    /// Normalize a call's arguments for matching.
    fn extract_params(&self, args: &CallArgs) -> RequestParameters {
        args.kwargs.clone()
    }
}

/// Adapter for any provider whose keyword arguments already are the request.
#[derive(Debug, Clone)]
pub struct GenericAdapter {
    provider: String,
}

impl GenericAdapter {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

impl ProviderAdapter for GenericAdapter {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn methods(&self) -> &[&'static str] {
        &[]
    }
}

/// A client object exposing one async request entrypoint.
#[async_trait]
pub trait ChatCompletions: Send + Sync {
    type Response: LlmResponse + Send;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn create(&self, args: CallArgs) -> Result<Self::Response, Self::Error>;
}

/// A client whose `create` goes through the interceptor.
///
/// Same signature and error type as the wrapped client; the only visible
/// difference is that fixed parameters may reach the provider.
pub struct Protected<C> {
    inner: C,
    interceptor: Arc<Interceptor>,
    adapter: Arc<dyn ProviderAdapter>,
    method: String,
    options: InterceptOptions,
}

impl<C> Protected<C> {
    pub(crate) fn new(
        inner: C,
        interceptor: Arc<Interceptor>,
        adapter: Arc<dyn ProviderAdapter>,
        method: String,
    ) -> Self {
        Self {
            inner,
            interceptor,
            adapter,
            method,
            options: InterceptOptions::default(),
        }
    }

    /// Attribute every call to the given agent.
    pub fn with_agent(mut self, agent: AgentMetadata) -> Self {
        self.options.agent = Some(agent);
        self
    }

    /// Attach every call to an explicit pipeline context.
    pub fn with_context(mut self, context: ContextHandle) -> Self {
        self.options.context = Some(context);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C> ChatCompletions for Protected<C>
where
    C: ChatCompletions,
{
    type Response = C::Response;
    type Error = C::Error;

    async fn create(&self, args: CallArgs) -> Result<Self::Response, Self::Error> {
        let site = CallSite::new(self.adapter.as_ref(), &self.method);
        self.interceptor
            .intercept_async(site, args, &self.options, |args| self.inner.create(args))
            .await
    }
}
