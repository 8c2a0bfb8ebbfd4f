// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Multi-agent pipeline context.
//!
//! A [`PipelineContext`] identifies an in-progress pipeline run and collects
//! one [`AgentActivityRecord`] per intercepted call made inside it. Handles
//! are shared (`Arc`) and reach the engine either explicitly, through
//! `InterceptOptions::context`, or through [`ScopedContext`], which keeps a
//! push/pop stack per thread and a task-local slot per tokio task.
//!
//! ```rust,ignore
//! let ctx = PipelineContext::new("pipeline-42").with_current_agent("planner").into_handle();
//!
//! // Synchronous code
//! let _guard = ScopedContext::enter(ctx.clone());
//!
//! // Async code
//! ScopedContext::scope(ctx.clone(), async { /* ... */ }).await;
//! ```

use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::FixDescriptor;

/// Agent type recorded for intercepted model calls.
pub const AGENT_TYPE_LLM: &str = "llm";

/// One intercepted call, as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentActivityRecord {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub provider: String,
    pub method: String,
    pub pattern_matched: bool,
    pub fix_applied: Option<FixDescriptor>,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// State of one multi-agent pipeline run.
#[derive(Debug)]
pub struct PipelineContext {
    pipeline_id: String,
    application_id: Option<String>,
    current_agent: RwLock<Option<String>>,
    metadata: Map<String, Value>,
    agents: Mutex<Vec<AgentActivityRecord>>,
}

/// Shared handle to a pipeline context.
pub type ContextHandle = Arc<PipelineContext>;

impl PipelineContext {
    /// Create a context for the given pipeline run.
    pub fn new(pipeline_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            application_id: None,
            current_agent: RwLock::new(None),
            metadata: Map::new(),
            agents: Mutex::new(Vec::new()),
        }
    }

    pub fn with_application_id(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    pub fn with_current_agent(self, agent: impl Into<String>) -> Self {
        self.set_current_agent(Some(agent.into()));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Wrap in a shareable handle.
    pub fn into_handle(self) -> ContextHandle {
        Arc::new(self)
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn application_id(&self) -> Option<&str> {
        self.application_id.as_deref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Agent currently driving the pipeline, if the orchestrator set one.
    pub fn current_agent(&self) -> Option<String> {
        self.current_agent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switch the agent currently driving the pipeline.
    pub fn set_current_agent(&self, agent: Option<String>) {
        *self
            .current_agent
            .write()
            .unwrap_or_else(PoisonError::into_inner) = agent;
    }

    /// Append an activity record. Each append is atomic; entries are never
    /// removed or reordered.
    pub fn append_agent_activity(&self, record: AgentActivityRecord) {
        self.agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Snapshot of all activity records, in insertion order.
    pub fn agents(&self) -> Vec<AgentActivityRecord> {
        self.agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn agent_count(&self) -> usize {
        self.agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// ============================================================================
// Ambient lookup
// ============================================================================

/// Where the engine looks up the current pipeline.
pub trait AmbientContext: Send + Sync {
    /// The innermost active pipeline context, if any.
    fn current_context(&self) -> Option<ContextHandle>;

    /// Identifier of the innermost active pipeline, if any.
    fn current_pipeline_id(&self) -> Option<String> {
        self.current_context()
            .map(|ctx| ctx.pipeline_id().to_string())
    }
}

tokio::task_local! {
    static TASK_CONTEXT: ContextHandle;
}

thread_local! {
    static THREAD_STACK: RefCell<Vec<ContextHandle>> = const { RefCell::new(Vec::new()) };
}

/// Scoped context propagation with explicit push/pop.
///
/// Lookup order: the innermost [`ContextGuard`] on this thread, then the
/// enclosing [`ScopedContext::scope`] of the current tokio task.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopedContext;

impl ScopedContext {
    /// Push a context for the current thread until the guard drops.
    pub fn enter(handle: ContextHandle) -> ContextGuard {
        let depth = THREAD_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(handle);
            stack.len() - 1
        });
        ContextGuard {
            depth,
            _not_send: PhantomData,
        }
    }

    /// Run a future with the context active for the whole task.
    pub async fn scope<F: Future>(handle: ContextHandle, future: F) -> F::Output {
        TASK_CONTEXT.scope(handle, future).await
    }

    /// The innermost active context.
    pub fn current() -> Option<ContextHandle> {
        THREAD_STACK
            .with(|stack| stack.borrow().last().cloned())
            .or_else(|| TASK_CONTEXT.try_with(Arc::clone).ok())
    }
}

impl AmbientContext for ScopedContext {
    fn current_context(&self) -> Option<ContextHandle> {
        Self::current()
    }
}

/// Pops the context pushed by [`ScopedContext::enter`] when dropped.
///
/// Not `Send`: the guard must be dropped on the thread that created it.
#[must_use = "the context is popped as soon as the guard is dropped"]
pub struct ContextGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        THREAD_STACK.with(|stack| stack.borrow_mut().truncate(self.depth));
    }
}

/// Ambient lookup that always yields the same handle (or none).
#[derive(Debug, Clone, Default)]
pub struct FixedContext(Option<ContextHandle>);

impl FixedContext {
    pub fn new(handle: ContextHandle) -> Self {
        Self(Some(handle))
    }

    /// Never inside a pipeline.
    pub fn none() -> Self {
        Self(None)
    }
}

impl AmbientContext for FixedContext {
    fn current_context(&self) -> Option<ContextHandle> {
        self.0.clone()
    }
}
