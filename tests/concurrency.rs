// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! One interceptor shared by many callers at once.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::thread;

use arc_runtime::context::{FixedContext, ScopedContext};
use arc_runtime::telemetry::metrics::names;
use arc_runtime::telemetry::Metrics;
use arc_runtime::{
    AgentMetadata, CallArgs, CallSite, FixDescriptor, InterceptOptions, Interceptor,
    MemoryTransport, OpenAiAdapter, PipelineContext, RuleRegistry,
};
use serde_json::{json, Value};

const CALLERS: usize = 16;
const CALLS_EACH: usize = 8;

const RULES: &str = r#"
rules:
  - name: hot-temperature
    when:
      temperature: { gt: 0.9 }
    fix:
      temperature: 0.7
"#;

fn request(caller: usize, call: usize) -> CallArgs {
    let temperature = if call % 2 == 0 { 1.2 } else { 0.3 };
    CallArgs::from_json(json!({
        "model": "gpt-x",
        "temperature": temperature,
        "messages": [{"role": "user", "content": format!("caller {caller} call {call}")}]
    }))
}

fn completion() -> Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{"finish_reason": "stop", "message": {"content": "ok"}}],
        "usage": {"prompt_tokens": 4, "completion_tokens": 2}
    })
}

fn registry() -> Arc<RuleRegistry> {
    Arc::new(RuleRegistry::from_yaml_str(RULES).unwrap())
}

#[test]
fn test_threads_share_one_context_and_transport() {
    let metrics = Arc::new(Metrics::new());
    let transport = Arc::new(MemoryTransport::with_metrics(Arc::clone(&metrics)));
    let ctx = PipelineContext::new("shared-pipeline").into_handle();
    let interceptor = Interceptor::new(registry(), transport.clone())
        .with_ambient(Arc::new(FixedContext::new(ctx.clone())));

    thread::scope(|scope| {
        for caller in 0..CALLERS {
            let interceptor = &interceptor;
            scope.spawn(move || {
                let adapter = OpenAiAdapter;
                let options = InterceptOptions::default()
                    .with_agent(AgentMetadata::named(format!("agent-{caller}")));
                for call in 0..CALLS_EACH {
                    let result: Result<Value, Infallible> = interceptor.intercept(
                        CallSite::new(&adapter, "chat.completions.create"),
                        request(caller, call),
                        &options,
                        |_| Ok(completion()),
                    );
                    assert!(result.is_ok());
                }
            });
        }
    });

    let total = CALLERS * CALLS_EACH;
    let events = transport.events();
    assert_eq!(events.len(), total);
    assert_eq!(ctx.agents().len(), total);

    let ids: HashSet<&str> = events.iter().map(|e| e.request_id.as_str()).collect();
    assert_eq!(ids.len(), total);

    let hot = events.iter().filter(|e| e.pattern_matched).count();
    assert_eq!(hot, total / 2);
    assert!(events
        .iter()
        .filter(|e| e.pattern_matched)
        .all(|e| e.fix_applied == Some(FixDescriptor::new().with("temperature", 0.7))));
    assert_eq!(metrics.counter(names::REQUESTS_INTERCEPTED), total as u64);
    assert_eq!(metrics.counter(names::FIXES_APPLIED), (total / 2) as u64);
    assert_eq!(metrics.counter(names::INSTRUMENTATION_ERRORS), 0);

    for caller in 0..CALLERS {
        let name = format!("agent-{caller}");
        let records = ctx
            .agents()
            .into_iter()
            .filter(|r| r.name.as_deref() == Some(name.as_str()))
            .count();
        assert_eq!(records, CALLS_EACH);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tasks_keep_their_own_pipeline() {
    let transport = Arc::new(MemoryTransport::new());
    let interceptor = Arc::new(Interceptor::new(registry(), transport.clone()));

    let mut handles = Vec::new();
    let mut contexts = Vec::new();
    for caller in 0..CALLERS {
        let ctx = PipelineContext::new(format!("pipeline-{caller}")).into_handle();
        contexts.push(ctx.clone());
        let interceptor = Arc::clone(&interceptor);
        handles.push(tokio::spawn(ScopedContext::scope(ctx, async move {
            let adapter = OpenAiAdapter;
            for call in 0..CALLS_EACH {
                let result: Result<Value, Infallible> = interceptor
                    .intercept_async(
                        CallSite::new(&adapter, "chat.completions.create"),
                        request(caller, call),
                        &InterceptOptions::default(),
                        |_| async {
                            tokio::task::yield_now().await;
                            Ok(completion())
                        },
                    )
                    .await;
                assert!(result.is_ok());
            }
        })));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let events = transport.events();
    assert_eq!(events.len(), CALLERS * CALLS_EACH);
    let ids: HashSet<&str> = events.iter().map(|e| e.request_id.as_str()).collect();
    assert_eq!(ids.len(), CALLERS * CALLS_EACH);

    for (caller, ctx) in contexts.iter().enumerate() {
        assert_eq!(ctx.agent_count(), CALLS_EACH);
        let pipeline = format!("pipeline-{caller}");
        let own = events.iter().filter(|e| e.pipeline_id == pipeline).count();
        assert_eq!(own, CALLS_EACH);
    }
}
