// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Collector clients: the far end of the telemetry stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::event::TelemetryEvent;

/// Server acknowledgement of one streamed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAck {
    /// Number of events the collector accepted.
    pub accepted: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StreamAck {
    pub fn accepted(count: usize) -> Self {
        Self {
            accepted: count as u64,
            message: None,
        }
    }
}

/// One client-streaming call per batch: open the stream, push every event,
/// close it and wait for the collector's acknowledgement.
#[async_trait]
pub trait CollectorClient: Send + Sync {
    /// Human-readable target, for logs.
    fn endpoint(&self) -> &str {
        "local"
    }

    async fn stream_events(&self, batch: Vec<TelemetryEvent>) -> Result<StreamAck, TransportError>;
}

/// Collector that writes each event to the log instead of a network stream.
#[derive(Debug, Clone)]
pub struct LoggingCollector {
    endpoint: String,
}

impl LoggingCollector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl Default for LoggingCollector {
    fn default() -> Self {
        Self::new("log")
    }
}

#[async_trait]
impl CollectorClient for LoggingCollector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn stream_events(&self, batch: Vec<TelemetryEvent>) -> Result<StreamAck, TransportError> {
        for event in &batch {
            let payload = serde_json::to_string(event)
                .map_err(|e| TransportError::Stream(e.to_string()))?;
            debug!(
                target: "arc_runtime::collector",
                request_id = %event.request_id,
                payload = %payload,
                "Telemetry event"
            );
        }
        info!(endpoint = %self.endpoint, events = batch.len(), "Telemetry batch streamed");
        Ok(StreamAck::accepted(batch.len()))
    }
}

/// Collector that keeps every accepted event in memory.
///
/// Can be switched into a failing mode to exercise rejected batches.
#[derive(Debug, Default)]
pub struct MemoryCollector {
    events: Mutex<Vec<TelemetryEvent>>,
    batches: Mutex<Vec<usize>>,
    failing: AtomicBool,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every following batch (or stop rejecting).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Events accepted so far, in arrival order.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sizes of the accepted batches, in arrival order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CollectorClient for MemoryCollector {
    fn endpoint(&self) -> &str {
        "memory"
    }

    async fn stream_events(&self, batch: Vec<TelemetryEvent>) -> Result<StreamAck, TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected(format!(
                "collector refused {} events",
                batch.len()
            )));
        }

        let count = batch.len();
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(count);
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(batch);
        Ok(StreamAck::accepted(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LlmInteraction;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sample_event(request_id: &str) -> TelemetryEvent {
        TelemetryEvent {
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            pipeline_id: String::new(),
            application_id: String::new(),
            agent_name: String::new(),
            llm_interaction: LlmInteraction::default(),
            pattern_matched: false,
            fix_applied: None,
            interception_latency_ms: 0.0,
            metadata: BTreeMap::new(),
            error_info: None,
        }
    }

    #[tokio::test]
    async fn test_memory_collector_accepts() {
        let collector = MemoryCollector::new();
        let ack = collector
            .stream_events(vec![sample_event("a"), sample_event("b")])
            .await
            .unwrap();

        assert_eq!(ack.accepted, 2);
        assert_eq!(collector.batch_sizes(), vec![2]);
        let ids: Vec<_> = collector.events().into_iter().map(|e| e.request_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_memory_collector_failing() {
        let collector = MemoryCollector::new();
        collector.set_failing(true);
        let err = collector.stream_events(vec![sample_event("a")]).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(_)));
        assert!(collector.events().is_empty());

        collector.set_failing(false);
        assert!(collector.stream_events(vec![sample_event("b")]).await.is_ok());
        assert_eq!(collector.events().len(), 1);
    }

    #[tokio::test]
    async fn test_logging_collector_acks_all() {
        let collector = LoggingCollector::new("localhost:50051");
        assert_eq!(collector.endpoint(), "localhost:50051");
        let ack = collector
            .stream_events(vec![sample_event("a"), sample_event("b"), sample_event("c")])
            .await
            .unwrap();
        assert_eq!(ack, StreamAck::accepted(3));
    }
}
