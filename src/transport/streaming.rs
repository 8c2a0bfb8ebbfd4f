// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bounded-queue transport with a background shipper.
//!
//! `record` pushes into a bounded channel with `try_send` and returns
//! immediately. A [`Shipper`] task drains the channel and streams batches to
//! the collector when a batch fills up, when the flush interval ticks, and
//! once more on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::TransportError;
use crate::event::TelemetryEvent;
use crate::telemetry::metrics::names;
use crate::telemetry::{Metrics, MetricsSink};

use super::collector::CollectorClient;
use super::TelemetryTransport;

/// Queue and batching knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct ShipperConfig {
    /// Events held in memory before new ones are dropped.
    pub queue_capacity: usize,
    /// Events per client stream.
    pub batch_size: usize,
    /// Upper bound on how long an event waits in a partial batch.
    pub flush_interval: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
        }
    }
}

impl ShipperConfig {
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval,
        }
    }
}

/// Delivery counts reported when the shipper stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShipperStats {
    pub events_shipped: u64,
    pub batches_shipped: u64,
    pub events_failed: u64,
    pub batches_failed: u64,
}

/// Producer side of the telemetry queue.
#[derive(Debug, Clone)]
pub struct StreamingTransport {
    tx: mpsc::Sender<TelemetryEvent>,
    metrics: Arc<Metrics>,
}

impl StreamingTransport {
    /// Create the queue and spawn its shipper on the current tokio runtime.
    pub fn spawn(
        config: ShipperConfig,
        client: Arc<dyn CollectorClient>,
        metrics: Arc<Metrics>,
    ) -> (Self, ShipperHandle) {
        let (transport, shipper) = Self::new(config, client, metrics);
        let handle = shipper.spawn();
        (transport, handle)
    }

    /// Create the queue and its (not yet running) shipper.
    pub fn new(
        config: ShipperConfig,
        client: Arc<dyn CollectorClient>,
        metrics: Arc<Metrics>,
    ) -> (Self, Shipper) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let transport = Self {
            tx,
            metrics: Arc::clone(&metrics),
        };
        let shipper = Shipper {
            rx,
            client,
            metrics,
            config,
            shutdown: Arc::new(Notify::new()),
            stats: ShipperStats::default(),
        };
        (transport, shipper)
    }

    /// Free slots left in the queue.
    pub fn remaining_capacity(&self) -> usize {
        self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl TelemetryTransport for StreamingTransport {
    fn metrics(&self) -> &dyn MetricsSink {
        &*self.metrics
    }

    fn record(&self, event: TelemetryEvent) -> Result<(), TransportError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.metrics.increment(names::TELEMETRY_DROPPED);
                warn!(request_id = %event.request_id, "Telemetry queue full, dropping event");
                Err(TransportError::QueueFull(event.request_id))
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.metrics.increment(names::TELEMETRY_DROPPED);
                warn!(request_id = %event.request_id, "Telemetry shipper stopped, dropping event");
                Err(TransportError::Closed)
            }
        }
    }
}

/// Consumer side: drains the queue into collector streams.
pub struct Shipper {
    rx: mpsc::Receiver<TelemetryEvent>,
    client: Arc<dyn CollectorClient>,
    metrics: Arc<Metrics>,
    config: ShipperConfig,
    shutdown: Arc<Notify>,
    stats: ShipperStats,
}

impl Shipper {
    /// Run on the current tokio runtime.
    pub fn spawn(self) -> ShipperHandle {
        let shutdown = Arc::clone(&self.shutdown);
        let task = tokio::spawn(self.run());
        ShipperHandle { shutdown, task }
    }

    /// Ship until every producer is gone or shutdown is requested.
    pub async fn run(mut self) -> ShipperStats {
        let batch_size = self.config.batch_size.max(1);
        let mut ticker = interval(self.config.flush_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        info!(
            endpoint = %self.client.endpoint(),
            batch_size,
            flush_interval_ms = self.config.flush_interval.as_millis() as u64,
            "Telemetry shipper started"
        );

        let shutdown = Arc::clone(&self.shutdown);
        let mut batch = Vec::with_capacity(batch_size);
        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(event) => {
                        batch.push(event);
                        if batch.len() >= batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => self.flush(&mut batch).await,
                _ = shutdown.notified() => {
                    self.rx.close();
                    while let Some(event) = self.rx.recv().await {
                        batch.push(event);
                        if batch.len() >= batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    break;
                }
            }
        }

        self.flush(&mut batch).await;
        info!(
            events = self.stats.events_shipped,
            batches = self.stats.batches_shipped,
            failed_batches = self.stats.batches_failed,
            "Telemetry shipper stopped"
        );
        self.stats
    }

    async fn flush(&mut self, batch: &mut Vec<TelemetryEvent>) {
        if batch.is_empty() {
            return;
        }

        let events = std::mem::take(batch);
        let count = events.len() as u64;
        match self.client.stream_events(events).await {
            Ok(ack) => {
                self.stats.events_shipped += count;
                self.stats.batches_shipped += 1;
                self.metrics.increment_by(names::TELEMETRY_SHIPPED, count);
                if ack.accepted < count {
                    debug!(
                        sent = count,
                        accepted = ack.accepted,
                        message = ack.message.as_deref().unwrap_or(""),
                        "Collector accepted a partial batch"
                    );
                }
            }
            Err(err) => {
                self.stats.events_failed += count;
                self.stats.batches_failed += 1;
                self.metrics.increment(names::TELEMETRY_BATCHES_FAILED);
                warn!(events = count, error = %err, "Telemetry batch not delivered");
            }
        }
    }
}

/// Handle to a running shipper.
#[derive(Debug)]
pub struct ShipperHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<ShipperStats>,
}

impl ShipperHandle {
    /// Stop accepting events, ship what is queued, and wait for the task.
    pub async fn shutdown(self) -> Result<ShipperStats, TransportError> {
        self.shutdown.notify_one();
        self.task
            .await
            .map_err(|e| TransportError::Stream(format!("shipper task failed: {e}")))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LlmInteraction;
    use crate::transport::MemoryCollector;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn event(request_id: &str) -> TelemetryEvent {
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

    fn config(queue_capacity: usize, batch_size: usize, flush_ms: u64) -> ShipperConfig {
        ShipperConfig {
            queue_capacity,
            batch_size,
            flush_interval: Duration::from_millis(flush_ms),
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let metrics = Arc::new(Metrics::new());
        let collector = Arc::new(MemoryCollector::new());
        let (transport, _shipper) = StreamingTransport::new(config(2, 10, 1000), collector, metrics.clone());

        assert!(transport.record(event("a")).is_ok());
        assert!(transport.record(event("b")).is_ok());
        let err = transport.record(event("c")).unwrap_err();

        assert!(matches!(err, TransportError::QueueFull(ref id) if id == "c"));
        assert!(err.is_drop());
        assert_eq!(metrics.counter(names::TELEMETRY_DROPPED), 1);
    }

    #[tokio::test]
    async fn test_closed_queue_drops() {
        let metrics = Arc::new(Metrics::new());
        let collector = Arc::new(MemoryCollector::new());
        let (transport, shipper) = StreamingTransport::new(config(4, 10, 1000), collector, metrics.clone());
        drop(shipper);

        assert!(transport.is_closed());
        assert!(matches!(transport.record(event("a")), Err(TransportError::Closed)));
        assert_eq!(metrics.counter(names::TELEMETRY_DROPPED), 1);
    }

    #[tokio::test]
    async fn test_batches_on_size_threshold() {
        let metrics = Arc::new(Metrics::new());
        let collector = Arc::new(MemoryCollector::new());
        let (transport, handle) =
            StreamingTransport::spawn(config(100, 3, 60_000), collector.clone(), metrics.clone());

        for i in 0..7 {
            transport.record(event(&format!("e{i}"))).unwrap();
        }
        let stats = handle.shutdown().await.unwrap();

        assert_eq!(stats.events_shipped, 7);
        assert_eq!(collector.batch_sizes(), vec![3, 3, 1]);
        assert_eq!(metrics.counter(names::TELEMETRY_SHIPPED), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_interval() {
        let metrics = Arc::new(Metrics::new());
        let collector = Arc::new(MemoryCollector::new());
        let (transport, handle) =
            StreamingTransport::spawn(config(100, 50, 200), collector.clone(), metrics);

        transport.record(event("a")).unwrap();
        transport.record(event("b")).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(collector.batch_sizes(), vec![2]);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_flushes_when_producers_gone() {
        let metrics = Arc::new(Metrics::new());
        let collector = Arc::new(MemoryCollector::new());
        let (transport, shipper) =
            StreamingTransport::new(config(100, 50, 60_000), collector.clone(), metrics);

        transport.record(event("a")).unwrap();
        drop(transport);
        let stats = shipper.run().await;

        assert_eq!(stats.events_shipped, 1);
        assert_eq!(collector.events()[0].request_id, "a");
    }

    #[tokio::test]
    async fn test_failed_batches_counted() {
        let metrics = Arc::new(Metrics::new());
        let collector = Arc::new(MemoryCollector::new());
        collector.set_failing(true);
        let (transport, handle) =
            StreamingTransport::spawn(config(100, 2, 60_000), collector.clone(), metrics.clone());

        for i in 0..4 {
            transport.record(event(&format!("e{i}"))).unwrap();
        }
        let stats = handle.shutdown().await.unwrap();

        assert_eq!(stats.batches_failed, 2);
        assert_eq!(stats.events_failed, 4);
        assert_eq!(stats.events_shipped, 0);
        assert_eq!(metrics.counter(names::TELEMETRY_BATCHES_FAILED), 2);
    }

    #[tokio::test]
    async fn test_record_after_shutdown_is_dropped() {
        let metrics = Arc::new(Metrics::new());
        let collector = Arc::new(MemoryCollector::new());
        let (transport, handle) =
            StreamingTransport::spawn(config(10, 5, 60_000), collector, metrics.clone());

        handle.shutdown().await.unwrap();
        assert!(matches!(transport.record(event("late")), Err(TransportError::Closed)));
        assert_eq!(metrics.counter(names::TELEMETRY_DROPPED), 1);
    }
}
