// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process transport that keeps events in memory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::TransportError;
use crate::event::TelemetryEvent;
use crate::telemetry::metrics::names;
use crate::telemetry::{Metrics, MetricsSink};

use super::TelemetryTransport;

/// Transport that stores every recorded event.
///
/// Metrics go to a private [`Metrics`] instance so that concurrent tests do
/// not see each other's counters. Setting it unavailable makes `record` fail
/// the way a closed queue would.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    events: Mutex<Vec<TelemetryEvent>>,
    metrics: Arc<Metrics>,
    unavailable: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing metrics registry.
    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            ..Self::default()
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of recorded events, oldest first.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return all recorded events.
    pub fn take(&self) -> Vec<TelemetryEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// The metrics registry this transport reports to.
    pub fn registry(&self) -> &Metrics {
        &self.metrics
    }
}

impl TelemetryTransport for MemoryTransport {
    fn metrics(&self) -> &dyn MetricsSink {
        &*self.metrics
    }

    fn record(&self, event: TelemetryEvent) -> Result<(), TransportError> {
        if self.unavailable.load(Ordering::SeqCst) {
            self.metrics.increment(names::TELEMETRY_DROPPED);
            return Err(TransportError::Closed);
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}
