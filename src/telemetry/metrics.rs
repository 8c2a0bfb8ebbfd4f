// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for interception overhead and outcomes.
//!
//! Lightweight in-process counters and histograms keyed by name. A collector
//! backend can scrape [`Metrics::snapshot`]; nothing here does I/O.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| Arc::new(Metrics::new()));

/// Metric names emitted by the runtime.
pub mod names {
    pub const REQUESTS_INTERCEPTED: &str = "arc_requests_intercepted_total";
    pub const PATTERN_MATCHES: &str = "arc_pattern_matches_total";
    pub const FIXES_APPLIED: &str = "arc_fixes_applied_total";
    pub const REQUESTS_FAILED: &str = "arc_requests_failed_total";
    pub const INTERCEPTION_LATENCY_MS: &str = "arc_interception_latency_ms";
    pub const REQUEST_LATENCY_MS: &str = "arc_request_latency_ms";
    pub const INSTRUMENTATION_ERRORS: &str = "arc_instrumentation_errors_total";
    pub const TELEMETRY_DROPPED: &str = "arc_telemetry_dropped_total";
    pub const TELEMETRY_SHIPPED: &str = "arc_telemetry_events_shipped_total";
    pub const TELEMETRY_BATCHES_FAILED: &str = "arc_telemetry_batches_failed_total";
}

/// Where metric observations go.
pub trait MetricsSink: Send + Sync {
    fn increment_by(&self, name: &str, value: u64);

    fn record_histogram(&self, name: &str, value: f64);

    fn increment(&self, name: &str) {
        self.increment_by(name, 1);
    }
}

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    counters: RwLock<HashMap<String, AtomicU64>>,
    histograms: RwLock<HashMap<String, Histogram>>,
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Current value of a counter (0 if never incremented).
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Copy of a histogram, if it has observations.
    pub fn histogram(&self, name: &str) -> Option<Histogram> {
        self.histograms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, value)| (name.clone(), value.load(Ordering::Relaxed)))
            .collect();
        let histograms = self
            .histograms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, hist)| (name.clone(), hist.clone()))
            .collect();

        MetricsSnapshot {
            counters,
            histograms,
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.histograms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for Metrics {
    fn increment_by(&self, name: &str, value: u64) {
        {
            let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(counter) = counters.get(name) {
                counter.fetch_add(value, Ordering::Relaxed);
                return;
            }
        }

        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    fn record_histogram(&self, name: &str, value: f64) {
        self.histograms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .record(value);
    }
}

/// Fixed-bucket histogram over millisecond values.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    /// Upper bucket boundaries in milliseconds; the last bucket is +inf.
    buckets: Vec<f64>,
    counts: Vec<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Histogram {
    /// Create a histogram with custom bucket boundaries (in milliseconds).
    pub fn with_buckets(buckets: Vec<f64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self {
            buckets,
            counts,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: 0.0,
        }
    }

    /// Record a value. Negative and NaN values are clamped to zero.
    pub fn record(&mut self, value: f64) {
        let value = if value.is_nan() { 0.0 } else { value.max(0.0) };
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.buckets.len());
        self.counts[bucket_idx] += 1;
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Get counts for each bucket.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Get bucket boundaries.
    pub fn buckets(&self) -> &[f64] {
        &self.buckets
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn min(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Approximate percentile: the upper boundary of the bucket holding it.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }

        let target = (self.count as f64 * p / 100.0).ceil().max(1.0) as u64;
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return self.buckets.get(i).copied().unwrap_or(self.max);
            }
        }

        self.max
    }

    pub fn p50(&self) -> f64 {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> f64 {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // 0.1ms .. 10s
        Self::with_buckets(vec![
            0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1_000.0, 10_000.0,
        ])
    }
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, Histogram>,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Arc Runtime Metrics ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n\n", self.uptime));

        if !self.counters.is_empty() {
            report.push_str("Counters:\n");
            for (name, value) in &self.counters {
                report.push_str(&format!("  {}: {}\n", name, value));
            }
            report.push('\n');
        }

        if !self.histograms.is_empty() {
            report.push_str("Histograms:\n");
            for (name, hist) in &self.histograms {
                report.push_str(&format!(
                    "  {}: {} obs, mean {:.3}ms, p50 {:.3}ms, p99 {:.3}ms, max {:.3}ms\n",
                    name,
                    hist.count(),
                    hist.mean(),
                    hist.p50(),
                    hist.p99(),
                    hist.max()
                ));
            }
        }

        report
    }
}
