//! In-process metrics collection.
//!
//! Counters are global and lock-free; a snapshot is logged periodically and
//! exposed on the health endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        // Saturate at zero rather than wrapping.
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 10ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s, 30s, 60s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [10, 50, 100, 250, 500, 1000, 2500, 5000, 10000, 30000, 60000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (i, &bound) in Self::BUCKET_BOUNDS.iter().enumerate() {
            if ms <= bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        // Value exceeds all buckets, add to last
        self.buckets[10].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    /// Returns bucket counts.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    // Ingress
    pub webhooks_received: Counter,
    pub webhooks_rejected: Counter,
    pub webhooks_ignored: Counter,
    pub uploads_queued: Counter,
    pub actions_invoked: Counter,
    pub action_invoke_errors: Counter,

    // Broker
    pub messages_published: Counter,
    pub publish_errors: Counter,
    pub messages_consumed: Counter,
    pub messages_acked: Counter,
    pub messages_requeued: Counter,
    pub messages_dead_lettered: Counter,

    // Extraction stage
    pub downloads_failed: Counter,
    pub rasters_processed: Counter,
    pub rasters_failed: Counter,
    pub metadata_writes: Counter,

    // Report stage
    pub reports_sent: Counter,
    pub report_duplicates_skipped: Counter,
    pub narrative_fallbacks: Counter,
    pub mail_errors: Counter,

    // Latency histograms
    pub webhook_latency_ms: Histogram,
    pub publish_latency_ms: Histogram,
    pub extraction_latency_ms: Histogram,
    pub report_latency_ms: Histogram,

    // Gauges
    pub active_consumers: Gauge,
    pub in_flight_messages: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub webhooks_received: u64,
    pub webhooks_rejected: u64,
    pub webhooks_ignored: u64,
    pub uploads_queued: u64,
    pub messages_published: u64,
    pub publish_errors: u64,
    pub messages_consumed: u64,
    pub messages_acked: u64,
    pub messages_requeued: u64,
    pub messages_dead_lettered: u64,
    pub rasters_processed: u64,
    pub rasters_failed: u64,
    pub reports_sent: u64,
    pub report_duplicates_skipped: u64,
    pub mail_errors: u64,
    pub extraction_latency_mean_ms: f64,
    pub report_latency_mean_ms: f64,
    pub active_consumers: u64,
    pub in_flight_messages: u64,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            webhooks_received: self.webhooks_received.get(),
            webhooks_rejected: self.webhooks_rejected.get(),
            webhooks_ignored: self.webhooks_ignored.get(),
            uploads_queued: self.uploads_queued.get(),
            messages_published: self.messages_published.get(),
            publish_errors: self.publish_errors.get(),
            messages_consumed: self.messages_consumed.get(),
            messages_acked: self.messages_acked.get(),
            messages_requeued: self.messages_requeued.get(),
            messages_dead_lettered: self.messages_dead_lettered.get(),
            rasters_processed: self.rasters_processed.get(),
            rasters_failed: self.rasters_failed.get(),
            reports_sent: self.reports_sent.get(),
            report_duplicates_skipped: self.report_duplicates_skipped.get(),
            mail_errors: self.mail_errors.get(),
            extraction_latency_mean_ms: self.extraction_latency_ms.mean(),
            report_latency_mean_ms: self.report_latency_ms.mean(),
            active_consumers: self.active_consumers.get(),
            in_flight_messages: self.in_flight_messages.get(),
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
