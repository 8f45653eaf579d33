//! Worker configuration.

use crate::consumer::ConsumerWorkerConfig;
use crate::ledger::DeliveryLedger;
use broker::BrokerConfig;
use pipeline_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the queue consumers and the stages they run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Run the queue consumers in this process
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Concurrent consumers per queue, each with its own connection
    #[serde(default = "default_consumers_per_queue")]
    pub consumers_per_queue: usize,
    /// Deliveries of one message before it is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before a requeue, multiplied by the attempt number
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Upper bound on a single requeue backoff
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Deadline for computing one raster's metadata
    #[serde(default = "default_compute_timeout_secs")]
    pub compute_timeout_secs: u64,
    /// Raster decodes allowed on the blocking pool at once
    #[serde(default = "default_max_concurrent_computes")]
    pub max_concurrent_computes: usize,
    /// Suppress repeat report emails for identical deliveries
    #[serde(default = "default_ledger_enabled")]
    pub ledger_enabled: bool,
    /// How long a sent report is remembered
    #[serde(default = "default_ledger_ttl_secs")]
    pub ledger_ttl_secs: u64,
    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: u64,
    /// Interval for logging a metrics snapshot
    #[serde(default = "default_metrics_log_interval_secs")]
    pub metrics_log_interval_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_consumers_per_queue() -> usize {
    1
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_compute_timeout_secs() -> u64 {
    600
}

fn default_max_concurrent_computes() -> usize {
    2
}

fn default_ledger_enabled() -> bool {
    true
}

fn default_ledger_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_ledger_capacity() -> u64 {
    100_000
}

fn default_metrics_log_interval_secs() -> u64 {
    60
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            consumers_per_queue: default_consumers_per_queue(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            compute_timeout_secs: default_compute_timeout_secs(),
            max_concurrent_computes: default_max_concurrent_computes(),
            ledger_enabled: default_ledger_enabled(),
            ledger_ttl_secs: default_ledger_ttl_secs(),
            ledger_capacity: default_ledger_capacity(),
            metrics_log_interval_secs: default_metrics_log_interval_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn compute_timeout(&self) -> Duration {
        Duration::from_secs(self.compute_timeout_secs)
    }

    pub fn ledger_ttl(&self) -> Duration {
        Duration::from_secs(self.ledger_ttl_secs)
    }

    /// Ledger as configured; a disabled ledger never suppresses a send.
    pub fn ledger(&self) -> DeliveryLedger {
        if self.ledger_enabled {
            DeliveryLedger::new(self.ledger_ttl(), self.ledger_capacity)
        } else {
            DeliveryLedger::disabled()
        }
    }

    /// Refuses more consumers per queue than the broker keeps apart. Only
    /// checked when the consumers run in this process.
    pub fn check_consumer_count(&self, broker: &BrokerConfig) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        match broker.max_consumers_per_queue() {
            Some(max) if self.consumers_per_queue > max => Err(Error::config(format!(
                "workers.consumers_per_queue is {} but queues have {max} partitions; \
                 raise broker.partitions or lower the consumer count",
                self.consumers_per_queue
            ))),
            _ => Ok(()),
        }
    }

    pub fn consumer_config(&self) -> ConsumerWorkerConfig {
        ConsumerWorkerConfig {
            max_attempts: self.max_attempts.max(1),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ..ConsumerWorkerConfig::default()
        }
    }
}
