//! Broker configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which broker backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// Kafka-compatible cluster (Redpanda, Kafka).
    Redpanda,
    /// In-process queues; nothing survives a restart.
    Memory,
}

/// Where a consumer starts reading when its consumer group has no committed
/// position for the partition yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    Earliest,
    Latest,
}

/// Broker connection and delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_kind")]
    pub kind: BrokerKind,
    /// Broker addresses
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
    /// SASL username (for cloud authentication)
    #[serde(default)]
    pub sasl_username: Option<String>,
    /// SASL password (for cloud authentication)
    #[serde(default)]
    pub sasl_password: Option<String>,
    /// Number of publish retries after the first attempt
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Retry backoff in milliseconds, multiplied by the attempt number
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Longest a fetch waits for a new message
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Upper bound on bytes returned by a single fetch
    #[serde(default = "default_max_fetch_bytes")]
    pub max_fetch_bytes: i32,
    #[serde(default = "default_start_offset")]
    pub start_offset: StartOffset,
    /// Partitions per queue topic. Each consumer owns one partition, so this
    /// bounds the consumers a queue can have.
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    /// Name under which consumer positions are committed
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic holding committed consumer positions
    #[serde(default = "default_offsets_topic")]
    pub offsets_topic: String,
    /// Replication factor used when a queue topic is created
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i16,
    /// Topic creation timeout in milliseconds
    #[serde(default = "default_create_timeout_ms")]
    pub create_timeout_ms: i32,
}

fn default_kind() -> BrokerKind {
    BrokerKind::Redpanda
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_max_wait_ms() -> u64 {
    1000
}

fn default_max_fetch_bytes() -> i32 {
    4 * 1024 * 1024
}

fn default_start_offset() -> StartOffset {
    StartOffset::Earliest
}

fn default_partitions() -> i32 {
    1
}

fn default_consumer_group() -> String {
    "georeport".to_string()
}

fn default_offsets_topic() -> String {
    "georeport.offsets".to_string()
}

fn default_replication_factor() -> i16 {
    1
}

fn default_create_timeout_ms() -> i32 {
    5000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            brokers: default_brokers(),
            sasl_username: None,
            sasl_password: None,
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_wait_ms: default_max_wait_ms(),
            max_fetch_bytes: default_max_fetch_bytes(),
            start_offset: default_start_offset(),
            partitions: default_partitions(),
            consumer_group: default_consumer_group(),
            offsets_topic: default_offsets_topic(),
            replication_factor: default_replication_factor(),
            create_timeout_ms: default_create_timeout_ms(),
        }
    }
}

impl BrokerConfig {
    /// Returns the broker list as a comma-separated string.
    pub fn broker_string(&self) -> String {
        self.brokers.join(",")
    }

    /// Both SASL credentials, when configured.
    pub fn sasl_credentials(&self) -> Option<(&str, &str)> {
        match (&self.sasl_username, &self.sasl_password) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    /// Backoff before publish attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Most consumers one queue can have on this backend, if bounded.
    pub fn max_consumers_per_queue(&self) -> Option<usize> {
        match self.kind {
            BrokerKind::Redpanda => Some(self.partitions.max(1) as usize),
            BrokerKind::Memory => None,
        }
    }
}
