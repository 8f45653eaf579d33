//! Durable named work queues for the georeport pipeline.
//!
//! Stages exchange JSON payloads through queues with at-least-once delivery.
//! A consumer holds at most one unsettled delivery and settles it in one of
//! three ways: ack, requeue, or dead-letter.
//!
//! Two backends implement the traits: [`RedpandaBroker`] maps every queue to
//! a topic on a Kafka-compatible cluster, with one partition per consumer and
//! positions committed durably, and [`MemoryBroker`] keeps queues in process
//! for tests and local runs.

pub mod config;
pub mod connection;
pub mod consumer;
pub mod cursor;
pub mod health;
pub mod memory;
pub mod offsets;
pub mod producer;
pub mod queues;

pub use config::*;
pub use consumer::*;
pub use cursor::CommittedPosition;
pub use memory::*;
pub use producer::*;
pub use queues::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline_core::Result;
use std::sync::Arc;

/// A message handed to a consumer, not yet settled.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Queue the message was read from.
    pub queue: String,
    pub payload: Vec<u8>,
    /// Broker-assigned position; unique per consumer.
    pub delivery_tag: i64,
    /// 1 on first delivery, incremented on every requeue.
    pub attempt: u32,
    pub published_at: DateTime<Utc>,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

/// Publishes payloads onto a named queue.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Publishes one message. Returns a transport error once retries are
    /// exhausted.
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()>;
}

/// Reads and settles messages from a single queue.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    fn queue(&self) -> &str;

    /// Waits up to the configured fetch deadline for the next message.
    async fn receive(&self) -> Result<Option<Delivery>>;

    /// Marks the delivery as processed.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Returns the delivery to the head of the queue for another attempt.
    async fn requeue(&self, delivery: &Delivery) -> Result<()>;

    /// Copies the delivery to the queue's dead-letter queue, then acks it.
    /// When the copy fails the delivery is requeued and the error returned.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()>;
}

/// A broker backend: publishes, hands out consumers, reports health.
#[async_trait]
pub trait Broker: QueuePublisher {
    /// Declares the queue durable, creating it when absent.
    async fn declare(&self, queue: &str) -> Result<()>;

    /// Opens a dedicated consumer for one queue.
    async fn consumer(&self, queue: &str) -> Result<Arc<dyn QueueConsumer>>;

    async fn health_check(&self) -> bool;
}
