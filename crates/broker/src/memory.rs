//! In-process broker.
//!
//! Same settlement semantics as the Redpanda backend, without durability.
//! Used by the integration tests and by `kind = "memory"` for local runs.

use crate::{Broker, Delivery, QueueConsumer, QueuePublisher};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use pipeline_core::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// A message parked in a dead-letter queue.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub queue: String,
    pub payload: Vec<u8>,
    pub reason: String,
    pub attempts: u32,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    next_tag: i64,
    /// Every payload ever published, in order.
    published: Vec<Vec<u8>>,
}

struct Inner {
    queues: Mutex<HashMap<String, QueueState>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    notify: Notify,
    dead_letter_suffix: String,
    max_wait: Duration,
    failing_publishes: AtomicU32,
    failing_dead_letters: AtomicU32,
}

impl Inner {
    fn push(&self, queue: &str, payload: Vec<u8>) {
        {
            let mut queues = self.queues.lock();
            let state = queues.entry(queue.to_string()).or_default();
            let tag = state.next_tag;
            state.next_tag += 1;
            state.published.push(payload.clone());
            state.ready.push_back(Delivery {
                queue: queue.to_string(),
                payload,
                delivery_tag: tag,
                attempt: 1,
                published_at: Utc::now(),
            });
        }
        self.notify.notify_waiters();
    }

    /// Puts a settled delivery back at the head of its queue.
    fn push_front(&self, delivery: Delivery) {
        self.queues
            .lock()
            .entry(delivery.queue.clone())
            .or_default()
            .ready
            .push_front(delivery);
        self.notify.notify_waiters();
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn pop(&self, queue: &str) -> Option<Delivery> {
        self.queues
            .lock()
            .get_mut(queue)
            .and_then(|state| state.ready.pop_front())
    }
}

/// Broker keeping every queue in memory. Clones share the same queues.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_settings(".dead_letter", Duration::from_millis(100))
    }

    /// Creates a broker with the given dead-letter suffix and receive wait.
    pub fn with_settings(dead_letter_suffix: impl Into<String>, max_wait: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                dead_letters: Mutex::new(Vec::new()),
                notify: Notify::new(),
                dead_letter_suffix: dead_letter_suffix.into(),
                max_wait,
                failing_publishes: AtomicU32::new(0),
                failing_dead_letters: AtomicU32::new(0),
            }),
        }
    }

    /// Makes the next `n` publishes fail with a transport error.
    pub fn fail_next_publishes(&self, n: u32) {
        self.inner.failing_publishes.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` dead-letter copies fail with a transport error.
    pub fn fail_next_dead_letters(&self, n: u32) {
        self.inner.failing_dead_letters.store(n, Ordering::SeqCst);
    }

    /// Payloads waiting to be received on `queue`.
    pub fn pending(&self, queue: &str) -> Vec<Vec<u8>> {
        self.inner
            .queues
            .lock()
            .get(queue)
            .map(|state| state.ready.iter().map(|d| d.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Every payload ever published to `queue`.
    pub fn published(&self, queue: &str) -> Vec<Vec<u8>> {
        self.inner
            .queues
            .lock()
            .get(queue)
            .map(|state| state.published.clone())
            .unwrap_or_default()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.lock().clone()
    }

    /// Opens a consumer on `queue`.
    pub fn consumer_for(&self, queue: &str) -> MemoryConsumer {
        MemoryConsumer {
            inner: self.inner.clone(),
            queue: queue.to_string(),
            in_flight: Mutex::new(None),
        }
    }
}

#[async_trait]
impl QueuePublisher for MemoryBroker {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        if Inner::take_failure(&self.inner.failing_publishes) {
            metrics().publish_errors.inc();
            return Err(Error::transport(format!("publish to {queue} refused")));
        }

        self.inner.push(queue, payload);
        metrics().messages_published.inc();
        debug!(queue = %queue, "Published message");
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare(&self, queue: &str) -> Result<()> {
        self.inner
            .queues
            .lock()
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn consumer(&self, queue: &str) -> Result<Arc<dyn QueueConsumer>> {
        self.declare(queue).await?;
        Ok(Arc::new(self.consumer_for(queue)))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Consumer on a [`MemoryBroker`] queue.
pub struct MemoryConsumer {
    inner: Arc<Inner>,
    queue: String,
    in_flight: Mutex<Option<i64>>,
}

impl MemoryConsumer {
    fn settle(&self, delivery: &Delivery) -> Result<()> {
        let mut in_flight = self.in_flight.lock();
        if *in_flight != Some(delivery.delivery_tag) {
            return Err(Error::internal(format!(
                "delivery {} on {} is not in flight",
                delivery.delivery_tag, self.queue
            )));
        }
        *in_flight = None;
        Ok(())
    }
}

fn redelivery(delivery: &Delivery) -> Delivery {
    let mut next = delivery.clone();
    next.attempt += 1;
    next
}

#[async_trait]
impl QueueConsumer for MemoryConsumer {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn receive(&self) -> Result<Option<Delivery>> {
        if let Some(tag) = *self.in_flight.lock() {
            return Err(Error::internal(format!(
                "delivery {tag} on {} has not been settled",
                self.queue
            )));
        }

        let deadline = tokio::time::Instant::now() + self.inner.max_wait;
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.inner.pop(&self.queue) {
                *self.in_flight.lock() = Some(delivery.delivery_tag);
                metrics().messages_consumed.inc();
                return Ok(Some(delivery));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.settle(delivery)?;
        metrics().messages_acked.inc();
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<()> {
        self.settle(delivery)?;

        self.inner.push_front(redelivery(delivery));

        metrics().messages_requeued.inc();
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()> {
        self.settle(delivery)?;

        let dead_letter_queue = format!("{}{}", self.queue, self.inner.dead_letter_suffix);
        if Inner::take_failure(&self.inner.failing_dead_letters) {
            self.inner.push_front(redelivery(delivery));
            metrics().messages_requeued.inc();
            warn!(
                queue = %self.queue,
                tag = delivery.delivery_tag,
                "Dead-letter publish failed, released delivery"
            );
            return Err(Error::transport(format!(
                "publish to {dead_letter_queue} refused"
            )));
        }

        self.inner.push(&dead_letter_queue, delivery.payload.clone());
        self.inner.dead_letters.lock().push(DeadLetter {
            queue: self.queue.clone(),
            payload: delivery.payload.clone(),
            reason: reason.to_string(),
            attempts: delivery.attempt,
        });

        metrics().messages_dead_lettered.inc();
        warn!(
            queue = %self.queue,
            dead_letter_queue = %dead_letter_queue,
            reason = %reason,
            "Dead-lettered delivery"
        );
        Ok(())
    }
}
