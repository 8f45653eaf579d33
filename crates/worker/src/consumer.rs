//! Consumer worker: the receive → handle → settle loop for one queue.
//!
//! 1. Receive one delivery (prefetch of one)
//! 2. Hand it to the stage handler
//! 3. Settle from the handler's outcome: ack, requeue after backoff, or
//!    dead-letter
//! 4. Repeat until cancelled

use async_trait::async_trait;
use broker::{Delivery, QueueConsumer};
use pipeline_core::{Outcome, Result};
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Processes one delivery and says how to settle it.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, delivery: &Delivery) -> Outcome;
}

/// Consumer worker configuration.
#[derive(Debug, Clone)]
pub struct ConsumerWorkerConfig {
    /// Deliveries of one message before it is dead-lettered
    pub max_attempts: u32,
    /// Backoff before a requeue, multiplied by the attempt number
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
    /// Pause after a failed receive
    pub error_pause: Duration,
}

impl Default for ConsumerWorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            error_pause: Duration::from_secs(1),
        }
    }
}

impl ConsumerWorkerConfig {
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(attempt)
            .min(self.max_backoff)
    }
}

/// Worker that drives one queue consumer.
pub struct ConsumerWorker {
    consumer: Arc<dyn QueueConsumer>,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerWorkerConfig,
}

impl ConsumerWorker {
    pub fn new(
        consumer: Arc<dyn QueueConsumer>,
        handler: Arc<dyn MessageHandler>,
        config: ConsumerWorkerConfig,
    ) -> Self {
        Self {
            consumer,
            handler,
            config,
        }
    }

    /// Main run loop. Returns once `cancel` fires; a delivery already being
    /// handled is finished and settled first.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            queue = %self.consumer.queue(),
            handler = self.handler.name(),
            max_attempts = self.config.max_attempts,
            "Consumer worker starting"
        );
        metrics().active_consumers.inc();

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.consumer.receive() => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    if let Err(e) = self.process(delivery, &cancel).await {
                        error!(
                            queue = %self.consumer.queue(),
                            error = %e,
                            "Failed to settle delivery"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(queue = %self.consumer.queue(), error = %e, "Receive failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.error_pause) => {}
                    }
                }
            }
        }

        metrics().active_consumers.dec();
        info!(queue = %self.consumer.queue(), "Consumer worker stopped");
    }

    /// Receives and processes at most one delivery.
    pub async fn poll_once(&self) -> Result<Option<Outcome>> {
        match self.consumer.receive().await? {
            Some(delivery) => self
                .process(delivery, &CancellationToken::new())
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Handles one delivery and settles it. Returns the applied outcome.
    async fn process(&self, delivery: Delivery, cancel: &CancellationToken) -> Result<Outcome> {
        metrics().in_flight_messages.inc();
        let outcome = self.handler.handle(&delivery).await;
        let outcome = self.apply_attempt_limit(&delivery, outcome);
        let settled = self.settle(&delivery, &outcome, cancel).await;
        metrics().in_flight_messages.dec();

        settled.map(|_| outcome)
    }

    fn apply_attempt_limit(&self, delivery: &Delivery, outcome: Outcome) -> Outcome {
        match outcome {
            Outcome::Retry { reason } if delivery.attempt >= self.config.max_attempts => {
                Outcome::dead_letter(format!(
                    "gave up after {} attempts: {reason}",
                    delivery.attempt
                ))
            }
            other => other,
        }
    }

    async fn settle(
        &self,
        delivery: &Delivery,
        outcome: &Outcome,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let queue = self.consumer.queue();

        match outcome {
            Outcome::Ack => {
                debug!(queue = %queue, tag = delivery.delivery_tag, "Acknowledging delivery");
                self.consumer.ack(delivery).await
            }
            Outcome::Retry { reason } => {
                let backoff = self.config.backoff(delivery.attempt);
                warn!(
                    queue = %queue,
                    tag = delivery.delivery_tag,
                    attempt = delivery.attempt,
                    backoff_ms = %backoff.as_millis(),
                    reason = %reason,
                    "Requeueing delivery"
                );
                // Shutdown cuts the backoff short; the message is still requeued.
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(backoff) => {}
                }
                self.consumer.requeue(delivery).await
            }
            Outcome::DeadLetter { reason } => self.consumer.dead_letter(delivery, reason).await,
        }
    }
}
