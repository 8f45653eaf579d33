//! Redpanda consumer for one partition of a queue.
//!
//! Uses rskafka with:
//! - One dedicated connection per consumer
//! - Exclusive ownership of a single partition, so consumers of a queue
//!   never see the same record
//! - Prefetch of one: nothing new is fetched while a delivery is unsettled
//! - Positions committed to the offsets topic on every settlement and
//!   restored on connect
//! - Requeue by re-reading the same offset with a higher attempt number

use crate::config::{BrokerConfig, StartOffset};
use crate::connection::connect;
use crate::cursor::{CommittedPosition, Cursor};
use crate::offsets::{position_key, OffsetStore};
use crate::producer::{produce_one, queue_partition};
use crate::queues::header;
use crate::{Delivery, QueueConsumer};
use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline_core::{Error, Result};
use rskafka::client::partition::{OffsetAt, PartitionClient};
use rskafka::client::Client;
use std::collections::BTreeMap;
use telemetry::metrics;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Consumer reading one partition of a queue from Redpanda.
pub struct RedpandaConsumer {
    config: BrokerConfig,
    queue: String,
    dead_letter_queue: String,
    client: Client,
    partition: PartitionClient,
    dead_letter: OnceCell<PartitionClient>,
    offsets: OffsetStore,
    position_key: String,
    cursor: Mutex<Cursor>,
}

impl RedpandaConsumer {
    /// Opens a dedicated connection and resumes from the committed position.
    pub async fn connect(
        config: BrokerConfig,
        queue: &str,
        partition_id: i32,
        dead_letter_queue: String,
    ) -> Result<Self> {
        let client = connect(&config).await?;
        let partition = queue_partition(&client, &config, queue, partition_id).await?;
        let offsets = OffsetStore::open(&client, &config).await?;
        let key = position_key(&config.consumer_group, queue, partition_id);

        let offset_err = |e: rskafka::client::error::Error| {
            Error::transport(format!("failed to get offset for {queue}: {e}"))
        };
        let earliest = partition
            .get_offset(OffsetAt::Earliest)
            .await
            .map_err(offset_err)?;

        let position = match offsets.load(&key).await? {
            Some(committed) if committed.next_offset >= earliest => committed,
            Some(committed) => {
                warn!(
                    queue = %queue,
                    partition = partition_id,
                    committed = committed.next_offset,
                    earliest = earliest,
                    "Committed offset is no longer retained, resuming at earliest"
                );
                CommittedPosition::at(earliest)
            }
            None => {
                let offset = match config.start_offset {
                    StartOffset::Earliest => earliest,
                    StartOffset::Latest => partition
                        .get_offset(OffsetAt::Latest)
                        .await
                        .map_err(offset_err)?,
                };
                CommittedPosition::at(offset)
            }
        };
        offsets.commit_or_warn(&key, position).await;

        info!(
            queue = %queue,
            partition = partition_id,
            offset = position.next_offset,
            attempts = position.attempts,
            "Consumer initialized at offset"
        );

        Ok(Self {
            config,
            queue: queue.to_string(),
            dead_letter_queue,
            client,
            partition,
            dead_letter: OnceCell::new(),
            offsets,
            position_key: key,
            cursor: Mutex::new(Cursor::new(queue, position)),
        })
    }

    /// Returns the current consumer offset.
    pub fn current_offset(&self) -> i64 {
        self.cursor.lock().next_offset()
    }

    pub fn partition_id(&self) -> i32 {
        self.partition.partition()
    }

    async fn dead_letter_partition(&self) -> Result<&PartitionClient> {
        self.dead_letter
            .get_or_try_init(|| {
                queue_partition(&self.client, &self.config, &self.dead_letter_queue, 0)
            })
            .await
    }

    async fn produce_dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<i64> {
        let partition = self.dead_letter_partition().await?;

        let headers = BTreeMap::from([
            (header::REASON.to_string(), reason.as_bytes().to_vec()),
            (header::ORIGINAL_QUEUE.to_string(), self.queue.as_bytes().to_vec()),
            (
                header::ATTEMPTS.to_string(),
                delivery.attempt.to_string().into_bytes(),
            ),
        ]);
        produce_one(partition, delivery.payload.clone(), headers).await
    }
}

#[async_trait]
impl QueueConsumer for RedpandaConsumer {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn receive(&self) -> Result<Option<Delivery>> {
        let current = {
            let cursor = self.cursor.lock();
            cursor.ensure_idle()?;
            cursor.next_offset()
        };

        let (records, _watermark) = self
            .partition
            .fetch_records(
                current,
                1..self.config.max_fetch_bytes,
                self.config.max_wait_ms as i32,
            )
            .await
            .map_err(|e| Error::transport(format!("failed to fetch from {}: {e}", self.queue)))?;

        // A fetch can start before the requested offset; skip those.
        for record in records.into_iter().filter(|r| r.offset >= current) {
            let Some(payload) = record.record.value else {
                warn!(queue = %self.queue, offset = record.offset, "Skipping record without value");
                self.cursor.lock().skip(record.offset);
                continue;
            };

            let attempt = self.cursor.lock().begin(record.offset)?;
            metrics().messages_consumed.inc();

            return Ok(Some(Delivery {
                queue: self.queue.clone(),
                payload,
                delivery_tag: record.offset,
                attempt,
                published_at: record.record.timestamp,
            }));
        }

        Ok(None)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let position = self.cursor.lock().complete(delivery.delivery_tag)?;
        self.offsets.commit_or_warn(&self.position_key, position).await;
        metrics().messages_acked.inc();

        debug!(
            queue = %self.queue,
            new_offset = position.next_offset,
            "Committed offset"
        );
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<()> {
        let position = self
            .cursor
            .lock()
            .release(delivery.delivery_tag, delivery.attempt)?;
        self.offsets.commit_or_warn(&self.position_key, position).await;
        metrics().messages_requeued.inc();

        debug!(
            queue = %self.queue,
            offset = delivery.delivery_tag,
            attempt = delivery.attempt,
            "Requeued delivery"
        );
        Ok(())
    }

    /// Parks the delivery on the dead-letter queue. When that publish
    /// fails, the delivery is released for another attempt so the
    /// partition keeps moving.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()> {
        self.cursor.lock().ensure_in_flight(delivery.delivery_tag)?;

        let dead_letter_offset = match self.produce_dead_letter(delivery, reason).await {
            Ok(offset) => offset,
            Err(e) => {
                let position = self
                    .cursor
                    .lock()
                    .release(delivery.delivery_tag, delivery.attempt)?;
                self.offsets.commit_or_warn(&self.position_key, position).await;
                metrics().messages_requeued.inc();
                warn!(
                    queue = %self.queue,
                    offset = delivery.delivery_tag,
                    error = %e,
                    "Dead-letter publish failed, released delivery"
                );
                return Err(e);
            }
        };

        let position = self.cursor.lock().complete(delivery.delivery_tag)?;
        self.offsets.commit_or_warn(&self.position_key, position).await;
        metrics().messages_dead_lettered.inc();

        warn!(
            queue = %self.queue,
            dead_letter_queue = %self.dead_letter_queue,
            offset = delivery.delivery_tag,
            dead_letter_offset = dead_letter_offset,
            reason = %reason,
            "Dead-lettered delivery"
        );
        Ok(())
    }
}
