//! Redpanda-backed broker: publishing with bounded retries, and partition
//! ownership for consumers.

use crate::config::BrokerConfig;
use crate::connection::{connect, declare_queue};
use crate::consumer::RedpandaConsumer;
use crate::queues::QueueNames;
use crate::{Broker, QueueConsumer, QueuePublisher};
use async_trait::async_trait;
use chrono::Utc;
use pipeline_core::{Error, Result};
use rskafka::client::partition::{Compression, PartitionClient, UnknownTopicHandling};
use rskafka::client::Client;
use parking_lot::Mutex;
use rskafka::record::Record;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Builds a record carrying `payload` and `headers`.
pub(crate) fn record(payload: Vec<u8>, headers: BTreeMap<String, Vec<u8>>) -> Record {
    Record {
        key: None,
        value: Some(payload),
        headers,
        timestamp: Utc::now(),
    }
}

/// Produces one record and returns its offset.
pub(crate) async fn produce_one(
    client: &PartitionClient,
    payload: Vec<u8>,
    headers: BTreeMap<String, Vec<u8>>,
) -> Result<i64> {
    let offsets = client
        .produce(vec![record(payload, headers)], Compression::NoCompression)
        .await
        .map_err(|e| Error::transport(format!("failed to produce: {e}")))?;

    offsets
        .first()
        .copied()
        .ok_or_else(|| Error::transport("broker returned no offset for produced record"))
}

/// Opens a partition client for one partition of `queue`, declaring the
/// queue first.
pub(crate) async fn queue_partition(
    client: &Client,
    config: &BrokerConfig,
    queue: &str,
    partition: i32,
) -> Result<PartitionClient> {
    let ids = declare_queue(client, config, queue).await?;
    if !ids.contains(&partition) {
        return Err(Error::config(format!(
            "queue {queue} has no partition {partition}"
        )));
    }

    client
        .partition_client(queue.to_string(), partition, UnknownTopicHandling::Retry)
        .await
        .map_err(|e| Error::transport(format!("failed to open queue {queue}: {e}")))
}

/// Hands out partitions of a queue to consumers, one each.
#[derive(Debug, Default)]
pub struct PartitionClaims {
    claimed: Mutex<BTreeMap<String, BTreeSet<i32>>>,
}

impl PartitionClaims {
    /// Claims the lowest unclaimed partition of `queue` among `available`.
    pub fn claim(&self, queue: &str, available: &[i32]) -> Result<i32> {
        let mut claimed = self.claimed.lock();
        let taken = claimed.entry(queue.to_string()).or_default();

        let free = available
            .iter()
            .copied()
            .filter(|p| !taken.contains(p))
            .min()
            .ok_or_else(|| {
                Error::config(format!(
                    "queue {queue} has {} partitions, all owned by other consumers",
                    available.len()
                ))
            })?;
        taken.insert(free);
        Ok(free)
    }

    /// Returns a partition, e.g. when its consumer failed to connect.
    pub fn release(&self, queue: &str, partition: i32) {
        if let Some(taken) = self.claimed.lock().get_mut(queue) {
            taken.remove(&partition);
        }
    }
}

/// Broker on a Kafka-compatible cluster.
///
/// Each queue is a topic with `partitions` partitions. Publishes rotate over
/// them; each consumer owns exactly one, so consumers of a queue compete for
/// its messages. Ordering holds per partition. The publishing connection is
/// shared; every consumer gets its own.
pub struct RedpandaBroker {
    config: BrokerConfig,
    queues: QueueNames,
    client: RwLock<Option<Arc<Client>>>,
    /// Partition ids per queue
    layouts: RwLock<BTreeMap<String, Vec<i32>>>,
    /// Cached partition clients per queue and partition
    partitions: RwLock<BTreeMap<(String, i32), Arc<PartitionClient>>>,
    next_partition: AtomicUsize,
    claims: PartitionClaims,
}

impl RedpandaBroker {
    pub fn new(config: BrokerConfig, queues: QueueNames) -> Self {
        info!(
            brokers = %config.broker_string(),
            tls = config.sasl_credentials().is_some(),
            "Creating Redpanda broker"
        );

        Self {
            config,
            queues,
            client: RwLock::new(None),
            layouts: RwLock::new(BTreeMap::new()),
            partitions: RwLock::new(BTreeMap::new()),
            next_partition: AtomicUsize::new(0),
            claims: PartitionClaims::default(),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    async fn client(&self) -> Result<Arc<Client>> {
        {
            let client = self.client.read().await;
            if let Some(ref c) = *client {
                return Ok(c.clone());
            }
        }

        let client = Arc::new(connect(&self.config).await?);
        *self.client.write().await = Some(client.clone());
        Ok(client)
    }

    /// Partition ids of `queue`, declaring it on first use.
    async fn layout(&self, queue: &str) -> Result<Vec<i32>> {
        if let Some(ids) = self.layouts.read().await.get(queue) {
            return Ok(ids.clone());
        }

        let client = self.client().await?;
        let ids = declare_queue(&client, &self.config, queue).await?;
        if ids.is_empty() {
            return Err(Error::transport(format!("queue {queue} has no partitions")));
        }

        self.layouts
            .write()
            .await
            .insert(queue.to_string(), ids.clone());
        Ok(ids)
    }

    /// Gets or creates the partition client for one partition of a queue.
    async fn partition(&self, queue: &str, partition: i32) -> Result<Arc<PartitionClient>> {
        let cache_key = (queue.to_string(), partition);
        if let Some(client) = self.partitions.read().await.get(&cache_key) {
            return Ok(client.clone());
        }

        let client = self.client().await?;
        let partition_client =
            Arc::new(queue_partition(&client, &self.config, queue, partition).await?);

        self.partitions
            .write()
            .await
            .insert(cache_key, partition_client.clone());
        Ok(partition_client)
    }

    /// Drops cached connections so the next attempt reconnects.
    async fn reset(&self, queue: &str) {
        self.layouts.write().await.remove(queue);
        self.partitions.write().await.retain(|(q, _), _| q != queue);
        *self.client.write().await = None;
    }

    async fn try_publish(&self, queue: &str, payload: Vec<u8>) -> Result<i64> {
        let ids = self.layout(queue).await?;
        let slot = self.next_partition.fetch_add(1, Ordering::Relaxed) % ids.len();
        let partition = self.partition(queue, ids[slot]).await?;
        produce_one(&partition, payload, BTreeMap::new()).await
    }
}

#[async_trait]
impl QueuePublisher for RedpandaBroker {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.try_publish(queue, payload.clone()).await {
                Ok(offset) => {
                    let elapsed = start.elapsed();
                    metrics().messages_published.inc();
                    metrics()
                        .publish_latency_ms
                        .observe(elapsed.as_millis() as u64);

                    debug!(
                        queue = %queue,
                        offset = offset,
                        attempt = attempt,
                        latency_ms = %elapsed.as_millis(),
                        "Published message"
                    );
                    return Ok(());
                }
                Err(e) if attempt <= self.config.retries => {
                    warn!(
                        queue = %queue,
                        attempt = attempt,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    self.reset(queue).await;
                    tokio::time::sleep(self.config.backoff(attempt)).await;
                }
                Err(e) => {
                    metrics().publish_errors.inc();
                    error!(queue = %queue, attempts = attempt, error = %e, "Publish failed");
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl Broker for RedpandaBroker {
    async fn declare(&self, queue: &str) -> Result<()> {
        self.layout(queue).await.map(|_| ())
    }

    /// Opens a consumer owning the next free partition of `queue`. Fails
    /// with a config error once every partition has an owner.
    async fn consumer(&self, queue: &str) -> Result<Arc<dyn QueueConsumer>> {
        let ids = self.layout(queue).await?;
        let partition = self.claims.claim(queue, &ids)?;

        match RedpandaConsumer::connect(
            self.config.clone(),
            queue,
            partition,
            self.queues.dead_letter(queue),
        )
        .await
        {
            Ok(consumer) => Ok(Arc::new(consumer)),
            Err(e) => {
                self.claims.release(queue, partition);
                Err(e)
            }
        }
    }

    async fn health_check(&self) -> bool {
        crate::health::check_connection(&self.config).await
    }
}
