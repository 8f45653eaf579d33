//! Durable consumer positions.
//!
//! Positions are records on a single-partition topic, keyed by
//! `<group>/<queue>/<partition>`; the latest record for a key wins. Loading
//! replays the topic once at startup and writes the result back, so
//! retention never drops the only copy of a live position.

use crate::config::BrokerConfig;
use crate::connection::declare_topic;
use crate::cursor::CommittedPosition;
use chrono::Utc;
use pipeline_core::{Error, Result};
use rskafka::client::partition::{Compression, OffsetAt, PartitionClient, UnknownTopicHandling};
use rskafka::client::Client;
use rskafka::record::Record;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Key a partition's position is committed under.
pub fn position_key(group: &str, queue: &str, partition: i32) -> String {
    format!("{group}/{queue}/{partition}")
}

/// Last decodable position recorded for `key`.
pub fn latest_position<'a>(
    records: impl IntoIterator<Item = (Option<&'a [u8]>, Option<&'a [u8]>)>,
    key: &str,
) -> Option<CommittedPosition> {
    records
        .into_iter()
        .filter(|(k, _)| *k == Some(key.as_bytes()))
        .filter_map(|(_, value)| value.and_then(|v| serde_json::from_slice(v).ok()))
        .last()
}

/// Reads and writes committed positions.
pub struct OffsetStore {
    partition: PartitionClient,
    max_fetch_bytes: i32,
    max_wait_ms: i32,
}

impl OffsetStore {
    pub async fn open(client: &Client, config: &BrokerConfig) -> Result<Self> {
        declare_topic(client, config, &config.offsets_topic, 1).await?;
        let partition = client
            .partition_client(config.offsets_topic.clone(), 0, UnknownTopicHandling::Retry)
            .await
            .map_err(|e| {
                Error::transport(format!(
                    "failed to open offsets topic {}: {e}",
                    config.offsets_topic
                ))
            })?;

        Ok(Self {
            partition,
            max_fetch_bytes: config.max_fetch_bytes,
            max_wait_ms: config.max_wait_ms as i32,
        })
    }

    /// Replays the offsets topic and returns the latest position for `key`.
    pub async fn load(&self, key: &str) -> Result<Option<CommittedPosition>> {
        let fetch_err = |e: rskafka::client::error::Error| {
            Error::transport(format!("failed to read committed offsets: {e}"))
        };
        let mut offset = self
            .partition
            .get_offset(OffsetAt::Earliest)
            .await
            .map_err(fetch_err)?;
        let end = self
            .partition
            .get_offset(OffsetAt::Latest)
            .await
            .map_err(fetch_err)?;

        let mut latest = None;
        while offset < end {
            let (records, _watermark) = self
                .partition
                .fetch_records(offset, 1..self.max_fetch_bytes, self.max_wait_ms)
                .await
                .map_err(fetch_err)?;
            let Some(last) = records.last().map(|r| r.offset) else {
                break;
            };

            let batch = records
                .iter()
                .filter(|r| r.offset >= offset)
                .map(|r| (r.record.key.as_deref(), r.record.value.as_deref()));
            if let Some(position) = latest_position(batch, key) {
                latest = Some(position);
            }
            offset = last + 1;
        }

        debug!(key = %key, position = ?latest, "Loaded committed position");
        Ok(latest)
    }

    pub async fn commit(&self, key: &str, position: CommittedPosition) -> Result<()> {
        let record = Record {
            key: Some(key.as_bytes().to_vec()),
            value: Some(serde_json::to_vec(&position)?),
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
        };

        self.partition
            .produce(vec![record], Compression::NoCompression)
            .await
            .map_err(|e| {
                Error::transport(format!("failed to commit offset for {key}: {e}"))
            })?;
        Ok(())
    }

    /// Commits, logging instead of failing. A lost commit only means the
    /// record is delivered again after a restart.
    pub async fn commit_or_warn(&self, key: &str, position: CommittedPosition) {
        if let Err(e) = self.commit(key, position).await {
            warn!(
                key = %key,
                next_offset = position.next_offset,
                error = %e,
                "Offset commit failed"
            );
        }
    }
}
