//! Client construction and queue declaration shared by producer and consumer.

use crate::config::BrokerConfig;
use pipeline_core::{Error, Result};
use rskafka::client::{Client, ClientBuilder, Credentials, SaslConfig};
use std::sync::Arc;
use tracing::{debug, info};

/// Creates a TLS configuration for Redpanda Cloud.
fn create_tls_config() -> Arc<rustls::ClientConfig> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
}

/// Opens a new client connection.
///
/// TLS and SCRAM-SHA-256 are enabled together when SASL credentials are set.
pub async fn connect(config: &BrokerConfig) -> Result<Client> {
    let mut builder = ClientBuilder::new(config.brokers.clone());

    if let Some((username, password)) = config.sasl_credentials() {
        builder = builder
            .tls_config(create_tls_config())
            .sasl_config(SaslConfig::ScramSha256(Credentials::new(
                username.to_string(),
                password.to_string(),
            )));
    }

    builder.build().await.map_err(|e| {
        Error::transport(format!(
            "failed to connect to broker {}: {e}",
            config.broker_string()
        ))
    })
}

/// Partition ids of `topic`, or `None` when the topic does not exist.
pub async fn topic_partitions(client: &Client, topic: &str) -> Result<Option<Vec<i32>>> {
    let topics = client
        .list_topics()
        .await
        .map_err(|e| Error::transport(format!("failed to list topics: {e}")))?;
    Ok(topics
        .into_iter()
        .find(|t| t.name == topic)
        .map(|t| t.partitions.into_iter().collect()))
}

/// Ensures `topic` exists, creating it with `partitions` partitions.
///
/// Returns the partition ids the topic actually has, which can differ from
/// `partitions` when it was created elsewhere.
pub async fn declare_topic(
    client: &Client,
    config: &BrokerConfig,
    topic: &str,
    partitions: i32,
) -> Result<Vec<i32>> {
    if let Some(ids) = topic_partitions(client, topic).await? {
        debug!(topic = %topic, partitions = ids.len(), "Topic already declared");
        return Ok(ids);
    }

    let controller = client
        .controller_client()
        .map_err(|e| Error::transport(format!("failed to reach controller: {e}")))?;

    if let Err(e) = controller
        .create_topic(topic, partitions, config.replication_factor, config.create_timeout_ms)
        .await
    {
        // Another process may have created it between the listing and now.
        if topic_partitions(client, topic).await?.is_none() {
            return Err(Error::transport(format!(
                "failed to declare topic {topic}: {e}"
            )));
        }
    }

    info!(
        topic = %topic,
        partitions = partitions,
        replication_factor = config.replication_factor,
        "Declared topic"
    );

    topic_partitions(client, topic)
        .await?
        .ok_or_else(|| Error::transport(format!("topic {topic} vanished after creation")))
}

/// Ensures the topic backing `queue` exists and returns its partition ids.
pub async fn declare_queue(
    client: &Client,
    config: &BrokerConfig,
    queue: &str,
) -> Result<Vec<i32>> {
    declare_topic(client, config, queue, config.partitions.max(1)).await
}
