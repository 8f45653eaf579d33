//! Testcontainer setup for Redpanda and MinIO.
//!
//! Either service can be pointed at an existing instance through
//! `GEOREPORT_TEST_REDPANDA_BROKERS` or `GEOREPORT_TEST_MINIO_ENDPOINT`, in
//! which case no container is started.

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use broker::{BrokerConfig, BrokerKind};
use std::net::TcpListener;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use storage::StorageConfig;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

pub const MINIO_USER: &str = "minioadmin";
pub const MINIO_PASSWORD: &str = "minioadmin";

/// Name unique to this test run, for topics and buckets.
pub fn unique_name(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{prefix}-{nanos}")
}

/// Running Redpanda broker.
pub struct RedpandaContainer {
    #[allow(dead_code)]
    container: Option<ContainerAsync<GenericImage>>,
    pub brokers: String,
}

impl RedpandaContainer {
    pub async fn start() -> Self {
        if let Some(brokers) = std::env::var("GEOREPORT_TEST_REDPANDA_BROKERS")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            return Self {
                container: None,
                brokers,
            };
        }

        let (container, brokers) = start_redpanda().await;
        Self {
            container: Some(container),
            brokers,
        }
    }

    /// Broker config for a fresh consumer group, so runs never share
    /// committed positions.
    pub fn broker_config(&self, partitions: i32) -> BrokerConfig {
        BrokerConfig {
            kind: BrokerKind::Redpanda,
            brokers: vec![self.brokers.clone()],
            max_wait_ms: 200,
            partitions,
            consumer_group: unique_name("group"),
            offsets_topic: unique_name("offsets"),
            ..BrokerConfig::default()
        }
    }
}

/// Running MinIO server.
pub struct MinioContainer {
    #[allow(dead_code)]
    container: Option<ContainerAsync<GenericImage>>,
    pub endpoint: String,
}

impl MinioContainer {
    pub async fn start() -> Self {
        if let Some(endpoint) = std::env::var("GEOREPORT_TEST_MINIO_ENDPOINT")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            return Self {
                container: None,
                endpoint,
            };
        }

        let (container, endpoint) = start_minio().await;
        Self {
            container: Some(container),
            endpoint,
        }
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            endpoint: self.endpoint.clone(),
            access_key: MINIO_USER.to_string(),
            secret_key: MINIO_PASSWORD.to_string(),
            ..StorageConfig::default()
        }
    }

    /// Plain SDK client for seeding buckets and objects.
    pub fn client(&self) -> aws_sdk_s3::Client {
        let config = self.storage_config();
        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(config.endpoint_url())
            .region(Region::new(config.region.clone()))
            .credentials_provider(Credentials::new(
                config.access_key,
                config.secret_key,
                None,
                None,
                "static",
            ))
            .force_path_style(true)
            .build();
        aws_sdk_s3::Client::from_conf(s3_config)
    }
}

/// Start Redpanda, return container and broker address.
///
/// Kafka clients connect to the advertised address, so the host port is
/// chosen up front and advertised as-is.
pub async fn start_redpanda() -> (ContainerAsync<GenericImage>, String) {
    let port = free_port();
    let advertised = format!("127.0.0.1:{port}");

    let image = GenericImage::new("docker.redpanda.com/redpandadata/redpanda", "v23.3.11")
        .with_wait_for(WaitFor::message_on_stderr("Successfully started Redpanda!"))
        .with_mapped_port(port, 9092.tcp())
        .with_cmd(vec![
            "redpanda".to_string(),
            "start".to_string(),
            "--mode".to_string(),
            "dev-container".to_string(),
            "--smp".to_string(),
            "1".to_string(),
            "--kafka-addr".to_string(),
            "0.0.0.0:9092".to_string(),
            "--advertise-kafka-addr".to_string(),
            advertised.clone(),
        ]);

    let container = image.start().await.expect("Failed to start Redpanda");
    (container, advertised)
}

/// Start MinIO, return container and endpoint URL.
pub async fn start_minio() -> (ContainerAsync<GenericImage>, String) {
    let image = GenericImage::new("minio/minio", "RELEASE.2024-05-10T01-41-38Z")
        .with_wait_for(WaitFor::seconds(2))
        .with_exposed_port(9000.tcp())
        .with_env_var("MINIO_ROOT_USER", MINIO_USER)
        .with_env_var("MINIO_ROOT_PASSWORD", MINIO_PASSWORD)
        .with_cmd(vec!["server".to_string(), "/data".to_string()]);

    let container = image.start().await.expect("Failed to start MinIO");

    let port = container.get_host_port_ipv4(9000).await.unwrap();
    let url = format!("http://127.0.0.1:{}", port);

    wait_for_http(&format!("{url}/minio/health/live"), Duration::from_secs(30)).await;

    (container, url)
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("no free local port")
}

/// Wait for HTTP endpoint to respond.
async fn wait_for_http(url: &str, timeout: Duration) {
    let client = reqwest::Client::new();
    let start = std::time::Instant::now();

    while start.elapsed() < timeout {
        if let Ok(resp) = client.get(url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("HTTP endpoint {} not ready after {:?}", url, timeout);
}
