//! S3 / MinIO implementation of [`ObjectStore`].

use crate::config::StorageConfig;
use crate::gateway::ObjectStore;
use crate::scratch::{suffix_for, ScratchFile};
use async_trait::async_trait;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::types::MetadataDirective;
use aws_sdk_s3::Client;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use pipeline_core::object_metadata::{prefixed, unprefixed};
use pipeline_core::{Error, ObjectMetadata, Result};
use std::time::Instant;
use telemetry::{health, metrics};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

/// Characters left unescaped in a copy source: unreserved plus `/`.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Maps an SDK failure on `bucket/key` to the pipeline taxonomy.
fn classify<E, R>(
    err: SdkError<E, R>,
    bucket: &str,
    key: &str,
    not_found: fn(&E) -> bool,
) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::TimeoutError(_) => {
            Error::timeout(format!("request for {bucket}/{key} timed out"))
        }
        SdkError::ServiceError(service) if not_found(service.err()) => {
            Error::not_found(format!("{bucket}/{key}"))
        }
        other => Error::transport(format!(
            "object store request for {bucket}/{key} failed: {}",
            aws_sdk_s3::error::DisplayErrorContext(&other)
        )),
    }
}

/// Object store backed by an S3-compatible endpoint.
pub struct S3ObjectStore {
    client: Client,
    config: StorageConfig,
}

impl S3ObjectStore {
    /// Builds a client with static credentials and path-style addressing.
    pub fn new(config: StorageConfig) -> Self {
        info!(
            endpoint = %config.endpoint_url(),
            region = %config.region,
            "Creating object store client"
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(config.endpoint_url())
            .region(Region::new(config.region.clone()))
            .credentials_provider(Credentials::new(
                config.access_key.clone(),
                config.secret_key.clone(),
                None,
                None,
                "static",
            ))
            .force_path_style(true)
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(config.request_timeout())
                    .build(),
            )
            .build();

        Self {
            client: Client::from_conf(s3_config),
            config,
        }
    }

    async fn fetch(&self, bucket: &str, key: &str) -> Result<ScratchFile> {
        // The object body may take longer than a single metadata request.
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .customize()
            .config_override(
                aws_sdk_s3::Config::builder().timeout_config(
                    TimeoutConfig::builder()
                        .operation_timeout(self.config.download_timeout())
                        .build(),
                ),
            )
            .send()
            .await
            .map_err(|e| classify(e, bucket, key, |e: &GetObjectError| e.is_no_such_key()))?;

        let mut scratch =
            ScratchFile::create(self.config.scratch_dir.as_deref(), &suffix_for(key))?;
        let mut file = scratch.reopen()?;
        let mut body = output.body.into_async_read();

        let size = tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(|e| Error::transport(format!("failed to read body of {bucket}/{key}: {e}")))?;
        file.flush()
            .await
            .map_err(|e| Error::internal(format!("failed to flush scratch file: {e}")))?;

        scratch.set_size(size);
        Ok(scratch)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn download(&self, bucket: &str, key: &str) -> Result<ScratchFile> {
        let start = Instant::now();

        let result = tokio::time::timeout(self.config.download_timeout(), self.fetch(bucket, key))
            .await
            .unwrap_or_else(|_| {
                Err(Error::timeout(format!(
                    "download of {bucket}/{key} exceeded {}s",
                    self.config.download_timeout_secs
                )))
            });

        match &result {
            Ok(scratch) => {
                health().object_store.set_healthy();
                debug!(
                    bucket = %bucket,
                    key = %key,
                    bytes = scratch.size(),
                    latency_ms = %start.elapsed().as_millis(),
                    "Downloaded object"
                );
            }
            Err(e) => {
                metrics().downloads_failed.inc();
                if e.is_transient() {
                    health().object_store.set_unhealthy(e.to_string());
                }
                error!(bucket = %bucket, key = %key, error = %e, "Download failed");
            }
        }
        result
    }

    async fn write_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        let copy_source = format!("{bucket}/{}", utf8_percent_encode(key, COPY_SOURCE));

        // The SDK adds the user-metadata prefix itself.
        let mut request = self
            .client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(copy_source)
            .metadata_directive(MetadataDirective::Replace);
        for (name, value) in metadata {
            request = request.metadata(unprefixed(name), value);
        }

        request
            .send()
            .await
            .map_err(|e| classify(e, bucket, key, |_| false))?;

        metrics().metadata_writes.inc();
        debug!(bucket = %bucket, key = %key, fields = metadata.len(), "Replaced object metadata");
        Ok(())
    }

    async fn read_metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, bucket, key, |e: &HeadObjectError| e.is_not_found()))?;

        Ok(output
            .metadata()
            .map(|m| m.iter().map(|(k, v)| (prefixed(k), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> bool {
        match self.client.list_buckets().send().await {
            Ok(_) => {
                health().object_store.set_healthy();
                true
            }
            Err(e) => {
                let msg = aws_sdk_s3::error::DisplayErrorContext(&e).to_string();
                error!("Object store health check failed: {}", msg);
                health().object_store.set_unhealthy(msg);
                false
            }
        }
    }
}
