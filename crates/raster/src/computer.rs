//! Async entry point for metadata computation.

use crate::reader::read_metadata_with_abort;
use async_trait::async_trait;
use pipeline_core::{Error, RasterMetadata, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::metrics;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Computes raster metadata for a local file.
#[async_trait]
pub trait MetadataComputer: Send + Sync {
    async fn compute(&self, path: &Path) -> Result<RasterMetadata>;
}

/// Reads GeoTIFFs on the blocking pool under a deadline.
///
/// A permit is held for as long as a read runs on the blocking pool, past
/// its deadline included, so at most `max_concurrent` reads ever run. A read
/// that misses its deadline is told to stop at its next chunk.
#[derive(Debug, Clone)]
pub struct GeoTiffComputer {
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl GeoTiffComputer {
    pub fn new(timeout: Duration) -> Self {
        Self::with_max_concurrent(timeout, 1)
    }

    pub fn with_max_concurrent(timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }
}

#[async_trait]
impl MetadataComputer for GeoTiffComputer {
    async fn compute(&self, path: &Path) -> Result<RasterMetadata> {
        let start = Instant::now();
        let abort = Arc::new(AtomicBool::new(false));

        let work = {
            let permits = self.permits.clone();
            let abort = abort.clone();
            let owned = path.to_path_buf();
            async move {
                let permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::internal("raster permits closed"))?;
                tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    read_metadata_with_abort(&owned, &abort)
                })
                .await
                .map_err(|join| Error::internal(format!("raster task failed: {join}")))?
            }
        };

        let result = match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                abort.store(true, Ordering::Relaxed);
                Err(Error::timeout(format!(
                    "raster computation exceeded {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        let elapsed = start.elapsed();
        match &result {
            Ok(metadata) => {
                metrics().rasters_processed.inc();
                debug!(
                    path = %path.display(),
                    bands = metadata.size.band_count,
                    latency_ms = %elapsed.as_millis(),
                    "Raster computed"
                );
            }
            Err(e) => {
                metrics().rasters_failed.inc();
                warn!(path = %path.display(), error = %e, "Raster computation failed");
            }
        }
        result
    }
}
