//! The object store seam used by the extraction stage.

use crate::scratch::ScratchFile;
use async_trait::async_trait;
use pipeline_core::{ObjectMetadata, Result};

/// Object store operations the pipeline needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Downloads an object into a fresh scratch file.
    ///
    /// A missing object is `Error::NotFound`; unreachable endpoints and
    /// deadlines are transport errors.
    async fn download(&self, bucket: &str, key: &str) -> Result<ScratchFile>;

    /// Replaces the object's user metadata with `metadata`.
    ///
    /// Keys carry the `x-amz-meta-` prefix. Writing the same map twice
    /// leaves the object in the same state.
    async fn write_metadata(&self, bucket: &str, key: &str, metadata: &ObjectMetadata)
        -> Result<()>;

    /// Reads the object's user metadata, keys prefixed.
    async fn read_metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata>;

    async fn health_check(&self) -> bool;
}
