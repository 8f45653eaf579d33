//! Object store access for the georeport pipeline.
//!
//! Objects are downloaded into scratch files that delete themselves on drop,
//! and extracted metadata is written back by replacing the object's user
//! metadata in place.

pub mod config;
pub mod gateway;
pub mod s3;
pub mod scratch;

pub use config::StorageConfig;
pub use gateway::ObjectStore;
pub use s3::S3ObjectStore;
pub use scratch::ScratchFile;
