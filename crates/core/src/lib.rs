//! Core types, metadata model, and error taxonomy for the georeport pipeline.

pub mod error;
pub mod events;
pub mod metadata;
pub mod object_metadata;
pub mod outcome;
pub mod report;

pub use error::{Error, ErrorCategory, Result, ValidationErrorCode};
pub use events::*;
pub use metadata::*;
pub use object_metadata::{ObjectMetadata, USER_METADATA_PREFIX};
pub use outcome::Outcome;
pub use report::*;
