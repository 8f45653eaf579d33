//! Unified error types for the georeport pipeline.
//!
//! Error codes:
//! - VALID_001-003: Validation errors on the ingress boundary
//! - TRANSPORT_001-003: Broker / object store unreachable, missing, or slow
//! - PROCESSING_001: Raster could not be read
//! - DOWNSTREAM_001: Text generation, mail, or action invocation failed
//! - INTERNAL_001: Configuration or programming errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Validation error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorCode {
    /// VALID_001: Body is not valid JSON or has the wrong shape
    InvalidFormat,
    /// VALID_002: `EventName` is missing
    MissingEventName,
    /// VALID_003: Bucket name or object key is missing
    MissingObject,
}

impl ValidationErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat => "VALID_001",
            Self::MissingEventName => "VALID_002",
            Self::MissingObject => "VALID_003",
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> u16 {
        400
    }
}

/// Coarse error category, reported to HTTP callers and used to settle
/// queue deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Transport,
    Processing,
    Downstream,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Transport => "transport",
            Self::Processing => "processing",
            Self::Downstream => "downstream",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Validation error with code.
    #[error("[{code}] {message}")]
    Validation {
        code: &'static str,
        message: String,
        http_status: u16,
    },

    /// Broker or object store could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The referenced object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// A bounded call ran past its deadline.
    #[error("deadline exceeded: {0}")]
    Timeout(String),

    /// Unreadable or corrupt raster data.
    #[error("processing error: {0}")]
    Processing(String),

    /// Text generation, mail transport, or action invocation failure.
    #[error("downstream error: {0}")]
    Downstream(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error with code.
    pub fn validation(code: ValidationErrorCode, msg: impl Into<String>) -> Self {
        Self::Validation {
            code: code.code(),
            message: msg.into(),
            http_status: code.http_status(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }

    pub fn downstream(msg: impl Into<String>) -> Self {
        Self::Downstream(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } | Self::Serialization(_) => ErrorCategory::Validation,
            Self::Transport(_) | Self::NotFound(_) | Self::Timeout(_) => ErrorCategory::Transport,
            Self::Processing(_) => ErrorCategory::Processing,
            Self::Downstream(_) => ErrorCategory::Downstream,
            Self::Config(_) | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether retrying the same work later can succeed.
    ///
    /// Missing objects, corrupt rasters, and malformed payloads fail the
    /// same way on every attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::Downstream(_)
        )
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { http_status, .. } => *http_status,
            Self::Serialization(_) => 400,
            Self::NotFound(_) => 404,
            Self::Processing(_) => 422,
            Self::Downstream(_) => 502,
            Self::Transport(_) => 503,
            Self::Timeout(_) => 504,
            Self::Config(_) | Self::Internal(_) => 500,
        }
    }

    /// Get the error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code,
            Self::Serialization(_) => "VALID_001",
            Self::Transport(_) => "TRANSPORT_001",
            Self::NotFound(_) => "TRANSPORT_002",
            Self::Timeout(_) => "TRANSPORT_003",
            Self::Processing(_) => "PROCESSING_001",
            Self::Downstream(_) => "DOWNSTREAM_001",
            Self::Config(_) | Self::Internal(_) => "INTERNAL_001",
        }
    }
}
