//! Standardized API responses.
//!
//! Every endpoint answers with a status object: `status` is `success`,
//! `ignored`, `initialized`, or `error`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pipeline_core::{Error, RasterMetadata};
use serde::{Deserialize, Serialize};
use telemetry::{HealthReport, MetricsSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raster_info: Option<RasterMetadata>,
}

impl StatusResponse {
    fn status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            code: None,
            message: None,
            raster_info: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::status("success")
        }
    }

    pub fn ignored() -> Self {
        Self::status("ignored")
    }

    pub fn initialized() -> Self {
        Self::status("initialized")
    }

    /// Extraction result as returned by the action runtime.
    pub fn extracted(metadata: RasterMetadata) -> Self {
        Self {
            raster_info: Some(metadata),
            ..Self::status("success")
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: Some(message.into()),
            ..Self::status("error")
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub report: HealthReport,
    pub metrics: MetricsSnapshot,
}

/// API error carrying an error status object.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub response: StatusResponse,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: StatusResponse::error(code, msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match &err {
            Error::Validation { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self::with_code(status, err.error_code(), message)
    }
}
