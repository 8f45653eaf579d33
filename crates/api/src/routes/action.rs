//! Action runtime: hosts one pipeline stage behind `/init` and `/run`.

use axum::{body::Bytes, extract::State, Json};
use pipeline_core::{
    ActionRequest, Error, RawDataEvent, StorageNotification, ValidationErrorCode,
};
use tracing::{error, info};
use worker::ReportDelivery;

use crate::response::{ApiError, StatusResponse};
use crate::state::{ActionStage, AppState};

/// POST /init
pub async fn init_handler() -> Json<StatusResponse> {
    Json(StatusResponse::initialized())
}

/// POST /run - Runs the configured stage on `{"event": ...}`.
pub async fn run_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<StatusResponse>, ApiError> {
    let stage = state
        .action
        .as_ref()
        .ok_or_else(|| Error::config("no action stage configured"))?;

    let request: ActionRequest = serde_json::from_slice(&body).map_err(invalid_body)?;

    let result = match stage {
        ActionStage::Extract(extraction) => {
            let notification: StorageNotification =
                serde_json::from_value(request.event).map_err(invalid_body)?;
            let upload = notification.to_upload_event()?;
            info!(bucket = %upload.bucket, key = %upload.object_key, "Running extraction action");

            extraction
                .run(&upload)
                .await
                .map(|raw| StatusResponse::extracted(raw.metadata))
        }
        ActionStage::Report(report) => {
            let event: RawDataEvent =
                serde_json::from_value(request.event).map_err(invalid_body)?;
            info!(bucket = %event.bucket, key = %event.object_key, "Running report action");

            report.run(&event).await.map(|delivery| match delivery {
                ReportDelivery::Sent => StatusResponse::success("Report generated successfully"),
                ReportDelivery::Duplicate => StatusResponse::success("Report already sent"),
            })
        }
    };

    result.map(Json).map_err(|e| {
        error!(stage = ?stage.kind(), error = %e, "Action failed");
        ApiError::from(e)
    })
}

fn invalid_body(e: serde_json::Error) -> ApiError {
    Error::validation(
        ValidationErrorCode::InvalidFormat,
        format!("invalid action request: {e}"),
    )
    .into()
}
