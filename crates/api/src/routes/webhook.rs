//! Storage notification webhook.
//!
//! In queue mode an object-created notification becomes one `UploadEvent` on
//! the `uploader` queue and the request returns without waiting for it to be
//! consumed. Other event names are acknowledged and dropped. In invoke mode
//! the notification is forwarded untouched to the configured action.

use axum::{body::Bytes, extract::State, Json};
use pipeline_core::{Error, QueuePayload, StorageNotification, ValidationErrorCode};
use serde_json::Value;
use std::time::Instant;
use telemetry::metrics;
use tracing::{debug, error, info};

use crate::response::{ApiError, StatusResponse};
use crate::state::{AppState, IngressMode};

/// POST /webhook/minio
pub async fn minio_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let start = Instant::now();
    metrics().webhooks_received.inc();

    let result = match state.ingress {
        IngressMode::Queue => enqueue(&state, &body).await,
        IngressMode::Invoke => invoke(&state, &body).await,
    };

    metrics()
        .webhook_latency_ms
        .observe(start.elapsed().as_millis() as u64);

    result.map(Json).map_err(|e| {
        if e.http_status() == 400 {
            metrics().webhooks_rejected.inc();
        }
        error!(error = %e, "Webhook failed");
        ApiError::from(e)
    })
}

async fn enqueue(state: &AppState, body: &[u8]) -> Result<Value, Error> {
    let notification = StorageNotification::parse(body)?;
    debug!(event_name = ?notification.event_name, "Received storage notification");

    let Some(upload) = notification.upload_event()? else {
        metrics().webhooks_ignored.inc();
        info!(event_name = %notification.event_name()?, "Ignoring notification");
        return Ok(serde_json::to_value(StatusResponse::ignored())?);
    };

    state
        .publisher
        .publish(&state.queues.uploader, upload.to_payload()?)
        .await
        .map_err(|e| match e {
            Error::Transport(_) => e,
            other => Error::transport(other.to_string()),
        })?;

    metrics().uploads_queued.inc();
    info!(
        bucket = %upload.bucket,
        key = %upload.object_key,
        queue = %state.queues.uploader,
        "Upload event queued"
    );
    Ok(serde_json::to_value(StatusResponse::success(
        "Upload event queued",
    ))?)
}

async fn invoke(state: &AppState, body: &[u8]) -> Result<Value, Error> {
    let invoker = state
        .invoker
        .as_ref()
        .ok_or_else(|| Error::config("invoke mode without an action invoker"))?;

    let payload: Value = serde_json::from_slice(body).map_err(|e| {
        Error::validation(
            ValidationErrorCode::InvalidFormat,
            format!("invalid notification body: {e}"),
        )
    })?;

    metrics().actions_invoked.inc();
    invoker.invoke(payload).await.inspect_err(|_| {
        metrics().action_invoke_errors.inc();
    })
}
