//! Queue handlers for the two pipeline stages.

use crate::consumer::MessageHandler;
use crate::stage::{ExtractionStage, ReportDelivery, ReportStage};
use async_trait::async_trait;
use broker::{Delivery, QueuePublisher};
use pipeline_core::{Error, Outcome, QueuePayload, RawDataEvent, UploadEvent};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Consumes `uploader`, publishes to `raw_data`.
pub struct ExtractionHandler {
    stage: ExtractionStage,
    publisher: Arc<dyn QueuePublisher>,
    raw_data_queue: String,
}

impl ExtractionHandler {
    pub fn new(
        stage: ExtractionStage,
        publisher: Arc<dyn QueuePublisher>,
        raw_data_queue: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            publisher,
            raw_data_queue: raw_data_queue.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for ExtractionHandler {
    fn name(&self) -> &'static str {
        "metadata_extraction"
    }

    async fn handle(&self, delivery: &Delivery) -> Outcome {
        let upload = match UploadEvent::from_payload(&delivery.payload).and_then(|u| {
            u.check()?;
            Ok(u)
        }) {
            Ok(upload) => upload,
            Err(e) => {
                warn!(tag = delivery.delivery_tag, error = %e, "Undecodable upload message");
                return Outcome::dead_letter(e.to_string());
            }
        };

        if delivery.is_redelivery() {
            info!(
                bucket = %upload.bucket,
                key = %upload.object_key,
                attempt = delivery.attempt,
                "Reprocessing redelivered upload"
            );
        }

        let raw = match self.stage.run(&upload).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(
                    bucket = %upload.bucket,
                    key = %upload.object_key,
                    error = %e,
                    "Extraction failed"
                );
                return Outcome::from_error(&e);
            }
        };

        let published = async {
            let payload = raw.to_payload()?;
            self.publisher.publish(&self.raw_data_queue, payload).await
        }
        .await;

        match published {
            Ok(()) => Outcome::Ack,
            // Metadata is already on the object; a retry rewrites the same
            // values and publishes again.
            Err(e) => Outcome::from_error(&Error::downstream(format!(
                "publish to {} failed: {e}",
                self.raw_data_queue
            ))),
        }
    }
}

/// Consumes `raw_data`, sends the report email.
pub struct ReportHandler {
    stage: ReportStage,
}

impl ReportHandler {
    pub fn new(stage: ReportStage) -> Self {
        Self { stage }
    }
}

#[async_trait]
impl MessageHandler for ReportHandler {
    fn name(&self) -> &'static str {
        "report_generation"
    }

    async fn handle(&self, delivery: &Delivery) -> Outcome {
        let event = match RawDataEvent::from_payload(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(tag = delivery.delivery_tag, error = %e, "Undecodable raw data message");
                return Outcome::dead_letter(e.to_string());
            }
        };

        let start = Instant::now();
        match self.stage.run(&event).await {
            Ok(ReportDelivery::Sent | ReportDelivery::Duplicate) => Outcome::Ack,
            Err(e) => {
                error!(
                    key = %event.object_key,
                    latency_ms = %start.elapsed().as_millis(),
                    error = %e,
                    "Report delivery failed"
                );
                Outcome::from_error(&e)
            }
        }
    }
}
