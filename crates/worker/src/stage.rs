//! Pipeline stages shared by the queue workers and the action runtime.

use crate::ledger::{Claim, DeliveryLedger};
use crate::mailer::Mailer;
use crate::textgen::TextGenerator;
use pipeline_core::{
    build_prompt, delivery_key, Error, RawDataEvent, ReportPayload, Result, UploadEvent,
    PLACEHOLDER_NARRATIVE, REPORT_SUBJECT,
};
use raster::MetadataComputer;
use std::sync::Arc;
use std::time::Instant;
use storage::ObjectStore;
use telemetry::metrics;
use tracing::{debug, info, warn};

/// Download, compute, persist.
///
/// The scratch file lives only for the duration of [`ExtractionStage::run`]
/// and is removed on every path out of it.
#[derive(Clone)]
pub struct ExtractionStage {
    store: Arc<dyn ObjectStore>,
    computer: Arc<dyn MetadataComputer>,
}

impl ExtractionStage {
    pub fn new(store: Arc<dyn ObjectStore>, computer: Arc<dyn MetadataComputer>) -> Self {
        Self { store, computer }
    }

    pub async fn run(&self, upload: &UploadEvent) -> Result<RawDataEvent> {
        let start = Instant::now();
        let (bucket, key) = (upload.bucket.as_str(), upload.object_key.as_str());

        let scratch = self.store.download(bucket, key).await?;
        debug!(bucket = %bucket, key = %key, bytes = scratch.size(), "Computing raster metadata");

        let metadata = self.computer.compute(scratch.path()).await?;
        drop(scratch);

        // Persist before anything is handed downstream.
        self.store
            .write_metadata(bucket, key, &metadata.to_object_metadata()?)
            .await?;

        let elapsed = start.elapsed();
        metrics()
            .extraction_latency_ms
            .observe(elapsed.as_millis() as u64);
        info!(
            bucket = %bucket,
            key = %key,
            bands = metadata.size.band_count,
            latency_ms = %elapsed.as_millis(),
            "Extracted raster metadata"
        );

        Ok(RawDataEvent::new(upload, metadata))
    }
}

/// Result of a report run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDelivery {
    Sent,
    /// An identical report was already sent.
    Duplicate,
}

/// Narrative, then email.
#[derive(Clone)]
pub struct ReportStage {
    textgen: Arc<dyn TextGenerator>,
    mailer: Arc<dyn Mailer>,
    ledger: DeliveryLedger,
}

impl ReportStage {
    pub fn new(
        textgen: Arc<dyn TextGenerator>,
        mailer: Arc<dyn Mailer>,
        ledger: DeliveryLedger,
    ) -> Self {
        Self {
            textgen,
            mailer,
            ledger,
        }
    }

    /// Generates the narrative for an event. Never fails: an unusable
    /// response becomes the placeholder text.
    pub async fn narrate(&self, event: &RawDataEvent) -> Result<ReportPayload> {
        let prompt = build_prompt(event)?;

        let narrative = match self.textgen.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                metrics().narrative_fallbacks.inc();
                warn!(key = %event.object_key, error = %e, "Using placeholder narrative");
                PLACEHOLDER_NARRATIVE.to_string()
            }
        };

        Ok(ReportPayload {
            metadata: event.metadata.clone(),
            narrative,
        })
    }

    /// Sends the report unless the ledger has already seen this delivery.
    ///
    /// A mail failure is returned as a downstream error and nothing is
    /// recorded, so a retry sends the report. So is a report another
    /// consumer is sending right now.
    pub async fn run(&self, event: &RawDataEvent) -> Result<ReportDelivery> {
        let start = Instant::now();
        let key = delivery_key(event)?;

        let claim = match self.ledger.claim(&key) {
            Claim::Granted(claim) => claim,
            Claim::AlreadySent => {
                metrics().report_duplicates_skipped.inc();
                info!(
                    bucket = %event.bucket,
                    key = %event.object_key,
                    "Report already sent, skipping"
                );
                return Ok(ReportDelivery::Duplicate);
            }
            Claim::InProgress => {
                return Err(Error::downstream(format!(
                    "report for {} is being sent by another consumer",
                    event.object_key
                )));
            }
        };

        let payload = self.narrate(event).await?;

        if let Err(e) = self.mailer.send(REPORT_SUBJECT, &payload.narrative).await {
            metrics().mail_errors.inc();
            return Err(e);
        }
        claim.commit().await;

        let elapsed = start.elapsed();
        metrics().reports_sent.inc();
        metrics().report_latency_ms.observe(elapsed.as_millis() as u64);
        info!(
            bucket = %event.bucket,
            key = %event.object_key,
            latency_ms = %elapsed.as_millis(),
            "Report sent"
        );
        Ok(ReportDelivery::Sent)
    }
}
