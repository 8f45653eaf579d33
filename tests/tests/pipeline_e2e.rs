//! End-to-end tests for the queued pipeline.
//!
//! POST /webhook/minio → uploader → extraction worker → object metadata +
//! raw_data → report worker → email, with every collaborator in memory.

use integration_tests::{
    fixtures,
    setup::{TestPipeline, NARRATIVE},
};
use pipeline_core::{
    QueuePayload, RawDataEvent, RasterMetadata, PLACEHOLDER_NARRATIVE, REPORT_PROMPT,
    REPORT_SUBJECT,
};

fn labels(outcomes: &[pipeline_core::Outcome]) -> Vec<&'static str> {
    outcomes.iter().map(|o| o.label()).collect()
}

async fn upload(pipeline: &TestPipeline, key: &str) {
    pipeline
        .server()
        .post("/webhook/minio")
        .json(&fixtures::put_notification(key))
        .await
        .assert_status_ok();
}

/// The reference raster: one band, every pixel 0.
#[tokio::test]
async fn test_sen_soc_end_to_end() {
    let pipeline = TestPipeline::new();
    pipeline
        .store
        .put(fixtures::BUCKET, fixtures::SEN_SOC, fixtures::sen_soc());

    upload(&pipeline, fixtures::SEN_SOC).await;
    let outcomes = pipeline.drain().await;
    assert_eq!(labels(&outcomes), vec!["ack", "ack"]);

    // Persisted on the object
    let persisted = pipeline
        .store
        .metadata_of(fixtures::BUCKET, fixtures::SEN_SOC)
        .expect("metadata was not written");
    assert!(persisted.keys().all(|k| k.starts_with("x-amz-meta-")));

    let metadata = RasterMetadata::from_object_metadata(&persisted).unwrap();
    assert_eq!(metadata.driver.short_name, "GTiff");
    assert_eq!(metadata.size.x_size, 16);
    assert_eq!(metadata.size.y_size, 12);
    assert_eq!(metadata.size.band_count, 1);
    assert_eq!(metadata.projection, "EPSG:4326");
    assert_eq!(metadata.bands.len(), 1);

    let band = &metadata.bands[0];
    assert_eq!(band.band_number, 1);
    assert_eq!(band.data_type, "Byte");
    assert_eq!(band.statistics.min, 0.0);
    assert_eq!(band.statistics.max, 0.0);
    assert_eq!(band.statistics.mean, 0.0);
    assert_eq!(band.statistics.std_dev, 0.0);

    // Handed downstream
    let raw = pipeline.broker.published("raw_data");
    assert_eq!(raw.len(), 1);
    let event = RawDataEvent::from_payload(&raw[0]).unwrap();
    assert_eq!(event.object_key, fixtures::SEN_SOC);
    assert_eq!(event.metadata, metadata);

    // Reported
    let prompts = pipeline.textgen.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with(REPORT_PROMPT));
    assert!(prompts[0].contains("\"band_count\":1"));

    let sent = pipeline.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, REPORT_SUBJECT);
    assert_eq!(sent[0].body, NARRATIVE);

    assert!(pipeline.broker.dead_letters().is_empty());
}

#[tokio::test]
async fn test_delete_notification_does_nothing() {
    let pipeline = TestPipeline::new();
    pipeline
        .store
        .put(fixtures::BUCKET, fixtures::SEN_SOC, fixtures::sen_soc());

    pipeline
        .server()
        .post("/webhook/minio")
        .json(&fixtures::delete_notification(fixtures::SEN_SOC))
        .await
        .assert_status_ok();

    assert!(pipeline.drain().await.is_empty());
    assert!(pipeline.broker.published("uploader").is_empty());
    assert_eq!(pipeline.store.download_count(), 0);
    assert!(pipeline.mailer.sent().is_empty());
}

/// A second delivery of the same upload rewrites identical metadata and,
/// with the ledger, sends no second email.
#[tokio::test]
async fn test_redelivery_is_idempotent_with_ledger() {
    let pipeline = TestPipeline::new();
    pipeline
        .store
        .put(fixtures::BUCKET, fixtures::SEN_SOC, fixtures::sen_soc());

    upload(&pipeline, fixtures::SEN_SOC).await;
    pipeline.drain().await;
    let first = pipeline
        .store
        .metadata_of(fixtures::BUCKET, fixtures::SEN_SOC)
        .unwrap();

    upload(&pipeline, fixtures::SEN_SOC).await;
    let outcomes = pipeline.drain().await;
    assert_eq!(labels(&outcomes), vec!["ack", "ack"]);

    let second = pipeline
        .store
        .metadata_of(fixtures::BUCKET, fixtures::SEN_SOC)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(pipeline.store.metadata_write_count(), 2);

    assert_eq!(pipeline.broker.published("raw_data").len(), 2);
    assert_eq!(pipeline.mailer.sent().len(), 1);
}

/// Without the ledger, the same redelivery sends the report twice.
#[tokio::test]
async fn test_naive_report_stage_sends_duplicate_email() {
    let pipeline = TestPipeline::naive();
    pipeline
        .store
        .put(fixtures::BUCKET, fixtures::SEN_SOC, fixtures::sen_soc());

    upload(&pipeline, fixtures::SEN_SOC).await;
    upload(&pipeline, fixtures::SEN_SOC).await;
    pipeline.drain().await;

    let sent = pipeline.mailer.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1]);
}

/// Different content under the same key is a new report.
#[tokio::test]
async fn test_reupload_with_new_content_is_reported() {
    let pipeline = TestPipeline::new();
    pipeline
        .store
        .put(fixtures::BUCKET, "scene.tif", fixtures::gray8_geotiff(4, 4, 7));
    upload(&pipeline, "scene.tif").await;
    pipeline.drain().await;

    pipeline
        .store
        .put(fixtures::BUCKET, "scene.tif", fixtures::gray8_geotiff(4, 4, 9));
    upload(&pipeline, "scene.tif").await;
    pipeline.drain().await;

    assert_eq!(pipeline.mailer.sent().len(), 2);
    let metadata = RasterMetadata::from_object_metadata(
        &pipeline.store.metadata_of(fixtures::BUCKET, "scene.tif").unwrap(),
    )
    .unwrap();
    assert_eq!(metadata.bands[0].statistics.mean, 9.0);
}

#[tokio::test]
async fn test_missing_object_is_dead_lettered() {
    let pipeline = TestPipeline::new();

    upload(&pipeline, "never-uploaded.tif").await;
    let outcomes = pipeline.drain().await;

    assert_eq!(labels(&outcomes), vec!["dead_letter"]);
    let parked = pipeline.broker.dead_letters();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].queue, "uploader");
    assert_eq!(pipeline.broker.pending("uploader.dead_letter").len(), 1);
    assert!(pipeline.broker.published("raw_data").is_empty());
}

#[tokio::test]
async fn test_corrupt_raster_is_dead_lettered_without_metadata() {
    let pipeline = TestPipeline::new();
    pipeline
        .store
        .put(fixtures::BUCKET, "broken.tif", fixtures::corrupt_raster());

    upload(&pipeline, "broken.tif").await;
    let outcomes = pipeline.drain().await;

    assert_eq!(labels(&outcomes), vec!["dead_letter"]);
    assert!(pipeline.broker.dead_letters()[0]
        .reason
        .starts_with("processing error"));
    assert!(pipeline.store.metadata_of(fixtures::BUCKET, "broken.tif").is_none());
    assert!(pipeline.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_transient_download_failure_is_retried() {
    let pipeline = TestPipeline::new();
    pipeline
        .store
        .put(fixtures::BUCKET, fixtures::SEN_SOC, fixtures::sen_soc());
    pipeline.store.fail_next_downloads(1);

    upload(&pipeline, fixtures::SEN_SOC).await;
    let outcomes = pipeline.drain().await;

    assert_eq!(labels(&outcomes), vec!["retry", "ack", "ack"]);
    assert_eq!(pipeline.store.download_count(), 2);
    assert_eq!(pipeline.mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_persistent_download_failure_is_dead_lettered() {
    let pipeline = TestPipeline::new();
    pipeline
        .store
        .put(fixtures::BUCKET, fixtures::SEN_SOC, fixtures::sen_soc());
    pipeline.store.fail_next_downloads(10);

    upload(&pipeline, fixtures::SEN_SOC).await;
    let outcomes = pipeline.drain().await;

    assert_eq!(labels(&outcomes), vec!["retry", "retry", "dead_letter"]);
    let parked = pipeline.broker.dead_letters();
    assert_eq!(parked[0].attempts, pipeline.max_attempts);
    assert!(parked[0].reason.contains("gave up after 3 attempts"));
}

#[tokio::test]
async fn test_raw_data_publish_failure_is_retried() {
    let pipeline = TestPipeline::new();
    pipeline
        .store
        .put(fixtures::BUCKET, fixtures::SEN_SOC, fixtures::sen_soc());

    upload(&pipeline, fixtures::SEN_SOC).await;
    pipeline.broker.fail_next_publishes(1);
    let outcomes = pipeline.drain().await;

    assert_eq!(labels(&outcomes), vec!["retry", "ack", "ack"]);
    // Persist precedes publish, so the first attempt already wrote metadata.
    assert_eq!(pipeline.store.metadata_write_count(), 2);
    assert_eq!(pipeline.broker.published("raw_data").len(), 1);
    assert_eq!(pipeline.mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_text_generation_failure_sends_placeholder() {
    let pipeline = TestPipeline::without_narrative();
    pipeline
        .store
        .put(fixtures::BUCKET, fixtures::SEN_SOC, fixtures::sen_soc());

    upload(&pipeline, fixtures::SEN_SOC).await;
    let outcomes = pipeline.drain().await;

    assert_eq!(labels(&outcomes), vec!["ack", "ack"]);
    let sent = pipeline.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body, PLACEHOLDER_NARRATIVE);
}

#[tokio::test]
async fn test_mail_failure_is_retried_then_sent_once() {
    let pipeline = TestPipeline::new();
    pipeline
        .store
        .put(fixtures::BUCKET, fixtures::SEN_SOC, fixtures::sen_soc());
    pipeline.mailer.fail_next_sends(1);

    upload(&pipeline, fixtures::SEN_SOC).await;
    let outcomes = pipeline.drain().await;

    assert_eq!(labels(&outcomes), vec!["ack", "retry", "ack"]);
    assert_eq!(pipeline.mailer.sent().len(), 1);
    assert!(pipeline.broker.dead_letters().is_empty());
}

#[tokio::test]
async fn test_mail_outage_dead_letters_report() {
    let pipeline = TestPipeline::new();
    pipeline
        .store
        .put(fixtures::BUCKET, fixtures::SEN_SOC, fixtures::sen_soc());
    pipeline.mailer.fail_next_sends(10);

    upload(&pipeline, fixtures::SEN_SOC).await;
    let outcomes = pipeline.drain().await;

    assert_eq!(labels(&outcomes), vec!["ack", "retry", "retry", "dead_letter"]);
    let parked = pipeline.broker.dead_letters();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].queue, "raw_data");
    assert_eq!(pipeline.broker.pending("raw_data.dead_letter").len(), 1);
    assert!(pipeline.mailer.sent().is_empty());
}
