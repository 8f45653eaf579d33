//! Tests for the storage webhook in queue mode.

use axum::http::StatusCode;
use integration_tests::{fixtures, setup::TestPipeline};
use pipeline_core::{QueuePayload, UploadEvent, OBJECT_CREATED_PUT};
use serde_json::{json, Value};

/// An object-created notification becomes exactly one upload event.
#[tokio::test]
async fn test_put_notification_queues_one_upload() {
    let pipeline = TestPipeline::new();
    let server = pipeline.server();

    let response = server
        .post("/webhook/minio")
        .json(&fixtures::put_notification("tiles/SEN_soc.tif"))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body, json!({ "status": "success", "message": "Upload event queued" }));

    let queued = pipeline.broker.published("uploader");
    assert_eq!(queued.len(), 1);

    let upload = UploadEvent::from_payload(&queued[0]).unwrap();
    assert_eq!(upload.bucket, fixtures::BUCKET);
    assert_eq!(upload.object_key, "tiles/SEN_soc.tif");
    assert_eq!(upload.event_name, OBJECT_CREATED_PUT);
    assert_eq!(upload.file_name(), "SEN_soc.tif");
}

/// The webhook answers before anything consumes the message.
#[tokio::test]
async fn test_upload_is_left_pending() {
    let pipeline = TestPipeline::new();
    let server = pipeline.server();

    server
        .post("/webhook/minio")
        .json(&fixtures::put_notification("a.tif"))
        .await
        .assert_status_ok();

    assert_eq!(pipeline.broker.pending("uploader").len(), 1);
    assert!(pipeline.broker.published("raw_data").is_empty());
    assert_eq!(pipeline.store.download_count(), 0);
}

#[tokio::test]
async fn test_other_event_names_are_ignored() {
    let pipeline = TestPipeline::new();
    let server = pipeline.server();

    for event_name in [
        fixtures::OBJECT_REMOVED_DELETE,
        "s3:ObjectAccessed:Get",
        "s3:ObjectCreated:CompleteMultipartUpload",
    ] {
        let response = server
            .post("/webhook/minio")
            .json(&fixtures::notification(event_name, fixtures::BUCKET, "a.tif"))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body, json!({ "status": "ignored" }), "{event_name}");
    }

    assert!(pipeline.broker.published("uploader").is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let pipeline = TestPipeline::new();
    let server = pipeline.server();

    let response = server.post("/webhook/minio").text("{\"EventName\":").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "VALID_001");
    assert!(pipeline.broker.published("uploader").is_empty());
}

#[tokio::test]
async fn test_missing_event_name_is_rejected() {
    let pipeline = TestPipeline::new();
    let server = pipeline.server();

    let mut notification = fixtures::put_notification("a.tif");
    notification.as_object_mut().unwrap().remove("EventName");

    let response = server.post("/webhook/minio").json(&notification).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "VALID_002");
    assert!(pipeline.broker.published("uploader").is_empty());
}

#[tokio::test]
async fn test_missing_object_location_is_rejected() {
    let pipeline = TestPipeline::new();
    let server = pipeline.server();

    let no_records = json!({ "EventName": OBJECT_CREATED_PUT, "Records": [] });
    let no_key = json!({
        "EventName": OBJECT_CREATED_PUT,
        "Records": [{ "s3": { "bucket": { "name": "rasters" }, "object": {} } }]
    });
    let empty_bucket = fixtures::notification(OBJECT_CREATED_PUT, "", "a.tif");

    for notification in [no_records, no_key, empty_bucket] {
        let response = server.post("/webhook/minio").json(&notification).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["code"], "VALID_003", "{notification}");
    }

    assert!(pipeline.broker.published("uploader").is_empty());
}

#[tokio::test]
async fn test_broker_failure_is_transport_error() {
    let pipeline = TestPipeline::new();
    let server = pipeline.server();
    pipeline.broker.fail_next_publishes(1);

    let response = server
        .post("/webhook/minio")
        .json(&fixtures::put_notification("a.tif"))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "TRANSPORT_001");
    assert!(pipeline.broker.published("uploader").is_empty());
}
