//! Tests for health check endpoints.

use axum::http::StatusCode;
use integration_tests::setup::TestPipeline;
use serde_json::Value;
use telemetry::health;

#[tokio::test]
async fn test_health_endpoint_structure() {
    let server = TestPipeline::new().server();

    let response = server.get("/health").await;
    response.assert_status_ok();

    let body: Value = response.json();
    let status = body["status"].as_str().unwrap_or("");
    assert!(
        ["healthy", "degraded", "unhealthy"].contains(&status),
        "unexpected status '{status}'"
    );

    let components: Vec<&str> = body["components"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(components, vec!["broker", "object_store"]);

    assert!(body["metrics"].get("uploads_queued").is_some());
    assert!(body["metrics"].get("messages_dead_lettered").is_some());
}

#[tokio::test]
async fn test_liveness() {
    let server = TestPipeline::new().server();
    server.get("/health/live").await.assert_status_ok();
}

/// Readiness follows the broker's health.
#[tokio::test]
async fn test_readiness_follows_broker() {
    let server = TestPipeline::new().server();

    health().broker.set_unhealthy("Connection failed");
    server
        .get("/health/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);

    health().broker.set_healthy();
    server.get("/health/ready").await.assert_status_ok();
}
