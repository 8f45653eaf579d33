//! Common test setup.
//!
//! [`TestPipeline`] wires the real stages, handlers and router to the
//! in-memory broker and the doubles in [`crate::mocks`].

use api::{router, ActionInvoker, ActionStage, AppState, InvokerConfig};
use axum::Router;
use axum_test::TestServer;
use broker::{MemoryBroker, QueueNames};
use pipeline_core::Outcome;
use raster::GeoTiffComputer;
use std::sync::Arc;
use std::time::Duration;
use worker::{
    ConsumerWorker, ConsumerWorkerConfig, DeliveryLedger, ExtractionHandler, ExtractionStage,
    ReportHandler, ReportStage,
};

use crate::mocks::{MockMailer, MockObjectStore, MockTextGenerator};

pub const NARRATIVE: &str = "A single-band soil organic carbon grid over Senegal.";

/// Every component of the pipeline, with in-memory collaborators.
pub struct TestPipeline {
    pub broker: MemoryBroker,
    pub queues: QueueNames,
    pub store: MockObjectStore,
    pub textgen: MockTextGenerator,
    pub mailer: MockMailer,
    pub extraction: ExtractionStage,
    pub report: ReportStage,
    pub max_attempts: u32,
}

impl TestPipeline {
    /// Pipeline with the report ledger enabled.
    pub fn new() -> Self {
        Self::build(
            MockTextGenerator::answering(NARRATIVE),
            DeliveryLedger::new(Duration::from_secs(60), 1_000),
        )
    }

    /// Pipeline that sends a report for every delivery, duplicates included.
    pub fn naive() -> Self {
        Self::build(MockTextGenerator::answering(NARRATIVE), DeliveryLedger::disabled())
    }

    /// Pipeline whose text generator never answers.
    pub fn without_narrative() -> Self {
        Self::build(
            MockTextGenerator::failing(),
            DeliveryLedger::new(Duration::from_secs(60), 1_000),
        )
    }

    fn build(textgen: MockTextGenerator, ledger: DeliveryLedger) -> Self {
        let broker = MemoryBroker::with_settings(".dead_letter", Duration::from_millis(20));
        let store = MockObjectStore::new();
        let mailer = MockMailer::new();

        let extraction = ExtractionStage::new(
            Arc::new(store.clone()),
            Arc::new(GeoTiffComputer::new(Duration::from_secs(30))),
        );
        let report = ReportStage::new(Arc::new(textgen.clone()), Arc::new(mailer.clone()), ledger);

        Self {
            broker,
            queues: QueueNames::default(),
            store,
            textgen,
            mailer,
            extraction,
            report,
            max_attempts: 3,
        }
    }

    /// Queue-mode application state.
    pub fn state(&self) -> AppState {
        AppState::new(Arc::new(self.broker.clone()), self.queues.clone())
    }

    pub fn router(&self) -> Router {
        router(self.state())
    }

    pub fn server(&self) -> TestServer {
        TestServer::new(self.router()).expect("Failed to create test server")
    }

    /// Server hosting the extraction stage behind `/run`.
    pub fn extract_action_router(&self) -> Router {
        router(
            self.state()
                .with_action(ActionStage::Extract(self.extraction.clone())),
        )
    }

    /// Server hosting the report stage behind `/run`.
    pub fn report_action_router(&self) -> Router {
        router(self.state().with_action(ActionStage::Report(self.report.clone())))
    }

    /// Invoke-mode server forwarding notifications to `api_host`.
    pub fn invoke_server(&self, api_host: &str, action_name: &str) -> TestServer {
        let invoker = ActionInvoker::new(InvokerConfig {
            api_host: api_host.to_string(),
            namespace: "guest".into(),
            action_name: action_name.into(),
            auth_key: "dXNlcjpwYXNz".into(),
            timeout_secs: 10,
        })
        .expect("Failed to create invoker");

        TestServer::new(router(self.state().with_invoker(invoker)))
            .expect("Failed to create test server")
    }

    fn consumer_config(&self) -> ConsumerWorkerConfig {
        ConsumerWorkerConfig {
            max_attempts: self.max_attempts,
            retry_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            error_pause: Duration::from_millis(1),
        }
    }

    pub fn extraction_worker(&self) -> ConsumerWorker {
        ConsumerWorker::new(
            Arc::new(self.broker.consumer_for(&self.queues.uploader)),
            Arc::new(ExtractionHandler::new(
                self.extraction.clone(),
                Arc::new(self.broker.clone()),
                self.queues.raw_data.clone(),
            )),
            self.consumer_config(),
        )
    }

    pub fn report_worker(&self) -> ConsumerWorker {
        ConsumerWorker::new(
            Arc::new(self.broker.consumer_for(&self.queues.raw_data)),
            Arc::new(ReportHandler::new(self.report.clone())),
            self.consumer_config(),
        )
    }

    /// Runs both workers until neither queue has anything left, returning
    /// every outcome in the order it was applied.
    pub async fn drain(&self) -> Vec<Outcome> {
        let extraction = self.extraction_worker();
        let report = self.report_worker();
        let mut outcomes = Vec::new();

        loop {
            let mut idle = true;
            if let Some(outcome) = extraction.poll_once().await.expect("extraction poll failed") {
                outcomes.push(outcome);
                idle = false;
            }
            if let Some(outcome) = report.poll_once().await.expect("report poll failed") {
                outcomes.push(outcome);
                idle = false;
            }
            if idle {
                return outcomes;
            }
        }
    }
}

impl Default for TestPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("No local address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}")
}
