//! Worker scheduler: starts the queue consumers and the metrics logger.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::info;

use broker::Broker;
use pipeline_core::Result;
use telemetry::metrics;

use crate::config::WorkerConfig;
use crate::consumer::{ConsumerWorker, MessageHandler};

struct Route {
    queue: String,
    handler: Arc<dyn MessageHandler>,
}

/// Background worker scheduler.
pub struct WorkerScheduler {
    config: WorkerConfig,
    broker: Arc<dyn Broker>,
    routes: Vec<Route>,
}

impl WorkerScheduler {
    pub fn new(config: WorkerConfig, broker: Arc<dyn Broker>) -> Self {
        Self {
            config,
            broker,
            routes: Vec::new(),
        }
    }

    /// Sends deliveries from `queue` to `handler`.
    pub fn route(mut self, queue: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        self.routes.push(Route {
            queue: queue.into(),
            handler,
        });
        self
    }

    /// Starts `consumers_per_queue` consumers for every route, each on its
    /// own broker connection, plus the metrics logger. All tasks exit when
    /// `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();
        let per_queue = self.config.consumers_per_queue.max(1);

        for route in &self.routes {
            for index in 0..per_queue {
                let consumer = self.broker.consumer(&route.queue).await?;
                let worker = ConsumerWorker::new(
                    consumer,
                    route.handler.clone(),
                    self.config.consumer_config(),
                );
                let cancel = cancel.clone();
                handles.push(tokio::spawn(async move { worker.run(cancel).await }));
                info!(
                    queue = %route.queue,
                    handler = route.handler.name(),
                    index,
                    "Consumer worker started"
                );
            }
        }

        let every = Duration::from_secs(self.config.metrics_log_interval_secs.max(1));
        handles.push(tokio::spawn(run_metrics_log(every, cancel)));

        info!(consumers = handles.len() - 1, "Background workers started");
        Ok(handles)
    }
}

async fn run_metrics_log(every: Duration, cancel: CancellationToken) {
    let mut ticker = interval(every);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let s = metrics().snapshot();
                info!(
                    uploads_queued = s.uploads_queued,
                    messages_consumed = s.messages_consumed,
                    messages_acked = s.messages_acked,
                    messages_requeued = s.messages_requeued,
                    messages_dead_lettered = s.messages_dead_lettered,
                    rasters_processed = s.rasters_processed,
                    rasters_failed = s.rasters_failed,
                    reports_sent = s.reports_sent,
                    report_duplicates_skipped = s.report_duplicates_skipped,
                    mail_errors = s.mail_errors,
                    extraction_latency_mean_ms = s.extraction_latency_mean_ms,
                    in_flight = s.in_flight_messages,
                    "Pipeline metrics"
                );
            }
        }
    }
}
