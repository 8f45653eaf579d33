//! Georeport pipeline
//!
//! Event pipeline for raster files dropped into an object store:
//! - Storage webhook → `uploader` queue (or a blocking action invocation)
//! - Metadata extraction: download, exact band statistics, metadata written
//!   back onto the object, result published to `raw_data`
//! - Report generation: narrative from a text-generation API, sent by email

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use api::{
    router, ActionInvoker, ActionStage, ActionStageKind, AppState, IngressMode, InvokerConfig,
};
use broker::{
    Broker, BrokerConfig, BrokerKind, MemoryBroker, QueueNames, QueuePublisher, RedpandaBroker,
};
use raster::GeoTiffComputer;
use storage::{ObjectStore, S3ObjectStore, StorageConfig};
use telemetry::{health, init_tracing_from_env};
use worker::{
    ExtractionHandler, ExtractionStage, MailConfig, OpenAiClient, ReportHandler, ReportStage,
    SmtpMailer, TextGenConfig, WorkerConfig, WorkerScheduler,
};

/// HTTP server settings.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    ingress: IngressMode,
    /// Stage served on `/run`; unset disables the action runtime
    #[serde(default)]
    action_stage: Option<ActionStageKind>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ingress: IngressMode::default(),
            action_stage: None,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    broker: BrokerConfig,
    #[serde(default)]
    queues: QueueNames,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    invoker: InvokerConfig,
    #[serde(default)]
    textgen: TextGenConfig,
    #[serde(default)]
    mail: MailConfig,
    #[serde(default)]
    workers: WorkerConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // rustls 0.23+ requires explicit crypto provider selection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing_from_env("info");

    info!("Starting georeport pipeline v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(Path::new("config"))?;
    config
        .workers
        .check_consumer_count(&config.broker)
        .context("Invalid worker configuration")?;
    info!(
        broker_kind = ?config.broker.kind,
        brokers = ?config.broker.brokers,
        storage = %config.storage.endpoint,
        ingress = ?config.server.ingress,
        action_stage = ?config.server.action_stage,
        "Loaded configuration"
    );

    let (publisher, broker) = build_broker(&config);

    for queue in config.queues.all() {
        if let Err(e) = broker.declare(&queue).await {
            // Consumers declare again when they connect.
            error!(queue = %queue, error = %e, "Failed to declare queue");
        }
    }

    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(config.storage.clone()));
    check_health(broker.as_ref(), store.as_ref()).await;

    let computer = GeoTiffComputer::with_max_concurrent(
        config.workers.compute_timeout(),
        config.workers.max_concurrent_computes,
    );
    let extraction = ExtractionStage::new(store.clone(), Arc::new(computer));

    let textgen = OpenAiClient::new(config.textgen.clone())
        .context("Failed to create text generation client")?;
    let mailer = SmtpMailer::new(&config.mail).context("Failed to create SMTP transport")?;
    let report = ReportStage::new(Arc::new(textgen), Arc::new(mailer), config.workers.ledger());
    if !config.workers.ledger_enabled {
        warn!("Report ledger disabled: redelivered messages send duplicate emails");
    }

    let cancel = CancellationToken::new();

    let worker_handles = if config.workers.enabled {
        let scheduler = WorkerScheduler::new(config.workers.clone(), broker.clone())
            .route(
                config.queues.uploader.clone(),
                Arc::new(ExtractionHandler::new(
                    extraction.clone(),
                    publisher.clone(),
                    config.queues.raw_data.clone(),
                )),
            )
            .route(
                config.queues.raw_data.clone(),
                Arc::new(ReportHandler::new(report.clone())),
            );
        scheduler
            .start(cancel.clone())
            .await
            .context("Failed to start queue consumers")?
    } else {
        info!("Queue consumers disabled");
        Vec::new()
    };

    let mut state = AppState::new(publisher.clone(), config.queues.clone());
    if config.server.ingress == IngressMode::Invoke {
        let invoker = ActionInvoker::new(config.invoker.clone())
            .context("Failed to create action invoker")?;
        state = state.with_invoker(invoker);
    }
    match config.server.action_stage {
        Some(ActionStageKind::Extract) => {
            state = state.with_action(ActionStage::Extract(extraction))
        }
        Some(ActionStageKind::Report) => state = state.with_action(ActionStage::Report(report)),
        None => {}
    }

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("Shutting down...");
    cancel.cancel();

    // In-flight deliveries finish before their consumer exits.
    for handle in worker_handles {
        match tokio::time::timeout(Duration::from_secs(30), handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Worker task panicked"),
            Err(_) => warn!("Worker did not stop within 30s"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Builds the configured broker, as both a publisher and a consumer factory.
fn build_broker(config: &Config) -> (Arc<dyn QueuePublisher>, Arc<dyn Broker>) {
    match config.broker.kind {
        BrokerKind::Redpanda => {
            let broker = Arc::new(RedpandaBroker::new(
                config.broker.clone(),
                config.queues.clone(),
            ));
            let publisher: Arc<dyn QueuePublisher> = broker.clone();
            let broker: Arc<dyn Broker> = broker;
            (publisher, broker)
        }
        BrokerKind::Memory => {
            warn!("Using in-memory broker: queued messages are lost on exit");
            let broker = Arc::new(MemoryBroker::with_settings(
                config.queues.dead_letter_suffix.clone(),
                config.broker.max_wait(),
            ));
            let publisher: Arc<dyn QueuePublisher> = broker.clone();
            let broker: Arc<dyn Broker> = broker;
            (publisher, broker)
        }
    }
}

/// Load configuration from `<dir>/default`, `<dir>/local`, and environment.
fn load_config(dir: &Path) -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config files if they exist; local settings win
        .add_source(
            config::File::with_name(&dir.join("default").to_string_lossy())
                .required(false)
                .format(config::FileFormat::Toml),
        )
        .add_source(
            config::File::with_name(&dir.join("local").to_string_lossy())
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("GEOREPORT")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Environment names used by the storage, action, text-generation, and mail
/// deployments.
fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Ok(brokers) = std::env::var("GEOREPORT_BROKER_BROKERS") {
        config.broker.brokers = brokers.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Ok(username) = std::env::var("GEOREPORT_BROKER_SASL_USERNAME") {
        config.broker.sasl_username = Some(username);
    }
    if let Ok(password) = std::env::var("GEOREPORT_BROKER_SASL_PASSWORD") {
        config.broker.sasl_password = Some(password);
    }

    if let Ok(host) = std::env::var("MINIO_HOST") {
        config.storage.endpoint = host;
    }
    if let Ok(access_key) = std::env::var("MINIO_BUCKET_ACCESS_KEY") {
        config.storage.access_key = access_key;
    }
    if let Ok(secret_key) = std::env::var("MINIO_BUCKET_SECRET_KEY") {
        config.storage.secret_key = secret_key;
    }

    if let Ok(api_host) = std::env::var("OPENWHISK_API_HOST") {
        config.invoker.api_host = api_host;
    }
    if let Ok(namespace) = std::env::var("OPENWHISK_NAMESPACE") {
        config.invoker.namespace = namespace;
    }
    if let Ok(action_name) = std::env::var("OPENWHISK_ACTION_NAME") {
        config.invoker.action_name = action_name;
    }
    if let Ok(auth_key) = std::env::var("OPENWHISK_AUTH_KEY") {
        config.invoker.auth_key = auth_key;
    }

    if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
        config.textgen.api_key = api_key;
    }

    if let Ok(host) = std::env::var("SMTP_SERVER") {
        config.mail.host = host;
    }
    if let Ok(port) = std::env::var("SMTP_PORT") {
        config.mail.port = port
            .parse()
            .with_context(|| format!("SMTP_PORT is not a port number: {port}"))?;
    }
    if let Ok(from) = std::env::var("SMTP_FROM_EMAIL") {
        config.mail.from = from;
    }
    if let Ok(to) = std::env::var("SMTP_TO_EMAIL") {
        config.mail.to = to;
    }

    Ok(())
}

/// Check component health on startup.
async fn check_health(broker: &dyn Broker, store: &dyn ObjectStore) {
    if broker.health_check().await {
        health().broker.set_healthy();
        info!("Broker connection: healthy");
    } else {
        health().broker.set_unhealthy("Connection failed");
        error!("Broker connection: unhealthy");
    }

    if store.health_check().await {
        health().object_store.set_healthy();
        info!("Object store connection: healthy");
    } else {
        health().object_store.set_unhealthy("Connection failed");
        error!("Object store connection: unhealthy");
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
