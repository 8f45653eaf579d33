//! Queue workers for the georeport pipeline.
//!
//! - Metadata extraction (`uploader` → object metadata → `raw_data`)
//! - Report generation (`raw_data` → narrative → email)
//!
//! The stages are also run directly by the action runtime, without a queue.

pub mod config;
pub mod consumer;
pub mod handlers;
pub mod ledger;
pub mod mailer;
pub mod scheduler;
pub mod stage;
pub mod textgen;

pub use config::WorkerConfig;
pub use consumer::{ConsumerWorker, ConsumerWorkerConfig, MessageHandler};
pub use handlers::{ExtractionHandler, ReportHandler};
pub use ledger::{Claim, DeliveryLedger, LedgerClaim};
pub use mailer::{MailConfig, Mailer, SmtpMailer};
pub use scheduler::WorkerScheduler;
pub use stage::{ExtractionStage, ReportDelivery, ReportStage};
pub use textgen::{OpenAiClient, TextGenConfig, TextGenerator};
