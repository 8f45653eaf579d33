//! Application state shared across handlers.

use broker::{QueueNames, QueuePublisher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use worker::{ExtractionStage, ReportStage};

use crate::invoker::ActionInvoker;

/// What the storage webhook does with an upload notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngressMode {
    /// Publish an upload event to the `uploader` queue.
    #[default]
    Queue,
    /// Forward the notification to an action and wait for its result.
    Invoke,
}

/// Stage hosted behind `/run`, as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStageKind {
    Extract,
    Report,
}

/// Stage hosted behind `/run`.
#[derive(Clone)]
pub enum ActionStage {
    Extract(ExtractionStage),
    Report(ReportStage),
}

impl ActionStage {
    pub fn kind(&self) -> ActionStageKind {
        match self {
            Self::Extract(_) => ActionStageKind::Extract,
            Self::Report(_) => ActionStageKind::Report,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Queue publisher (Redpanda in production, in-memory in tests)
    pub publisher: Arc<dyn QueuePublisher>,
    pub queues: QueueNames,
    pub ingress: IngressMode,
    pub invoker: Option<ActionInvoker>,
    pub action: Option<ActionStage>,
}

impl AppState {
    /// Queue-mode ingress with no action stage.
    pub fn new(publisher: Arc<dyn QueuePublisher>, queues: QueueNames) -> Self {
        Self {
            publisher,
            queues,
            ingress: IngressMode::Queue,
            invoker: None,
            action: None,
        }
    }

    /// Switches the webhook to invoke mode.
    pub fn with_invoker(mut self, invoker: ActionInvoker) -> Self {
        self.ingress = IngressMode::Invoke;
        self.invoker = Some(invoker);
        self
    }

    pub fn with_action(mut self, action: ActionStage) -> Self {
        self.action = Some(action);
        self
    }
}
