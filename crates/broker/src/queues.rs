//! Queue names used by the pipeline stages.

use serde::{Deserialize, Serialize};

/// Names of the pipeline's queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueNames {
    /// Upload notifications waiting for metadata extraction.
    #[serde(default = "default_uploader")]
    pub uploader: String,
    /// Extracted metadata waiting for a report.
    #[serde(default = "default_raw_data")]
    pub raw_data: String,
    /// Appended to a queue name to form its dead-letter queue.
    #[serde(default = "default_dead_letter_suffix")]
    pub dead_letter_suffix: String,
}

fn default_uploader() -> String {
    "uploader".to_string()
}

fn default_raw_data() -> String {
    "raw_data".to_string()
}

fn default_dead_letter_suffix() -> String {
    ".dead_letter".to_string()
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            uploader: default_uploader(),
            raw_data: default_raw_data(),
            dead_letter_suffix: default_dead_letter_suffix(),
        }
    }
}

impl QueueNames {
    /// Dead-letter queue for `queue`.
    pub fn dead_letter(&self, queue: &str) -> String {
        format!("{queue}{}", self.dead_letter_suffix)
    }

    /// Every queue the pipeline declares at startup.
    pub fn all(&self) -> Vec<String> {
        vec![
            self.uploader.clone(),
            self.raw_data.clone(),
            self.dead_letter(&self.uploader),
            self.dead_letter(&self.raw_data),
        ]
    }
}

/// Headers attached to dead-lettered records.
pub mod header {
    pub const REASON: &str = "x-dead-letter-reason";
    pub const ORIGINAL_QUEUE: &str = "x-original-queue";
    pub const ATTEMPTS: &str = "x-attempts";
}
