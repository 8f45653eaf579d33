//! Settlement of a consumed queue message.

use crate::error::Error;

/// What the consumer should do with a delivery once its handler returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Fully processed; acknowledge.
    Ack,
    /// Transient failure; redeliver after backoff.
    Retry { reason: String },
    /// Permanent failure; park in the dead-letter queue.
    DeadLetter { reason: String },
}

impl Outcome {
    pub fn retry(reason: impl Into<String>) -> Self {
        Self::Retry {
            reason: reason.into(),
        }
    }

    pub fn dead_letter(reason: impl Into<String>) -> Self {
        Self::DeadLetter {
            reason: reason.into(),
        }
    }

    /// Classifies a handler error.
    pub fn from_error(err: &Error) -> Self {
        if err.is_transient() {
            Self::retry(err.to_string())
        } else {
            Self::dead_letter(err.to_string())
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Retry { .. } => "retry",
            Self::DeadLetter { .. } => "dead_letter",
        }
    }
}

impl<T> From<Result<T, Error>> for Outcome {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(_) => Self::Ack,
            Err(e) => Self::from_error(&e),
        }
    }
}
