//! Read position of a consumer on one partition.
//!
//! The cursor is the part of a consumer that decides which offset comes
//! next and how many attempts it has had. It holds no connection, so every
//! settlement path can be checked without a broker.

use pipeline_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Position committed for a partition.
///
/// `attempts` counts the deliveries already made of the record at
/// `next_offset`; it is zero unless that record was requeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedPosition {
    pub next_offset: i64,
    #[serde(default)]
    pub attempts: u32,
}

impl CommittedPosition {
    pub fn at(next_offset: i64) -> Self {
        Self {
            next_offset,
            attempts: 0,
        }
    }
}

/// Prefetch-of-one cursor: at most one offset is in flight, and the
/// position only moves past it on ack or dead-letter.
#[derive(Debug)]
pub struct Cursor {
    queue: String,
    position: CommittedPosition,
    in_flight: Option<i64>,
}

impl Cursor {
    pub fn new(queue: impl Into<String>, position: CommittedPosition) -> Self {
        Self {
            queue: queue.into(),
            position,
            in_flight: None,
        }
    }

    pub fn position(&self) -> CommittedPosition {
        self.position
    }

    pub fn next_offset(&self) -> i64 {
        self.position.next_offset
    }

    /// Fails while a delivery is unsettled.
    pub fn ensure_idle(&self) -> Result<()> {
        match self.in_flight {
            Some(tag) => Err(Error::internal(format!(
                "delivery {tag} on {} has not been settled",
                self.queue
            ))),
            None => Ok(()),
        }
    }

    /// Fails unless `tag` is the delivery in flight.
    pub fn ensure_in_flight(&self, tag: i64) -> Result<()> {
        if self.in_flight == Some(tag) {
            Ok(())
        } else {
            Err(Error::internal(format!(
                "delivery {tag} on {} is not in flight",
                self.queue
            )))
        }
    }

    /// Hands out the record at `offset` and returns its attempt number.
    ///
    /// A record past the committed position means the ones in between are
    /// gone (retention, or records without a value), so the attempt count
    /// starts over.
    pub fn begin(&mut self, offset: i64) -> Result<u32> {
        self.ensure_idle()?;
        if offset != self.position.next_offset {
            self.position = CommittedPosition::at(offset);
        }
        self.in_flight = Some(offset);
        Ok(self.position.attempts + 1)
    }

    /// Moves past a record that is never handed out.
    pub fn skip(&mut self, offset: i64) {
        if offset >= self.position.next_offset {
            self.position = CommittedPosition::at(offset + 1);
        }
    }

    /// Settles `tag` as done and moves past it.
    pub fn complete(&mut self, tag: i64) -> Result<CommittedPosition> {
        self.ensure_in_flight(tag)?;
        self.in_flight = None;
        self.position = CommittedPosition::at(tag + 1);
        Ok(self.position)
    }

    /// Settles `tag` for another delivery. `attempt` is the attempt that
    /// was just made.
    pub fn release(&mut self, tag: i64, attempt: u32) -> Result<CommittedPosition> {
        self.ensure_in_flight(tag)?;
        self.in_flight = None;
        self.position = CommittedPosition {
            next_offset: tag,
            attempts: attempt,
        };
        Ok(self.position)
    }
}
