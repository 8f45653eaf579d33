//! Delivery ledger for report emails.
//!
//! Redelivered `raw_data` messages would otherwise email the same report
//! again. The ledger remembers the delivery key of every sent report for a
//! bounded time; a disabled ledger never remembers anything.
//!
//! Sending is guarded by a claim: while one consumer holds the claim for a
//! key, every other consumer is told the report is in progress. Checking and
//! claiming happen under one lock, so two consumers never both send.

use moka::future::Cache;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct DeliveryLedger {
    sent: Option<Cache<String, ()>>,
    pending: Arc<Mutex<HashSet<String>>>,
}

/// Answer to [`DeliveryLedger::claim`].
#[must_use]
pub enum Claim {
    /// The caller may send; commit the guard once the report is out.
    Granted(LedgerClaim),
    AlreadySent,
    /// Another consumer holds the claim right now.
    InProgress,
}

/// Exclusive right to send one report. Dropping it without committing
/// releases the key, so a later attempt can send.
pub struct LedgerClaim {
    key: String,
    ledger: Option<DeliveryLedger>,
}

impl LedgerClaim {
    /// Records the report as sent and releases the claim.
    pub async fn commit(mut self) {
        if let Some(ledger) = self.ledger.take() {
            if let Some(cache) = &ledger.sent {
                cache.insert(self.key.clone(), ()).await;
                debug!(key = %self.key, "Recorded report delivery");
            }
            ledger.pending.lock().remove(&self.key);
        }
    }
}

impl Drop for LedgerClaim {
    fn drop(&mut self) {
        if let Some(ledger) = self.ledger.take() {
            ledger.pending.lock().remove(&self.key);
        }
    }
}

impl DeliveryLedger {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        Self {
            sent: Some(
                Cache::builder()
                    .max_capacity(capacity)
                    .time_to_live(ttl)
                    .build(),
            ),
            pending: Arc::default(),
        }
    }

    /// A ledger that lets every delivery through.
    pub fn disabled() -> Self {
        Self {
            sent: None,
            pending: Arc::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sent.is_some()
    }

    /// Whether a report with this key was already sent.
    pub fn contains(&self, key: &str) -> bool {
        self.sent
            .as_ref()
            .is_some_and(|cache| cache.contains_key(key))
    }

    /// Claims the right to send the report for `key`.
    pub fn claim(&self, key: &str) -> Claim {
        let Some(cache) = &self.sent else {
            return Claim::Granted(LedgerClaim {
                key: key.to_string(),
                ledger: None,
            });
        };

        let mut pending = self.pending.lock();
        if cache.contains_key(key) {
            return Claim::AlreadySent;
        }
        if !pending.insert(key.to_string()) {
            return Claim::InProgress;
        }

        Claim::Granted(LedgerClaim {
            key: key.to_string(),
            ledger: Some(self.clone()),
        })
    }
}
