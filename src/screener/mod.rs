// =============================================================================
// Screener — recommendations from the external screening pipeline
// =============================================================================
//
// The screener writes a JSON document of candidate symbols with entry bands,
// targets, stops, and a confidence grade. This module normalizes those
// heterogeneous records into `Recommendation` values (parser), keeps the
// latest one per symbol (store), and feeds a bounded candidate queue with
// per-symbol cooldown coalescing (poller).
// =============================================================================

pub mod parser;
pub mod poller;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::ConfidenceLevel;

/// Canonical screener recommendation for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub symbol: String,
    /// Inclusive entry band.
    pub entry_low: f64,
    pub entry_high: f64,
    /// Above the band.
    pub target: f64,
    /// Below the band.
    pub stop: f64,
    pub confidence_level: ConfidenceLevel,
    pub issued_at: DateTime<Utc>,
}

impl Recommendation {
    /// Age of the recommendation at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.issued_at
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Latest recommendation per symbol, replaced wholesale on every poll.
#[derive(Default)]
pub struct RecommendationStore {
    latest: RwLock<HashMap<String, Recommendation>>,
}

impl RecommendationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace or insert recommendations from one screener document.
    pub fn absorb(&self, recs: Vec<Recommendation>) {
        let mut map = self.latest.write();
        for rec in recs {
            map.insert(rec.symbol.clone(), rec);
        }
    }

    /// The current recommendation for `symbol`, if any.
    pub fn latest(&self, symbol: &str) -> Option<Recommendation> {
        self.latest.read().get(symbol).cloned()
    }

    pub fn len(&self) -> usize {
        self.latest.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.read().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Candidate queue
// ---------------------------------------------------------------------------

/// Bounded multi-consumer queue of candidate symbols with per-symbol
/// cooldown: re-enqueues of the same symbol within the cooldown window are
/// coalesced away.
pub struct CandidateQueue {
    tx: async_channel::Sender<String>,
    rx: async_channel::Receiver<String>,
    last_enqueued: Mutex<HashMap<String, DateTime<Utc>>>,
    cooldown: Duration,
}

impl CandidateQueue {
    pub fn new(capacity: usize, cooldown_secs: i64) -> Self {
        let (tx, rx) = async_channel::bounded(capacity);
        Self {
            tx,
            rx,
            last_enqueued: Mutex::new(HashMap::new()),
            cooldown: Duration::seconds(cooldown_secs),
        }
    }

    /// Enqueue `symbol` unless it was enqueued within the cooldown or the
    /// queue is full. Returns whether the symbol was accepted.
    pub fn enqueue(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        {
            let seen = self.last_enqueued.lock();
            if let Some(at) = seen.get(symbol) {
                if now - *at < self.cooldown {
                    debug!(symbol, "candidate coalesced (cooldown)");
                    return false;
                }
            }
        }

        match self.tx.try_send(symbol.to_string()) {
            Ok(()) => {
                self.last_enqueued.lock().insert(symbol.to_string(), now);
                true
            }
            Err(_) => {
                // No cooldown mark: a dropped symbol may retry next poll.
                warn!(symbol, "candidate queue full, dropping");
                false
            }
        }
    }

    /// Receive the next candidate; `None` once the queue is closed and
    /// drained.
    pub async fn next(&self) -> Option<String> {
        self.rx.recv().await.ok()
    }

    /// Close the queue so workers drain and stop.
    pub fn close(&self) {
        self.tx.close();
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn rec(symbol: &str, issued_at: DateTime<Utc>) -> Recommendation {
        Recommendation {
            symbol: symbol.into(),
            entry_low: 10.0,
            entry_high: 11.0,
            target: 12.0,
            stop: 9.0,
            confidence_level: ConfidenceLevel::High,
            issued_at,
        }
    }

    #[test]
    fn store_keeps_latest_per_symbol() {
        let store = RecommendationStore::new();
        let t0 = Utc::now();
        store.absorb(vec![rec("SPY", t0), rec("MU", t0)]);
        assert_eq!(store.len(), 2);

        let t1 = t0 + Duration::hours(1);
        store.absorb(vec![rec("SPY", t1)]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.latest("SPY").unwrap().issued_at, t1);
        assert!(store.latest("NOPE").is_none());
    }

    #[tokio::test]
    async fn queue_coalesces_within_cooldown() {
        let queue = CandidateQueue::new(8, 3600);
        let now = Utc::now();

        assert!(queue.enqueue("SPY", now));
        assert!(!queue.enqueue("SPY", now + Duration::minutes(10)));
        assert!(queue.enqueue("SPY", now + Duration::hours(2)));
        assert_eq!(queue.pending(), 2);

        assert_eq!(queue.next().await.as_deref(), Some("SPY"));
    }

    #[tokio::test]
    async fn queue_drops_when_full() {
        let queue = CandidateQueue::new(1, 0);
        let now = Utc::now();
        assert!(queue.enqueue("A", now));
        assert!(!queue.enqueue("B", now));
    }

    #[tokio::test]
    async fn closed_queue_drains_then_ends() {
        let queue = CandidateQueue::new(4, 0);
        let now = Utc::now();
        queue.enqueue("A", now);
        queue.close();
        assert_eq!(queue.next().await.as_deref(), Some("A"));
        assert!(queue.next().await.is_none());
    }
}
