// =============================================================================
// Market Data — abstract source capability and source chaining
// =============================================================================
//
// Everything downstream (classifier, engines, executor) consumes market data
// through the `MarketDataSource` capability: one fetch per symbol returning
// recent daily closes, volumes, and the current quote. Concrete sources are
// interchangeable; `ChainedSource` composes them in preference order
// (primary HTTP API, then local bar files, then the fallback HTTP API).
// =============================================================================

pub mod http;
pub mod local;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::warn;

use crate::error::{Error, Result};

/// One fetch worth of market data for a symbol.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    /// Daily closes, oldest first.
    pub closes: Vec<f64>,
    /// Daily volumes, aligned with `closes`.
    pub volumes: Vec<f64>,
    pub current_price: f64,
    pub current_volume: f64,
    /// Which source produced this snapshot (surfaced to callers, never used
    /// in decisions).
    pub source: String,
}

impl MarketSnapshot {
    /// Basic shape check: non-empty history and a positive quote.
    pub fn is_usable(&self) -> bool {
        !self.closes.is_empty() && self.current_price > 0.0
    }
}

/// Abstract market-data capability.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch recent daily bars and the current quote for `symbol`.
    async fn fetch(&self, symbol: &str) -> Result<MarketSnapshot>;

    /// Short tag identifying the source in logs and snapshots.
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Chained source
// ---------------------------------------------------------------------------

/// Tries each inner source in order, returning the first usable snapshot.
pub struct ChainedSource {
    sources: Vec<Arc<dyn MarketDataSource>>,
}

impl ChainedSource {
    pub fn new(sources: Vec<Arc<dyn MarketDataSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl MarketDataSource for ChainedSource {
    async fn fetch(&self, symbol: &str) -> Result<MarketSnapshot> {
        let mut last_detail = "no sources configured".to_string();

        for source in &self.sources {
            match source.fetch(symbol).await {
                Ok(snapshot) if snapshot.is_usable() => return Ok(snapshot),
                Ok(_) => {
                    last_detail = format!("{} returned an unusable snapshot", source.name());
                    warn!(symbol, source = source.name(), "unusable snapshot, trying next source");
                }
                Err(e) => {
                    last_detail = e.to_string();
                    warn!(symbol, source = source.name(), error = %e, "fetch failed, trying next source");
                }
            }
        }

        Err(Error::DataUnavailable {
            symbol: symbol.to_string(),
            detail: last_detail,
        })
    }

    fn name(&self) -> &'static str {
        "chained"
    }
}

// ---------------------------------------------------------------------------
// Static source (tests and offline runs)
// ---------------------------------------------------------------------------

/// In-memory source with pre-seeded snapshots, keyed by symbol.
#[derive(Default)]
pub struct StaticSource {
    snapshots: RwLock<HashMap<String, MarketSnapshot>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the snapshot for a symbol.
    pub fn set(&self, snapshot: MarketSnapshot) {
        self.snapshots
            .write()
            .insert(snapshot.symbol.clone(), snapshot);
    }

    /// Convenience: seed a symbol from closes/volumes with the last bar as
    /// the current quote.
    pub fn seed(&self, symbol: &str, closes: Vec<f64>, volumes: Vec<f64>) {
        let current_price = closes.last().copied().unwrap_or(0.0);
        let current_volume = volumes.last().copied().unwrap_or(0.0);
        self.set(MarketSnapshot {
            symbol: symbol.to_string(),
            closes,
            volumes,
            current_price,
            current_volume,
            source: "static".into(),
        });
    }
}

#[async_trait]
impl MarketDataSource for StaticSource {
    async fn fetch(&self, symbol: &str) -> Result<MarketSnapshot> {
        self.snapshots
            .read()
            .get(symbol)
            .cloned()
            .ok_or_else(|| Error::DataUnavailable {
                symbol: symbol.to_string(),
                detail: "symbol not seeded".into(),
            })
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(symbol: &str, price: f64) -> MarketSnapshot {
        MarketSnapshot {
            symbol: symbol.into(),
            closes: vec![price; 25],
            volumes: vec![1_000.0; 25],
            current_price: price,
            current_volume: 1_000.0,
            source: "static".into(),
        }
    }

    #[tokio::test]
    async fn static_source_roundtrip() {
        let source = StaticSource::new();
        source.set(snap("SPY", 545.0));

        let got = source.fetch("SPY").await.unwrap();
        assert_eq!(got.closes.len(), 25);
        assert!((got.current_price - 545.0).abs() < 1e-12);

        assert!(source.fetch("QQQ").await.is_err());
    }

    #[tokio::test]
    async fn chained_falls_through_to_second_source() {
        let empty = Arc::new(StaticSource::new());
        let seeded = Arc::new(StaticSource::new());
        seeded.set(snap("MU", 95.5));

        let chain = ChainedSource::new(vec![empty, seeded]);
        let got = chain.fetch("MU").await.unwrap();
        assert!((got.current_price - 95.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn chained_skips_unusable_snapshots() {
        let bad = Arc::new(StaticSource::new());
        bad.set(MarketSnapshot {
            symbol: "MU".into(),
            closes: vec![],
            volumes: vec![],
            current_price: 0.0,
            current_volume: 0.0,
            source: "static".into(),
        });
        let good = Arc::new(StaticSource::new());
        good.set(snap("MU", 95.5));

        let chain = ChainedSource::new(vec![bad, good]);
        assert!(chain.fetch("MU").await.is_ok());
    }

    #[tokio::test]
    async fn chained_reports_unavailable_when_exhausted() {
        let chain = ChainedSource::new(vec![]);
        let err = chain.fetch("SPY").await.unwrap_err();
        assert!(matches!(err, Error::DataUnavailable { .. }));
    }
}
