// =============================================================================
// Local daily-bar file source
// =============================================================================
//
// Reads `{bars_dir}/{SYMBOL}.json` written by an external bar-sync job:
//
//   { "closes": [...], "volumes": [...], "price": 545.0, "volume": 64100000 }
//
// Like the HTTP source, a missing current quote falls back to the last bar.
// The read happens on the blocking pool so the async executor never stalls
// on disk I/O.
// =============================================================================

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::market_data::{MarketDataSource, MarketSnapshot};

#[derive(Debug, Deserialize)]
struct BarFile {
    #[serde(default)]
    closes: Vec<f64>,
    #[serde(default)]
    volumes: Vec<f64>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

/// File-backed source rooted at a bars directory.
pub struct LocalBarSource {
    bars_dir: PathBuf,
}

impl LocalBarSource {
    pub fn new(bars_dir: impl Into<PathBuf>) -> Self {
        Self {
            bars_dir: bars_dir.into(),
        }
    }
}

#[async_trait]
impl MarketDataSource for LocalBarSource {
    async fn fetch(&self, symbol: &str) -> Result<MarketSnapshot> {
        let path = self.bars_dir.join(format!("{symbol}.json"));
        debug!(symbol, path = %path.display(), "reading local bars");

        let raw = tokio::task::spawn_blocking(move || std::fs::read_to_string(&path))
            .await
            .map_err(|e| Error::DataUnavailable {
                symbol: symbol.to_string(),
                detail: format!("blocking read join error: {e}"),
            })?
            .map_err(|e| Error::DataUnavailable {
                symbol: symbol.to_string(),
                detail: format!("bar file unreadable: {e}"),
            })?;

        let bars: BarFile = serde_json::from_str(&raw).map_err(|e| Error::DataUnavailable {
            symbol: symbol.to_string(),
            detail: format!("bar file malformed: {e}"),
        })?;

        let current_price = bars
            .price
            .or_else(|| bars.closes.last().copied())
            .unwrap_or(0.0);
        let current_volume = bars
            .volume
            .or_else(|| bars.volumes.last().copied())
            .unwrap_or(0.0);

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            closes: bars.closes,
            volumes: bars.volumes,
            current_price,
            current_volume,
            source: "local".into(),
        })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
