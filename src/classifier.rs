// =============================================================================
// Classifier — derives a StockProfile from a symbol and recent market data
// =============================================================================
//
// Tier rules, first match wins:
//   ETF override  -> etf
//   price < penny_threshold -> penny_stock
//   market cap > large_cap_threshold -> large_cap
//   market cap > mid_cap_threshold   -> mid_cap
//   market cap > 0                   -> small_cap
//   otherwise                        -> unknown
//
// Volatility is the stdev of trailing daily log returns (up to 30, at least
// 5) annualized by √252; too little history yields 0 plus a warning on the
// profile rather than an error.
// =============================================================================

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::RoutingConfig;
use crate::error::{Error, Result};
use crate::indicators::annualized_volatility;
use crate::market_data::{MarketDataSource, MarketSnapshot};
use crate::types::Classification;

/// Closes consumed by the volatility window.
const VOLATILITY_WINDOW: usize = 30;
/// Minimum daily returns required before volatility is reported.
const MIN_VOLATILITY_RETURNS: usize = 5;
/// History length below which the profile carries a data warning.
const FULL_HISTORY: usize = 20;

/// Derived, non-persisted view of a symbol used for routing.
#[derive(Debug, Clone, Serialize)]
pub struct StockProfile {
    pub symbol: String,
    pub price: f64,
    pub volatility_annualized: f64,
    /// Dollars; 0 means unknown.
    pub market_cap: f64,
    /// Sector label, `UNKNOWN` when no reference facts exist.
    pub sector: String,
    pub is_etf: bool,
    pub avg_volume: f64,
    pub classification: Classification,
    /// Data-quality warning, e.g. short history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Builds stock profiles from market data plus configured reference facts.
pub struct Classifier {
    routing: RoutingConfig,
    source: Arc<dyn MarketDataSource>,
}

impl Classifier {
    pub fn new(routing: RoutingConfig, source: Arc<dyn MarketDataSource>) -> Self {
        Self { routing, source }
    }

    /// Derive the profile for `symbol`. Market-data failures propagate; thin
    /// history degrades the profile instead.
    pub async fn classify(&self, symbol: &str) -> Result<StockProfile> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() || symbol.len() > 10 {
            return Err(Error::DataUnavailable {
                symbol,
                detail: "symbol must be 1-10 characters".into(),
            });
        }

        let snapshot = self.source.fetch(&symbol).await?;
        Ok(self.classify_snapshot(&symbol, &snapshot))
    }

    /// Derive the profile from an already-fetched snapshot. Used by the
    /// executor, which shares one fetch between profiling and signals.
    pub fn classify_snapshot(&self, symbol: &str, snapshot: &MarketSnapshot) -> StockProfile {
        let price = snapshot.current_price;
        let volatility =
            annualized_volatility(&snapshot.closes, VOLATILITY_WINDOW, MIN_VOLATILITY_RETURNS);

        let avg_volume = if snapshot.volumes.is_empty() {
            0.0
        } else {
            snapshot.volumes.iter().sum::<f64>() / snapshot.volumes.len() as f64
        };

        let warning = (snapshot.closes.len() < FULL_HISTORY).then(|| {
            format!(
                "only {} closes available, volatility may be unreliable",
                snapshot.closes.len()
            )
        });

        let facts = self.routing.symbol_facts.get(symbol);
        let market_cap = facts.map(|f| f.market_cap).unwrap_or(0.0);
        let sector = facts
            .and_then(|f| f.sector.clone())
            .unwrap_or_else(|| "UNKNOWN".into());

        let is_etf = self
            .routing
            .etf_symbols
            .iter()
            .any(|s| s.eq_ignore_ascii_case(symbol));

        let classification = self.tier(is_etf, price, market_cap);

        debug!(
            symbol = %symbol,
            price,
            volatility,
            market_cap,
            classification = %classification,
            "profile derived"
        );

        StockProfile {
            symbol: symbol.to_string(),
            price,
            volatility_annualized: volatility,
            market_cap,
            sector,
            is_etf,
            avg_volume,
            classification,
            warning,
        }
    }

    /// First-match-wins tier rules.
    fn tier(&self, is_etf: bool, price: f64, market_cap: f64) -> Classification {
        if is_etf {
            Classification::Etf
        } else if price <= 0.0 {
            Classification::Unknown
        } else if price < self.routing.penny_threshold {
            Classification::PennyStock
        } else if market_cap > self.routing.large_cap_threshold {
            Classification::LargeCap
        } else if market_cap > self.routing.mid_cap_threshold {
            Classification::MidCap
        } else if market_cap > 0.0 {
            Classification::SmallCap
        } else {
            Classification::Unknown
        }
    }
}
