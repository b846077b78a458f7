// =============================================================================
// Strategy Engines — common contract and registry
// =============================================================================
//
// Each engine is a self-contained signal generator and position-lifecycle
// manager: `generate_signal` proposes entries from fresh market data, and
// `monitor_position` decides whether an open position exits on this tick.
// Engines are stateless between calls; anything that must survive a tick
// (the trailing stop, the entry time) lives in the persisted position row.
// =============================================================================

pub mod bollinger_reversion;
pub mod momentum;
pub mod rsi_reversion;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EnginesConfig;
use crate::ledger::{Account, Position};
use crate::market_data::MarketSnapshot;
use crate::types::{StrategyKind, TradeAction};

/// A signal emitted by an engine for a single symbol.
#[derive(Debug, Clone, Serialize)]
pub struct TradeSignal {
    pub action: TradeAction,
    pub symbol: String,
    /// Whole shares; meaningful for BUY only.
    pub quantity: i64,
    pub price: f64,
    pub stop_loss: Option<f64>,
    pub profit_target: Option<f64>,
    pub confidence: f64,
    pub reason: String,
    /// Indicator values that produced the signal, for the audit trail.
    pub indicators: BTreeMap<String, f64>,
}

impl TradeSignal {
    /// A do-nothing signal with a reason.
    pub fn hold(symbol: &str, price: f64, reason: impl Into<String>) -> Self {
        Self {
            action: TradeAction::Hold,
            symbol: symbol.to_string(),
            quantity: 0,
            price,
            stop_loss: None,
            profit_target: None,
            confidence: 0.0,
            reason: reason.into(),
            indicators: BTreeMap::new(),
        }
    }

    /// An exit signal at `price`.
    pub fn sell(symbol: &str, price: f64, reason: impl Into<String>) -> Self {
        Self {
            action: TradeAction::Sell,
            symbol: symbol.to_string(),
            quantity: 0,
            price,
            stop_loss: None,
            profit_target: None,
            confidence: 1.0,
            reason: reason.into(),
            indicators: BTreeMap::new(),
        }
    }

    /// A BUY is executable only with a positive quantity and a stop.
    pub fn is_executable_buy(&self) -> bool {
        self.action == TradeAction::Buy && self.quantity > 0 && self.stop_loss.is_some()
    }
}

/// Common capability implemented by every strategy engine.
pub trait StrategyEngine: Send + Sync {
    /// Which strategy this engine implements.
    fn kind(&self) -> StrategyKind;

    /// Stable engine name (the strategy key).
    fn name(&self) -> &'static str {
        self.kind().key()
    }

    /// Minimum number of closes needed before a signal can be generated.
    fn required_history(&self) -> usize {
        20
    }

    /// Whole shares to buy at `price` given `available_cash`, applying the
    /// engine's cap fraction. Never negative.
    fn position_size(&self, available_cash: f64, price: f64) -> i64;

    /// Evaluate fresh market data for an entry. Pure given its inputs.
    /// `has_position` reflects whether the symbol already holds a position.
    fn generate_signal(
        &self,
        snapshot: &MarketSnapshot,
        account: &Account,
        has_position: bool,
    ) -> TradeSignal;

    /// Evaluate an open position for exit. Returns SELL or HOLD; a HOLD may
    /// carry an updated `stop_loss` (trailing stops) for the executor to
    /// persist.
    fn monitor_position(
        &self,
        position: &Position,
        snapshot: &MarketSnapshot,
        as_of: DateTime<Utc>,
    ) -> TradeSignal;
}

/// Build the engine set from config, keyed by strategy.
pub fn build_engines(
    config: &EnginesConfig,
    min_stop_buffer: f64,
) -> HashMap<StrategyKind, Arc<dyn StrategyEngine>> {
    let mut engines: HashMap<StrategyKind, Arc<dyn StrategyEngine>> = HashMap::new();
    engines.insert(
        StrategyKind::RsiMeanReversion,
        Arc::new(rsi_reversion::RsiReversionEngine::new(
            config.rsi.clone(),
            min_stop_buffer,
        )),
    );
    engines.insert(
        StrategyKind::MomentumBreakout,
        Arc::new(momentum::MomentumBreakoutEngine::new(config.momentum.clone())),
    );
    engines.insert(
        StrategyKind::BollingerMeanReversion,
        Arc::new(bollinger_reversion::BollingerReversionEngine::new(
            config.bollinger.clone(),
        )),
    );
    engines
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Floor `cash * fraction / price` to whole shares, clamped at zero.
pub(crate) fn whole_shares(cash: f64, fraction: f64, price: f64) -> i64 {
    if price <= 0.0 || cash <= 0.0 {
        return 0;
    }
    ((cash * fraction) / price).floor().max(0.0) as i64
}

/// Days the position has been held as of `as_of`. Unparseable entry times
/// count as zero so a corrupt row can never force an exit.
pub(crate) fn hold_days(position: &Position, as_of: DateTime<Utc>) -> f64 {
    match DateTime::parse_from_rfc3339(&position.entry_time) {
        Ok(entry) => {
            let secs = (as_of - entry.with_timezone(&Utc)).num_seconds();
            (secs.max(0) as f64) / 86_400.0
        }
        Err(_) => 0.0,
    }
}
