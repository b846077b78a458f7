// =============================================================================
// Bollinger Mean-Reversion Engine
// =============================================================================
//
// Entry: price at or below the lower band (SMA20 - 2σ). Sized at 25% of
// available cash, stop 3% under entry, target at the middle band (or the
// upper band when `exit_at_middle` is off).
//
// Exit: price back at the exit band (recomputed each tick), a 4% gain over
// entry, the stop, or the maximum hold period.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::BollingerEngineConfig;
use crate::engines::{hold_days, whole_shares, StrategyEngine, TradeSignal};
use crate::indicators::bollinger::bollinger_bands;
use crate::ledger::{Account, Position};
use crate::market_data::MarketSnapshot;
use crate::types::{StrategyKind, TradeAction};

/// Confidence attached to every band-touch entry signal.
const ENTRY_CONFIDENCE: f64 = 0.80;

pub struct BollingerReversionEngine {
    config: BollingerEngineConfig,
}

impl BollingerReversionEngine {
    pub fn new(config: BollingerEngineConfig) -> Self {
        Self { config }
    }
}

impl StrategyEngine for BollingerReversionEngine {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BollingerMeanReversion
    }

    fn required_history(&self) -> usize {
        20.max(self.config.period)
    }

    fn position_size(&self, available_cash: f64, price: f64) -> i64 {
        whole_shares(available_cash, self.config.position_size, price)
    }

    fn generate_signal(
        &self,
        snapshot: &MarketSnapshot,
        account: &Account,
        has_position: bool,
    ) -> TradeSignal {
        let symbol = snapshot.symbol.as_str();
        let price = snapshot.current_price;

        if snapshot.closes.len() < self.required_history() {
            return TradeSignal::hold(symbol, price, "insufficient data");
        }
        if price <= 0.0 {
            return TradeSignal::hold(symbol, price, "no usable quote");
        }
        if has_position {
            return TradeSignal::hold(symbol, price, "position already open");
        }

        let Some(bands) =
            bollinger_bands(&snapshot.closes, self.config.period, self.config.num_std)
        else {
            return TradeSignal::hold(symbol, price, "insufficient data");
        };

        if price > bands.lower {
            return TradeSignal::hold(
                symbol,
                price,
                format!("price {price:.2} above lower band {:.2}", bands.lower),
            );
        }

        let quantity = self.position_size(account.cash, price);
        let stop_loss = price * (1.0 - self.config.stop_pct);
        let profit_target = if self.config.exit_at_middle {
            bands.middle
        } else {
            bands.upper
        };

        debug!(symbol, price, lower = bands.lower, quantity, "band-touch entry signal");

        let mut signal = TradeSignal {
            action: TradeAction::Buy,
            symbol: symbol.to_string(),
            quantity,
            price,
            stop_loss: Some(stop_loss),
            profit_target: Some(profit_target),
            confidence: ENTRY_CONFIDENCE,
            reason: format!("price {price:.2} at lower band {:.2}", bands.lower),
            indicators: Default::default(),
        };
        signal.indicators.insert("bb_upper".into(), bands.upper);
        signal.indicators.insert("bb_middle".into(), bands.middle);
        signal.indicators.insert("bb_lower".into(), bands.lower);
        signal
    }

    fn monitor_position(
        &self,
        position: &Position,
        snapshot: &MarketSnapshot,
        as_of: DateTime<Utc>,
    ) -> TradeSignal {
        let symbol = position.symbol.as_str();
        let price = snapshot.current_price;

        // Reversion target recomputed from the current window.
        if let Some(bands) =
            bollinger_bands(&snapshot.closes, self.config.period, self.config.num_std)
        {
            let exit_band = if self.config.exit_at_middle {
                bands.middle
            } else {
                bands.upper
            };
            if price >= exit_band {
                return TradeSignal::sell(symbol, price, "mean reversion complete");
            }
        }

        if price >= position.entry_price * (1.0 + self.config.profit_target) {
            return TradeSignal::sell(symbol, price, "profit target");
        }
        if price <= position.stop_loss {
            return TradeSignal::sell(symbol, price, "stop loss");
        }

        let held = hold_days(position, as_of);
        if held >= self.config.max_hold_days as f64 {
            return TradeSignal::sell(
                symbol,
                price,
                format!("max hold period ({:.0} days)", held),
            );
        }

        TradeSignal::hold(symbol, price, "holding")
    }
}
