// =============================================================================
// RSI Mean-Reversion Engine
// =============================================================================
//
// Entry: 14-period Wilder RSI below the oversold line (default 45) while the
// symbol has no open position. Sized at 25% of available cash.
//
// Exit: RSI above the overbought line (default 55), profit target, stop
// loss, or the maximum hold period — whichever triggers first.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::RsiEngineConfig;
use crate::engines::{hold_days, whole_shares, StrategyEngine, TradeSignal};
use crate::indicators::rsi::latest_rsi;
use crate::ledger::{Account, Position};
use crate::market_data::MarketSnapshot;
use crate::types::{StrategyKind, TradeAction};

/// Confidence attached to every RSI entry signal.
const ENTRY_CONFIDENCE: f64 = 0.80;

pub struct RsiReversionEngine {
    config: RsiEngineConfig,
    /// Stop distance floor shared with the validator's buffer rule.
    min_stop_buffer: f64,
}

impl RsiReversionEngine {
    pub fn new(config: RsiEngineConfig, min_stop_buffer: f64) -> Self {
        Self {
            config,
            min_stop_buffer,
        }
    }

    fn stop_fraction(&self) -> f64 {
        self.min_stop_buffer.max(0.05)
    }
}

impl StrategyEngine for RsiReversionEngine {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RsiMeanReversion
    }

    fn required_history(&self) -> usize {
        // RSI needs period + 1 closes; the engine floor is 20 either way.
        20.max(self.config.period + 1)
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

        let Some(rsi) = latest_rsi(&snapshot.closes, self.config.period) else {
            return TradeSignal::hold(symbol, price, "insufficient data");
        };

        if has_position {
            return TradeSignal::hold(symbol, price, "position already open");
        }

        if rsi >= self.config.oversold {
            return TradeSignal::hold(
                symbol,
                price,
                format!("RSI {rsi:.1} not below oversold {:.0}", self.config.oversold),
            );
        }

        let quantity = self.position_size(account.cash, price);
        let stop_loss = price * (1.0 - self.stop_fraction());
        let profit_target = price * (1.0 + self.config.profit_target);

        debug!(symbol, rsi, quantity, stop_loss, profit_target, "RSI entry signal");

        let mut signal = TradeSignal {
            action: TradeAction::Buy,
            symbol: symbol.to_string(),
            quantity,
            price,
            stop_loss: Some(stop_loss),
            profit_target: Some(profit_target),
            confidence: ENTRY_CONFIDENCE,
            reason: format!(
                "RSI {rsi:.1} below oversold {:.0}",
                self.config.oversold
            ),
            indicators: Default::default(),
        };
        signal.indicators.insert("rsi".into(), rsi);
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

        if let Some(rsi) = latest_rsi(&snapshot.closes, self.config.period) {
            if rsi > self.config.overbought {
                let mut signal = TradeSignal::sell(
                    symbol,
                    price,
                    format!("RSI {rsi:.1} above overbought {:.0}", self.config.overbought),
                );
                signal.indicators.insert("rsi".into(), rsi);
                return signal;
            }
        }

        if price >= position.profit_target {
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
