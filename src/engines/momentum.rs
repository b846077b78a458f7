// =============================================================================
// Momentum Breakout Engine
// =============================================================================
//
// Entry: price clears the lookback resistance by a small margin on at least
// 1.5x average volume while the fast moving average sits above the slow one.
// Sized at 20% of available cash.
//
// The stop trails: each monitor tick compares `price * (1 - trailing_stop)`
// against the stored stop and ratchets upward on improvement — equivalent to
// tracking the highest price seen without a second persisted column. The
// initial stop is the tighter of the fixed and trailing distances.
//
// Exit: trailing stop hit, profit target, fast average dropping below the
// slow one (momentum lost), or the maximum hold period.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::MomentumEngineConfig;
use crate::engines::{hold_days, whole_shares, StrategyEngine, TradeSignal};
use crate::indicators::sma;
use crate::ledger::{Account, Position};
use crate::market_data::MarketSnapshot;
use crate::types::{StrategyKind, TradeAction};

/// Confidence attached to every breakout entry signal.
const ENTRY_CONFIDENCE: f64 = 0.85;

pub struct MomentumBreakoutEngine {
    config: MomentumEngineConfig,
}

/// Lookback aggregates feeding the entry decision.
struct BreakoutContext {
    resistance: f64,
    avg_volume: f64,
    ma_fast: f64,
    ma_slow: f64,
}

impl MomentumBreakoutEngine {
    pub fn new(config: MomentumEngineConfig) -> Self {
        Self { config }
    }

    /// Resistance and volume exclude the current bar; the moving averages
    /// include it.
    fn context(&self, closes: &[f64], volumes: &[f64]) -> Option<BreakoutContext> {
        let period = self.config.breakout_period;
        if closes.len() < period || volumes.len() < period {
            return None;
        }

        let window = &closes[closes.len() - period..closes.len() - 1];
        let resistance = window.iter().copied().fold(f64::MIN, f64::max);

        let vol_window = &volumes[volumes.len() - period..volumes.len() - 1];
        let avg_volume = vol_window.iter().sum::<f64>() / vol_window.len() as f64;

        let ma_fast = sma(closes, self.config.fast_period)?;
        let ma_slow = sma(closes, self.config.slow_period)?;

        Some(BreakoutContext {
            resistance,
            avg_volume,
            ma_fast,
            ma_slow,
        })
    }

    /// Initial stop: the tighter of the fixed and trailing distances.
    fn initial_stop(&self, price: f64) -> f64 {
        price * (1.0 - self.config.stop_loss.min(self.config.trailing_stop))
    }
}

impl StrategyEngine for MomentumBreakoutEngine {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MomentumBreakout
    }

    fn required_history(&self) -> usize {
        self.config.breakout_period.max(self.config.slow_period)
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

        let Some(ctx) = self.context(&snapshot.closes, &snapshot.volumes) else {
            return TradeSignal::hold(symbol, price, "insufficient data");
        };

        let breakout_level = ctx.resistance * (1.0 + self.config.breakout_margin);
        let volume_floor = ctx.avg_volume * self.config.volume_multiplier;

        let broke_out = price > breakout_level;
        let volume_confirms = snapshot.current_volume >= volume_floor;
        let momentum_up = ctx.ma_fast > ctx.ma_slow;

        if !(broke_out && volume_confirms && momentum_up) {
            return TradeSignal::hold(
                symbol,
                price,
                format!(
                    "no breakout (price {price:.2} vs level {breakout_level:.2}, \
                     volume x{:.2}, fast {} slow)",
                    if ctx.avg_volume > 0.0 {
                        snapshot.current_volume / ctx.avg_volume
                    } else {
                        0.0
                    },
                    if momentum_up { "above" } else { "below" },
                ),
            );
        }

        let quantity = self.position_size(account.cash, price);
        let stop_loss = self.initial_stop(price);
        let profit_target = price * (1.0 + self.config.profit_target);

        debug!(
            symbol,
            price,
            resistance = ctx.resistance,
            quantity,
            stop_loss,
            profit_target,
            "breakout entry signal"
        );

        let mut signal = TradeSignal {
            action: TradeAction::Buy,
            symbol: symbol.to_string(),
            quantity,
            price,
            stop_loss: Some(stop_loss),
            profit_target: Some(profit_target),
            confidence: ENTRY_CONFIDENCE,
            reason: format!(
                "breakout above {:.2} on {:.1}x volume",
                ctx.resistance,
                snapshot.current_volume / ctx.avg_volume.max(1e-9)
            ),
            indicators: Default::default(),
        };
        signal.indicators.insert("resistance".into(), ctx.resistance);
        signal.indicators.insert("avg_volume".into(), ctx.avg_volume);
        signal.indicators.insert("ma_fast".into(), ctx.ma_fast);
        signal.indicators.insert("ma_slow".into(), ctx.ma_slow);
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

        // Ratchet first so the effective stop reflects this tick's high.
        let trail_candidate = price * (1.0 - self.config.trailing_stop);
        let effective_stop = position.stop_loss.max(trail_candidate);

        if price <= effective_stop {
            return TradeSignal::sell(symbol, price, "trailing stop");
        }
        if price >= position.profit_target {
            return TradeSignal::sell(symbol, price, "profit target");
        }

        let ma_fast = sma(&snapshot.closes, self.config.fast_period);
        let ma_slow = sma(&snapshot.closes, self.config.slow_period);
        if let (Some(fast), Some(slow)) = (ma_fast, ma_slow) {
            if fast < slow {
                return TradeSignal::sell(symbol, price, "momentum lost");
            }
        }

        let held = hold_days(position, as_of);
        if held >= self.config.max_hold_days as f64 {
            return TradeSignal::sell(
                symbol,
                price,
                format!("max hold period ({:.0} days)", held),
            );
        }

        // HOLD — surface the ratcheted stop so the executor persists it.
        let mut signal = TradeSignal::hold(symbol, price, "holding");
        if effective_stop > position.stop_loss {
            signal.stop_loss = Some(effective_stop);
            signal.reason = format!("holding, stop raised to {effective_stop:.2}");
        }
        signal
    }
}
