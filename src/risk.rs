// =============================================================================
// Risk Governor — circuit breakers protecting the paper account
// =============================================================================
//
// Breakers evaluated before every buy and every monitor tick:
//   1. Daily Loss          — realized + unrealized loss for the day beyond a
//                            fraction of the day's starting equity disables
//                            buys until the next trading day.
//   2. Consecutive Losses  — N losing closed trades in a row pauses buys for
//                            a fixed window.
//   3. Strategy Disable    — a strategy whose recent win rate collapsed is
//                            refused; the performance tracker owns that
//                            check, the executor consults it alongside this.
//   4. Forced Exit         — any open position down more than the drawdown
//                            limit is sold on the next tick regardless of
//                            its engine's signal.
//
// Daily statistics reset automatically when the UTC date rolls over.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Snapshot of a single circuit breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerInfo {
    pub name: String,
    pub current: f64,
    pub limit: f64,
    pub tripped: bool,
}

/// Snapshot of the governor's state for logging and tests.
#[derive(Debug, Clone, Serialize)]
pub struct RiskState {
    pub daily_realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub day_start_equity: f64,
    pub consecutive_losses: u32,
    pub paused_until: Option<String>,
    pub circuit_breakers: Vec<CircuitBreakerInfo>,
    pub current_date: String,
}

// ---------------------------------------------------------------------------
// Internal mutable state
// ---------------------------------------------------------------------------

struct Inner {
    current_date: String,
    day_start_equity: f64,
    daily_realized_pnl: f64,
    unrealized_pnl: f64,
    consecutive_losses: u32,
    paused_until: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Risk Governor
// ---------------------------------------------------------------------------

pub struct RiskGovernor {
    state: RwLock<Inner>,
    /// Daily loss fraction of starting equity that halts buys.
    daily_loss_limit: f64,
    /// Consecutive losing trades that trigger the pause.
    consecutive_loss_limit: u32,
    /// Length of the consecutive-loss pause.
    pause_window: Duration,
    /// Open-position drawdown fraction that forces an exit.
    forced_exit_drawdown: f64,
}

impl RiskGovernor {
    pub fn new(
        starting_equity: f64,
        daily_loss_limit: f64,
        consecutive_loss_limit: u32,
        pause_minutes: i64,
        forced_exit_drawdown: f64,
    ) -> Self {
        info!(
            starting_equity,
            daily_loss_limit,
            consecutive_loss_limit,
            pause_minutes,
            forced_exit_drawdown,
            "risk governor initialised"
        );
        Self {
            state: RwLock::new(Inner {
                current_date: Utc::now().format("%Y-%m-%d").to_string(),
                day_start_equity: starting_equity,
                daily_realized_pnl: 0.0,
                unrealized_pnl: 0.0,
                consecutive_losses: 0,
                paused_until: None,
            }),
            daily_loss_limit,
            consecutive_loss_limit,
            pause_window: Duration::minutes(pause_minutes),
            forced_exit_drawdown,
        }
    }

    // -------------------------------------------------------------------------
    // Observations
    // -------------------------------------------------------------------------

    /// Record a closed trade's PnL. A loss extends the consecutive-loss run
    /// and may start the pause window; a win clears it.
    pub fn record_trade_result(&self, pnl: f64, now: DateTime<Utc>) {
        self.maybe_reset_daily(now);
        let mut s = self.state.write();

        s.daily_realized_pnl += pnl;
        if pnl < 0.0 {
            s.consecutive_losses += 1;
            if s.consecutive_losses >= self.consecutive_loss_limit {
                let until = now + self.pause_window;
                s.paused_until = Some(until);
                warn!(
                    consecutive_losses = s.consecutive_losses,
                    paused_until = %until.to_rfc3339(),
                    "consecutive-loss breaker tripped, buys paused"
                );
            }
        } else {
            s.consecutive_losses = 0;
        }

        debug!(
            pnl,
            daily_realized = s.daily_realized_pnl,
            consecutive_losses = s.consecutive_losses,
            "trade result recorded"
        );
    }

    /// Refresh the unrealized PnL across open positions (monitor tick).
    pub fn update_unrealized(&self, unrealized: f64, now: DateTime<Utc>) {
        self.maybe_reset_daily(now);
        self.state.write().unrealized_pnl = unrealized;
    }

    // -------------------------------------------------------------------------
    // Gates
    // -------------------------------------------------------------------------

    /// Whether a new BUY is currently allowed.
    pub fn can_buy(&self, now: DateTime<Utc>) -> (bool, Option<String>) {
        self.maybe_reset_daily(now);
        let s = self.state.read();

        // 1. Daily loss (realized + unrealized).
        let daily_loss = -(s.daily_realized_pnl + s.unrealized_pnl);
        let loss_fraction = if s.day_start_equity > 0.0 {
            daily_loss / s.day_start_equity
        } else {
            0.0
        };
        if loss_fraction >= self.daily_loss_limit {
            let msg = format!(
                "daily loss {:.2}% at or beyond limit {:.2}%",
                loss_fraction * 100.0,
                self.daily_loss_limit * 100.0
            );
            return (false, Some(msg));
        }

        // 2. Consecutive-loss pause.
        if let Some(until) = s.paused_until {
            if now < until {
                let msg = format!(
                    "consecutive_losses: buys paused until {}",
                    until.to_rfc3339()
                );
                return (false, Some(msg));
            }
        }

        (true, None)
    }

    /// Whether an open position's drawdown forces an exit on this tick.
    pub fn forced_exit(&self, entry_price: f64, current_price: f64) -> bool {
        if entry_price <= 0.0 {
            return false;
        }
        (entry_price - current_price) / entry_price > self.forced_exit_drawdown
    }

    // -------------------------------------------------------------------------
    // Snapshot
    // -------------------------------------------------------------------------

    pub fn state(&self, now: DateTime<Utc>) -> RiskState {
        self.maybe_reset_daily(now);
        let s = self.state.read();

        let daily_loss = -(s.daily_realized_pnl + s.unrealized_pnl);
        let loss_fraction = if s.day_start_equity > 0.0 {
            (daily_loss / s.day_start_equity).max(0.0)
        } else {
            0.0
        };
        let paused = s.paused_until.map(|t| now < t).unwrap_or(false);

        RiskState {
            daily_realized_pnl: s.daily_realized_pnl,
            unrealized_pnl: s.unrealized_pnl,
            day_start_equity: s.day_start_equity,
            consecutive_losses: s.consecutive_losses,
            paused_until: s.paused_until.map(|t| t.to_rfc3339()),
            circuit_breakers: vec![
                CircuitBreakerInfo {
                    name: "Daily Loss".into(),
                    current: loss_fraction * 100.0,
                    limit: self.daily_loss_limit * 100.0,
                    tripped: loss_fraction >= self.daily_loss_limit,
                },
                CircuitBreakerInfo {
                    name: "Consecutive Losses".into(),
                    current: s.consecutive_losses as f64,
                    limit: self.consecutive_loss_limit as f64,
                    tripped: paused,
                },
            ],
            current_date: s.current_date.clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Reset daily counters when the UTC date rolls over. The day's starting
    /// equity becomes the previous day's closing equity.
    fn maybe_reset_daily(&self, now: DateTime<Utc>) {
        let today = now.format("%Y-%m-%d").to_string();
        {
            let s = self.state.read();
            if s.current_date == today {
                return;
            }
        }
        let mut s = self.state.write();
        // Re-check under the write lock; another caller may have reset.
        if s.current_date != today {
            let closing_equity =
                s.day_start_equity + s.daily_realized_pnl + s.unrealized_pnl;
            info!(
                old_date = %s.current_date,
                new_date = %today,
                closing_equity,
                "date rolled, resetting daily risk counters"
            );
            s.current_date = today;
            s.day_start_equity = closing_equity;
            s.daily_realized_pnl = 0.0;
            s.unrealized_pnl = 0.0;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> RiskGovernor {
        RiskGovernor::new(100_000.0, 0.05, 5, 30, 0.20)
    }

    #[test]
    fn fresh_governor_allows_buys() {
        let g = governor();
        let (allowed, reason) = g.can_buy(Utc::now());
        assert!(allowed);
        assert!(reason.is_none());
    }

    #[test]
    fn daily_loss_breaker_trips_on_combined_loss() {
        let g = governor();
        let now = Utc::now();

        // Realized -3%, unrealized -2.5%: combined 5.5% > 5%.
        g.record_trade_result(-3_000.0, now);
        g.update_unrealized(-2_500.0, now);

        let (allowed, reason) = g.can_buy(now);
        assert!(!allowed);
        assert!(reason.unwrap().contains("daily loss"));
    }

    #[test]
    fn unrealized_recovery_clears_daily_loss() {
        let g = governor();
        let now = Utc::now();
        g.record_trade_result(-3_000.0, now);
        g.update_unrealized(-2_500.0, now);
        assert!(!g.can_buy(now).0);

        g.update_unrealized(0.0, now);
        assert!(g.can_buy(now).0);
    }

    #[test]
    fn five_consecutive_losses_pause_buys() {
        let g = governor();
        let now = Utc::now();

        for _ in 0..4 {
            g.record_trade_result(-10.0, now);
        }
        assert!(g.can_buy(now).0, "four losses are not enough");

        g.record_trade_result(-10.0, now);
        let (allowed, reason) = g.can_buy(now);
        assert!(!allowed);
        assert!(reason.unwrap().contains("consecutive_losses"));

        // The pause expires after the window.
        let later = now + Duration::minutes(31);
        assert!(g.can_buy(later).0);
    }

    #[test]
    fn win_resets_consecutive_losses() {
        let g = governor();
        let now = Utc::now();
        for _ in 0..4 {
            g.record_trade_result(-10.0, now);
        }
        g.record_trade_result(5.0, now);
        g.record_trade_result(-10.0, now);
        assert!(g.can_buy(now).0);
        assert_eq!(g.state(now).consecutive_losses, 1);
    }

    #[test]
    fn forced_exit_on_deep_drawdown() {
        let g = governor();
        assert!(!g.forced_exit(100.0, 81.0)); // -19%
        assert!(g.forced_exit(100.0, 79.0)); // -21%
        assert!(!g.forced_exit(0.0, 79.0)); // degenerate entry
    }

    #[test]
    fn breaker_snapshot_reflects_state() {
        let g = governor();
        let now = Utc::now();
        g.record_trade_result(-2_000.0, now);

        let state = g.state(now);
        assert_eq!(state.circuit_breakers.len(), 2);
        let daily = &state.circuit_breakers[0];
        assert_eq!(daily.name, "Daily Loss");
        assert!((daily.current - 2.0).abs() < 1e-9);
        assert!(!daily.tripped);
    }
}
