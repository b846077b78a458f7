// =============================================================================
// Performance Tracker — the feedback loop between outcomes and routing
// =============================================================================
//
// Records every routing decision and every trade from entry through exit,
// maintains rolling per-(strategy, stock class) aggregates, and answers the
// router's confidence queries. All writes are idempotent: decisions key on
// `decision_id`, trades on `trade_id`, and aggregates are recomputed from
// scratch on every refresh so repeated calls cannot double-count.
//
// The tracker owns the `routing_decisions`, `trade_tracking`, and
// `strategy_metrics` tables; the account/positions/orders tables belong to
// the ledger writer.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ledger::Ledger;
use crate::types::{Classification, RoutingDecision, StrategyKind};

/// Aggregate window used for feedback and metric refreshes, in days.
const METRIC_WINDOW_DAYS: i64 = 30;
/// Minimum closed trades before feedback moves off neutral.
const MIN_FEEDBACK_TRADES: usize = 3;
/// Confidence threshold treated as a high-conviction decision.
const HIGH_CONFIDENCE: f64 = 0.80;
/// Confidence threshold treated as a low-conviction decision.
const LOW_CONFIDENCE: f64 = 0.50;
/// Feedback multiplier clamp.
const MULTIPLIER_FLOOR: f64 = 0.5;
const MULTIPLIER_CEIL: f64 = 1.15;

/// A closed trade as read back for aggregation.
#[derive(Debug, Clone)]
struct ClosedTrade {
    pnl_pct: f64,
    hold_days: f64,
    routing_confidence: f64,
    was_profitable: bool,
}

/// One aggregate row for a (strategy, stock class) pair.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyMetrics {
    pub strategy: String,
    pub stock_type: String,
    pub period_start: String,
    pub period_end: String,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub avg_profit_pct: f64,
    pub avg_winner_pct: f64,
    pub avg_loser_pct: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub avg_hold_days: f64,
    pub sharpe: f64,
    pub confidence_accuracy: f64,
    pub updated_at: String,
}

/// Records decisions and trades, and feeds confidence back to the router.
pub struct PerformanceTracker {
    ledger: Ledger,
    /// Win rate below this over the disable window turns a strategy off.
    disable_floor: f64,
    /// Number of recent trades the disable check looks at.
    disable_window: u32,
}

impl PerformanceTracker {
    pub fn new(ledger: Ledger, disable_floor: f64, disable_window: u32) -> Self {
        Self {
            ledger,
            disable_floor,
            disable_window,
        }
    }

    // -------------------------------------------------------------------------
    // Logging
    // -------------------------------------------------------------------------

    /// Persist a routing decision. Repeats with the same `decision_id` are
    /// no-ops.
    pub fn log_routing(&self, decision: &RoutingDecision) -> Result<()> {
        let conn = self.ledger.lock();
        conn.execute(
            "INSERT OR IGNORE INTO routing_decisions
                 (decision_id, symbol, selected_strategy, classification,
                  confidence, reason, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                decision.decision_id,
                decision.symbol,
                decision.strategy.key(),
                decision.classification.as_str(),
                decision.confidence,
                decision.reason,
                decision.issued_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Open a trade record at entry. Repeats with the same `trade_id` are
    /// no-ops.
    #[allow(clippy::too_many_arguments)]
    pub fn log_trade_entry(
        &self,
        trade_id: &str,
        symbol: &str,
        strategy: StrategyKind,
        classification: Classification,
        entry_price: f64,
        quantity: i64,
        routing_confidence: f64,
    ) -> Result<()> {
        let conn = self.ledger.lock();
        conn.execute(
            "INSERT OR IGNORE INTO trade_tracking
                 (trade_id, symbol, strategy, classification, entry_time,
                  entry_price, quantity, routing_confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                trade_id,
                symbol,
                strategy.key(),
                classification.as_str(),
                Utc::now().to_rfc3339(),
                entry_price,
                quantity,
                routing_confidence,
            ],
        )?;
        debug!(trade_id, symbol, strategy = strategy.key(), "trade entry logged");
        Ok(())
    }

    /// Close a trade record and refresh the affected aggregate. Idempotent:
    /// a second call for an already-closed `trade_id` changes nothing.
    pub fn log_trade_exit(&self, trade_id: &str, exit_price: f64, exit_reason: &str) -> Result<()> {
        let row = {
            let conn = self.ledger.lock();
            conn.query_row(
                "SELECT strategy, classification, entry_time, entry_price, quantity, exit_time
                 FROM trade_tracking WHERE trade_id = ?1",
                params![trade_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, f64>(3)?,
                        r.get::<_, i64>(4)?,
                        r.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?
        };

        let Some((strategy, classification, entry_time, entry_price, quantity, exit_time)) = row
        else {
            warn!(trade_id, "exit logged for unknown trade");
            return Ok(());
        };

        if exit_time.is_some() {
            debug!(trade_id, "trade already closed, exit ignored");
            return Ok(());
        }

        let now = Utc::now();
        let pnl = (exit_price - entry_price) * quantity as f64;
        let pnl_pct = if entry_price > 0.0 {
            (exit_price - entry_price) / entry_price
        } else {
            0.0
        };
        let hold_days = DateTime::parse_from_rfc3339(&entry_time)
            .map(|t| ((now - t.with_timezone(&Utc)).num_seconds().max(0) as f64) / 86_400.0)
            .unwrap_or(0.0);
        let was_profitable = pnl > 0.0;

        {
            let conn = self.ledger.lock();
            conn.execute(
                "UPDATE trade_tracking
                 SET exit_time = ?1, exit_price = ?2, exit_reason = ?3,
                     pnl = ?4, pnl_pct = ?5, hold_days = ?6, was_profitable = ?7
                 WHERE trade_id = ?8 AND exit_time IS NULL",
                params![
                    now.to_rfc3339(),
                    exit_price,
                    exit_reason,
                    pnl,
                    pnl_pct,
                    hold_days,
                    was_profitable,
                    trade_id,
                ],
            )?;
        }

        info!(
            trade_id,
            strategy = %strategy,
            pnl,
            pnl_pct = format!("{:.2}%", pnl_pct * 100.0),
            exit_reason,
            "trade closed"
        );

        if let Some(kind) = StrategyKind::from_key(&strategy) {
            self.refresh_metrics(kind, Classification::from_str_loose(&classification))?;
        }
        Ok(())
    }

    /// The open trade record for `(symbol, strategy)`, if one exists.
    pub fn open_trade_id(&self, symbol: &str, strategy: StrategyKind) -> Result<Option<String>> {
        let conn = self.ledger.lock();
        let id = conn
            .query_row(
                "SELECT trade_id FROM trade_tracking
                 WHERE symbol = ?1 AND strategy = ?2 AND exit_time IS NULL
                 ORDER BY entry_time DESC LIMIT 1",
                params![symbol, strategy.key()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    // -------------------------------------------------------------------------
    // Feedback
    // -------------------------------------------------------------------------

    /// Confidence multiplier for the router, clamped to [0.5, 1.15].
    ///
    /// Returns the disable sentinel `0.0` — below the router's drop
    /// threshold — when the strategy's win rate over the last
    /// `disable_window` trades for this classification is under the floor.
    /// With fewer than three closed trades in the last 30 days the
    /// multiplier is neutral.
    pub fn adjusted_confidence(
        &self,
        strategy: StrategyKind,
        classification: Classification,
    ) -> Result<f64> {
        if self.recent_win_rate_below_floor(strategy, Some(classification))? {
            return Ok(0.0);
        }

        let trades = self.closed_trades(
            Some(strategy),
            Some(classification),
            Utc::now() - Duration::days(METRIC_WINDOW_DAYS),
        )?;

        if trades.len() < MIN_FEEDBACK_TRADES {
            return Ok(1.0);
        }

        let winners = trades.iter().filter(|t| t.was_profitable).count();
        let win_rate = winners as f64 / trades.len() as f64;
        let avg_profit_pct =
            trades.iter().map(|t| t.pnl_pct).sum::<f64>() / trades.len() as f64;

        let mut multiplier: f64 = if win_rate > 0.80 {
            1.10
        } else if win_rate > 0.70 {
            1.05
        } else if win_rate < 0.40 {
            0.70
        } else if win_rate < 0.50 {
            0.85
        } else {
            1.00
        };

        if avg_profit_pct > 0.05 {
            multiplier *= 1.05;
        } else if avg_profit_pct < 0.0 {
            multiplier *= 0.90;
        }

        Ok(multiplier.clamp(MULTIPLIER_FLOOR, MULTIPLIER_CEIL))
    }

    /// Executor-level breaker: is the strategy disabled across all
    /// classifications?
    pub fn strategy_disabled(&self, strategy: StrategyKind) -> Result<bool> {
        self.recent_win_rate_below_floor(strategy, None)
    }

    fn recent_win_rate_below_floor(
        &self,
        strategy: StrategyKind,
        classification: Option<Classification>,
    ) -> Result<bool> {
        let conn = self.ledger.lock();
        let rows: Vec<bool> = if let Some(class) = classification {
            let mut stmt = conn.prepare(
                "SELECT was_profitable FROM trade_tracking
                 WHERE strategy = ?1 AND classification = ?2 AND exit_time IS NOT NULL
                 ORDER BY exit_time DESC LIMIT ?3",
            )?;
            let result = stmt
                .query_map(
                    params![strategy.key(), class.as_str(), self.disable_window],
                    |r| r.get(0),
                )?
                .collect::<rusqlite::Result<_>>()?;
            result
        } else {
            let mut stmt = conn.prepare(
                "SELECT was_profitable FROM trade_tracking
                 WHERE strategy = ?1 AND exit_time IS NOT NULL
                 ORDER BY exit_time DESC LIMIT ?2",
            )?;
            let result = stmt
                .query_map(params![strategy.key(), self.disable_window], |r| r.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            result
        };

        if rows.len() < self.disable_window as usize {
            return Ok(false);
        }
        let winners = rows.iter().filter(|w| **w).count();
        Ok((winners as f64 / rows.len() as f64) < self.disable_floor)
    }

    // -------------------------------------------------------------------------
    // Aggregates
    // -------------------------------------------------------------------------

    /// Recompute and upsert the 30-day aggregate for one (strategy, class).
    pub fn refresh_metrics(
        &self,
        strategy: StrategyKind,
        classification: Classification,
    ) -> Result<()> {
        let now = Utc::now();
        let window_start = now - Duration::days(METRIC_WINDOW_DAYS);
        let trades = self.closed_trades(Some(strategy), Some(classification), window_start)?;

        let metrics = compute_metrics(
            strategy.key(),
            classification.as_str(),
            &window_start.format("%Y-%m-%d").to_string(),
            &now.format("%Y-%m-%d").to_string(),
            &trades,
        );

        let conn = self.ledger.lock();
        conn.execute(
            "INSERT INTO strategy_metrics
                 (strategy, stock_type, period_start, period_end, total_trades,
                  winning_trades, losing_trades, win_rate, avg_profit_pct,
                  avg_winner_pct, avg_loser_pct, total_return_pct,
                  max_drawdown_pct, avg_hold_days, sharpe, confidence_accuracy,
                  updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT (strategy, stock_type, period_start, period_end)
             DO UPDATE SET
                 total_trades = excluded.total_trades,
                 winning_trades = excluded.winning_trades,
                 losing_trades = excluded.losing_trades,
                 win_rate = excluded.win_rate,
                 avg_profit_pct = excluded.avg_profit_pct,
                 avg_winner_pct = excluded.avg_winner_pct,
                 avg_loser_pct = excluded.avg_loser_pct,
                 total_return_pct = excluded.total_return_pct,
                 max_drawdown_pct = excluded.max_drawdown_pct,
                 avg_hold_days = excluded.avg_hold_days,
                 sharpe = excluded.sharpe,
                 confidence_accuracy = excluded.confidence_accuracy,
                 updated_at = excluded.updated_at",
            params![
                metrics.strategy,
                metrics.stock_type,
                metrics.period_start,
                metrics.period_end,
                metrics.total_trades,
                metrics.winning_trades,
                metrics.losing_trades,
                metrics.win_rate,
                metrics.avg_profit_pct,
                metrics.avg_winner_pct,
                metrics.avg_loser_pct,
                metrics.total_return_pct,
                metrics.max_drawdown_pct,
                metrics.avg_hold_days,
                metrics.sharpe,
                metrics.confidence_accuracy,
                metrics.updated_at,
            ],
        )?;

        debug!(
            strategy = strategy.key(),
            classification = classification.as_str(),
            trades = metrics.total_trades,
            win_rate = metrics.win_rate,
            "aggregate refreshed"
        );
        Ok(())
    }

    /// Fresh aggregates over the trailing `window_days`, one row per
    /// (strategy, classification) pair with closed trades.
    pub fn report(&self, window_days: i64) -> Result<Vec<StrategyMetrics>> {
        let now = Utc::now();
        let start = now - Duration::days(window_days);

        let pairs: Vec<(String, String)> = {
            let conn = self.ledger.lock();
            let mut stmt = conn.prepare(
                "SELECT DISTINCT strategy, classification FROM trade_tracking
                 WHERE exit_time IS NOT NULL AND exit_time >= ?1
                 ORDER BY strategy, classification",
            )?;
            let result = stmt
                .query_map(params![start.to_rfc3339()], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?;
            result
        };

        let mut rows = Vec::with_capacity(pairs.len());
        for (strategy, classification) in pairs {
            let kind = StrategyKind::from_key(&strategy);
            let class = Classification::from_str_loose(&classification);
            let trades = self.closed_trades(kind, Some(class), start)?;
            rows.push(compute_metrics(
                &strategy,
                &classification,
                &start.format("%Y-%m-%d").to_string(),
                &now.format("%Y-%m-%d").to_string(),
                &trades,
            ));
        }
        Ok(rows)
    }

    /// Top `k` aggregate rows by the named metric over the trailing window.
    /// Supported metrics: `win_rate`, `avg_profit_pct`, `total_return_pct`,
    /// `sharpe`.
    pub fn top_performers(
        &self,
        metric: &str,
        k: usize,
        window_days: i64,
    ) -> Result<Vec<StrategyMetrics>> {
        let mut rows = self.report(window_days)?;
        let key = |m: &StrategyMetrics| -> f64 {
            match metric {
                "win_rate" => m.win_rate,
                "total_return_pct" => m.total_return_pct,
                "sharpe" => m.sharpe,
                _ => m.avg_profit_pct,
            }
        };
        rows.sort_by(|a, b| key(b).partial_cmp(&key(a)).unwrap_or(std::cmp::Ordering::Equal));
        rows.truncate(k);
        Ok(rows)
    }

    /// Fraction of high-conviction entries that won plus low-conviction
    /// entries that lost, over their combined total, in the trailing window.
    pub fn routing_accuracy(&self, window_days: i64) -> Result<f64> {
        let start = Utc::now() - Duration::days(window_days);
        let trades = self.closed_trades(None, None, start)?;
        Ok(confidence_accuracy(&trades))
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn closed_trades(
        &self,
        strategy: Option<StrategyKind>,
        classification: Option<Classification>,
        since: DateTime<Utc>,
    ) -> Result<Vec<ClosedTrade>> {
        let conn = self.ledger.lock();

        let mut sql = String::from(
            "SELECT pnl_pct, hold_days, routing_confidence, was_profitable
             FROM trade_tracking
             WHERE exit_time IS NOT NULL AND exit_time >= ?1",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(since.to_rfc3339())];

        if let Some(kind) = strategy {
            sql.push_str(&format!(" AND strategy = ?{}", args.len() + 1));
            args.push(Box::new(kind.key().to_string()));
        }
        if let Some(class) = classification {
            sql.push_str(&format!(" AND classification = ?{}", args.len() + 1));
            args.push(Box::new(class.as_str().to_string()));
        }
        sql.push_str(" ORDER BY exit_time ASC");

        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::types::ToSql> =
            args.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(params.as_slice(), |r| {
                Ok(ClosedTrade {
                    pnl_pct: r.get(0)?,
                    hold_days: r.get(1)?,
                    routing_confidence: r.get(2)?,
                    was_profitable: r.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Pure metric math
// ---------------------------------------------------------------------------

fn compute_metrics(
    strategy: &str,
    stock_type: &str,
    period_start: &str,
    period_end: &str,
    trades: &[ClosedTrade],
) -> StrategyMetrics {
    let total = trades.len();
    let winners: Vec<&ClosedTrade> = trades.iter().filter(|t| t.was_profitable).collect();
    let losers: Vec<&ClosedTrade> = trades.iter().filter(|t| !t.was_profitable).collect();

    let mean = |xs: &[f64]| -> f64 {
        if xs.is_empty() {
            0.0
        } else {
            xs.iter().sum::<f64>() / xs.len() as f64
        }
    };

    let returns: Vec<f64> = trades.iter().map(|t| t.pnl_pct).collect();
    let avg_profit_pct = mean(&returns);
    let avg_winner_pct = mean(&winners.iter().map(|t| t.pnl_pct).collect::<Vec<_>>());
    let avg_loser_pct = mean(&losers.iter().map(|t| t.pnl_pct).collect::<Vec<_>>());
    let total_return_pct: f64 = returns.iter().sum();

    // Peak-to-trough decline of the running cumulative return.
    let mut cumulative = 0.0_f64;
    let mut peak = 0.0_f64;
    let mut max_drawdown = 0.0_f64;
    for r in &returns {
        cumulative += r;
        peak = peak.max(cumulative);
        max_drawdown = max_drawdown.max(peak - cumulative);
    }

    // Sample stdev (n - 1); degenerate cases yield a Sharpe of 0.
    let sharpe = if returns.len() >= 2 {
        let m = avg_profit_pct;
        let variance = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>()
            / (returns.len() - 1) as f64;
        let stdev = variance.sqrt();
        if stdev > 0.0 {
            m / stdev
        } else {
            0.0
        }
    } else {
        0.0
    };

    StrategyMetrics {
        strategy: strategy.to_string(),
        stock_type: stock_type.to_string(),
        period_start: period_start.to_string(),
        period_end: period_end.to_string(),
        total_trades: total as u32,
        winning_trades: winners.len() as u32,
        losing_trades: losers.len() as u32,
        win_rate: if total > 0 {
            winners.len() as f64 / total as f64
        } else {
            0.0
        },
        avg_profit_pct,
        avg_winner_pct,
        avg_loser_pct,
        total_return_pct,
        max_drawdown_pct: max_drawdown,
        avg_hold_days: mean(&trades.iter().map(|t| t.hold_days).collect::<Vec<_>>()),
        sharpe,
        confidence_accuracy: confidence_accuracy(trades),
        updated_at: Utc::now().to_rfc3339(),
    }
}

/// High-conviction entries should win, low-conviction entries should lose;
/// this is the fraction of decisions that behaved accordingly.
fn confidence_accuracy(trades: &[ClosedTrade]) -> f64 {
    let mut considered = 0usize;
    let mut correct = 0usize;
    for t in trades {
        if t.routing_confidence >= HIGH_CONFIDENCE {
            considered += 1;
            if t.was_profitable {
                correct += 1;
            }
        } else if t.routing_confidence < LOW_CONFIDENCE {
            considered += 1;
            if !t.was_profitable {
                correct += 1;
            }
        }
    }
    if considered == 0 {
        0.0
    } else {
        correct as f64 / considered as f64
    }
}

#[cfg(test)]
impl PerformanceTracker {
    /// Test hook: number of persisted routing decisions.
    pub(crate) fn decision_count(&self) -> u32 {
        self.ledger
            .lock()
            .query_row("SELECT COUNT(*) FROM routing_decisions", [], |r| r.get(0))
            .unwrap_or(0)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn tracker() -> PerformanceTracker {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.seed_account(100_000.0).unwrap();
        PerformanceTracker::new(ledger, 0.30, 20)
    }

    fn decision(symbol: &str) -> RoutingDecision {
        RoutingDecision {
            decision_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            strategy: StrategyKind::RsiMeanReversion,
            classification: Classification::Etf,
            confidence: 0.95,
            reason: "etf".into(),
            alternatives: vec![],
            issued_at: Utc::now(),
        }
    }

    /// Record one full trade and return its id.
    fn round_trip(t: &PerformanceTracker, symbol: &str, entry: f64, exit: f64, conf: f64) -> String {
        let trade_id = Uuid::new_v4().to_string();
        t.log_trade_entry(
            &trade_id,
            symbol,
            StrategyKind::RsiMeanReversion,
            Classification::Etf,
            entry,
            4,
            conf,
        )
        .unwrap();
        t.log_trade_exit(&trade_id, exit, "test exit").unwrap();
        trade_id
    }

    #[test]
    fn routing_log_is_idempotent() {
        let t = tracker();
        let d = decision("SPY");
        t.log_routing(&d).unwrap();
        t.log_routing(&d).unwrap();

        let count: u32 = t
            .ledger
            .lock()
            .query_row("SELECT COUNT(*) FROM routing_decisions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn trade_exit_is_idempotent() {
        let t = tracker();
        let trade_id = round_trip(&t, "SPY", 545.0, 558.9, 0.95);

        // A second exit at a different price must not change the record.
        t.log_trade_exit(&trade_id, 400.0, "bogus").unwrap();

        let (exit_price, pnl_pct): (f64, f64) = t
            .ledger
            .lock()
            .query_row(
                "SELECT exit_price, pnl_pct FROM trade_tracking WHERE trade_id = ?1",
                params![trade_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert!((exit_price - 558.9).abs() < 1e-9);
        assert!((pnl_pct - (558.9 - 545.0) / 545.0).abs() < 1e-9);
    }

    #[test]
    fn exit_computes_pnl_fields() {
        let t = tracker();
        let trade_id = round_trip(&t, "SPY", 545.0, 558.9, 0.95);

        let (pnl, was_profitable): (f64, bool) = t
            .ledger
            .lock()
            .query_row(
                "SELECT pnl, was_profitable FROM trade_tracking WHERE trade_id = ?1",
                params![trade_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert!((pnl - 4.0 * (558.9 - 545.0)).abs() < 1e-9);
        assert!(was_profitable);
    }

    #[test]
    fn open_trade_id_tracks_lifecycle() {
        let t = tracker();
        let trade_id = Uuid::new_v4().to_string();
        t.log_trade_entry(
            &trade_id,
            "SPY",
            StrategyKind::RsiMeanReversion,
            Classification::Etf,
            545.0,
            4,
            0.95,
        )
        .unwrap();

        assert_eq!(
            t.open_trade_id("SPY", StrategyKind::RsiMeanReversion)
                .unwrap()
                .as_deref(),
            Some(trade_id.as_str())
        );

        t.log_trade_exit(&trade_id, 558.9, "target").unwrap();
        assert!(t
            .open_trade_id("SPY", StrategyKind::RsiMeanReversion)
            .unwrap()
            .is_none());
    }

    #[test]
    fn neutral_feedback_under_three_trades() {
        let t = tracker();
        round_trip(&t, "SPY", 100.0, 104.0, 0.9);
        round_trip(&t, "QQQ", 100.0, 104.0, 0.9);

        let mult = t
            .adjusted_confidence(StrategyKind::RsiMeanReversion, Classification::Etf)
            .unwrap();
        assert!((mult - 1.0).abs() < 1e-12);
    }

    #[test]
    fn winning_streak_boosts_confidence() {
        let t = tracker();
        // Five winners at +6% average: win_rate 1.0 (>0.8 -> 1.10) and
        // avg_profit > 5% (-> x1.05), clamped under 1.15.
        for i in 0..5 {
            round_trip(&t, &format!("W{i}"), 100.0, 106.0, 0.9);
        }
        let mult = t
            .adjusted_confidence(StrategyKind::RsiMeanReversion, Classification::Etf)
            .unwrap();
        assert!((mult - 1.15).abs() < 1e-9, "got {mult}");
    }

    #[test]
    fn losing_streak_cuts_confidence() {
        let t = tracker();
        // Five losers: win_rate 0 (<0.4 -> 0.70) and negative average
        // (-> x0.90) gives 0.63, which sits above the 0.5 clamp floor.
        for i in 0..5 {
            round_trip(&t, &format!("L{i}"), 100.0, 97.0, 0.9);
        }
        let mult = t
            .adjusted_confidence(StrategyKind::RsiMeanReversion, Classification::Etf)
            .unwrap();
        assert!((mult - 0.63).abs() < 1e-9, "got {mult}");
    }

    #[test]
    fn disable_sentinel_after_bad_window() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.seed_account(100_000.0).unwrap();
        // Small window so the test stays readable: 5 trades, floor 30%.
        let t = PerformanceTracker::new(ledger, 0.30, 5);

        for i in 0..5 {
            round_trip(&t, &format!("L{i}"), 100.0, 97.0, 0.9);
        }

        let mult = t
            .adjusted_confidence(StrategyKind::RsiMeanReversion, Classification::Etf)
            .unwrap();
        assert_eq!(mult, 0.0);
        assert!(t.strategy_disabled(StrategyKind::RsiMeanReversion).unwrap());
        // Other strategies remain untouched.
        assert!(!t.strategy_disabled(StrategyKind::MomentumBreakout).unwrap());
    }

    #[test]
    fn metrics_invariants() {
        let t = tracker();
        round_trip(&t, "A", 100.0, 106.0, 0.9); // +6%
        round_trip(&t, "B", 100.0, 97.0, 0.9); // -3%
        round_trip(&t, "C", 100.0, 100.0, 0.3); // break-even counts as loss

        let rows = t.report(30).unwrap();
        assert_eq!(rows.len(), 1);
        let m = &rows[0];
        assert_eq!(m.total_trades, 3);
        assert_eq!(m.winning_trades + m.losing_trades, m.total_trades);
        assert_eq!(m.winning_trades, 1);
        assert!((m.win_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((m.total_return_pct - 0.03).abs() < 1e-9);
        assert!((m.avg_profit_pct - 0.01).abs() < 1e-9);
    }

    #[test]
    fn drawdown_tracks_peak_to_trough() {
        let trades: Vec<ClosedTrade> = [0.05, -0.02, -0.03, 0.04]
            .iter()
            .map(|&pnl_pct| ClosedTrade {
                pnl_pct,
                hold_days: 1.0,
                routing_confidence: 0.9,
                was_profitable: pnl_pct > 0.0,
            })
            .collect();
        let m = compute_metrics("s", "c", "2026-01-01", "2026-01-31", &trades);
        // Peak 0.05, trough 0.00 -> drawdown 0.05.
        assert!((m.max_drawdown_pct - 0.05).abs() < 1e-9);
    }

    #[test]
    fn sharpe_degenerate_cases() {
        let one = vec![ClosedTrade {
            pnl_pct: 0.05,
            hold_days: 1.0,
            routing_confidence: 0.9,
            was_profitable: true,
        }];
        assert_eq!(
            compute_metrics("s", "c", "a", "b", &one).sharpe,
            0.0,
            "single trade has no dispersion"
        );

        let flat: Vec<ClosedTrade> = (0..3)
            .map(|_| ClosedTrade {
                pnl_pct: 0.02,
                hold_days: 1.0,
                routing_confidence: 0.9,
                was_profitable: true,
            })
            .collect();
        assert_eq!(compute_metrics("s", "c", "a", "b", &flat).sharpe, 0.0);
    }

    #[test]
    fn confidence_accuracy_counts_both_tails() {
        let trades = vec![
            // High confidence, won: correct.
            ClosedTrade { pnl_pct: 0.04, hold_days: 1.0, routing_confidence: 0.9, was_profitable: true },
            // High confidence, lost: wrong.
            ClosedTrade { pnl_pct: -0.04, hold_days: 1.0, routing_confidence: 0.85, was_profitable: false },
            // Low confidence, lost: correct.
            ClosedTrade { pnl_pct: -0.02, hold_days: 1.0, routing_confidence: 0.3, was_profitable: false },
            // Mid confidence: not considered.
            ClosedTrade { pnl_pct: 0.02, hold_days: 1.0, routing_confidence: 0.6, was_profitable: true },
        ];
        assert!((confidence_accuracy(&trades) - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn refresh_is_stable_across_repeats() {
        let t = tracker();
        round_trip(&t, "A", 100.0, 106.0, 0.9);
        t.refresh_metrics(StrategyKind::RsiMeanReversion, Classification::Etf)
            .unwrap();
        t.refresh_metrics(StrategyKind::RsiMeanReversion, Classification::Etf)
            .unwrap();

        let count: u32 = t
            .ledger
            .lock()
            .query_row("SELECT COUNT(*) FROM strategy_metrics", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1, "upsert must not duplicate aggregate rows");
    }
}
