// =============================================================================
// Trade Executor — per-candidate flow and the position monitor loop
// =============================================================================
//
// The executor sequences router -> validator -> engine -> ledger for every
// candidate, applies the risk gates and circuit breakers before any commit,
// and runs the periodic monitor over open positions. It is the only
// component that submits ledger mutations (through the single writer), and
// it reports every candidate as a structured outcome rather than throwing.
//
// Per-candidate flow:
//   1. Fetch market data and derive the stock profile.
//   2. Route to a strategy (decision persisted by the router).
//   3. Reject thin history or a dead quote.
//   4. Look up the screener recommendation; no recommendation, no entry.
//   5. Validate the entry (band, stop buffer, confidence, freshness).
//   6. Generate the engine signal.
//   7. On BUY: risk gates, then one atomic commit, then trade-entry logging.
//
// Monitor flow, per open position: fetch quote -> forced-exit breaker ->
// engine exit signal -> atomic sell commit (retried once) -> trade-exit
// logging and aggregate refresh. Trailing-stop ratchets surfaced by engines
// on HOLD are persisted here.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::config::Config;
use crate::engines::{StrategyEngine, TradeSignal};
use crate::error::Error;
use crate::ledger::writer::LedgerHandle;
use crate::ledger::{Ledger, Position};
use crate::market_data::MarketDataSource;
use crate::risk::RiskGovernor;
use crate::router::StrategyRouter;
use crate::screener::RecommendationStore;
use crate::tracker::PerformanceTracker;
use crate::types::{StrategyKind, TradeAction};
use crate::validator::EntryValidator;

/// Outcomes retained in the in-memory audit ring.
const MAX_RECENT_OUTCOMES: usize = 100;

/// Pipeline step at which a candidate stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    MarketData,
    Routing,
    Recommendation,
    Validation,
    Signal,
    RiskGate,
    Commit,
    Monitor,
}

/// Structured result of processing one candidate or one monitored position.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// A BUY was committed and the trade record opened.
    Entered {
        symbol: String,
        strategy: StrategyKind,
        quantity: i64,
        price: f64,
    },
    /// A SELL was committed and the trade record closed.
    Exited {
        symbol: String,
        strategy: StrategyKind,
        quantity: i64,
        price: f64,
        reason: String,
    },
    /// No action was warranted.
    Held { symbol: String, reason: String },
    /// The candidate was skipped at `step`; no ledger change.
    Skipped {
        symbol: String,
        step: Step,
        reason: String,
    },
    /// Something went wrong at `step`; no ledger change beyond a rollback.
    Failed {
        symbol: String,
        step: Step,
        reason: String,
    },
}

impl Outcome {
    fn skipped(symbol: &str, step: Step, reason: impl Into<String>) -> Self {
        Self::Skipped {
            symbol: symbol.to_string(),
            step,
            reason: reason.into(),
        }
    }

    fn failed(symbol: &str, step: Step, reason: impl Into<String>) -> Self {
        Self::Failed {
            symbol: symbol.to_string(),
            step,
            reason: reason.into(),
        }
    }
}

/// Orchestrates candidates and the monitor loop; single owner of the
/// decision pipeline.
pub struct TradeExecutor {
    config: Config,
    source: Arc<dyn MarketDataSource>,
    classifier: Classifier,
    router: StrategyRouter,
    validator: EntryValidator,
    engines: HashMap<StrategyKind, Arc<dyn StrategyEngine>>,
    recommendations: Arc<RecommendationStore>,
    ledger: Ledger,
    writer: LedgerHandle,
    tracker: Arc<PerformanceTracker>,
    risk: RiskGovernor,
    recent_outcomes: RwLock<Vec<Outcome>>,
}

impl TradeExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        source: Arc<dyn MarketDataSource>,
        classifier: Classifier,
        router: StrategyRouter,
        validator: EntryValidator,
        engines: HashMap<StrategyKind, Arc<dyn StrategyEngine>>,
        recommendations: Arc<RecommendationStore>,
        ledger: Ledger,
        writer: LedgerHandle,
        tracker: Arc<PerformanceTracker>,
        risk: RiskGovernor,
    ) -> Self {
        Self {
            config,
            source,
            classifier,
            router,
            validator,
            engines,
            recommendations,
            ledger,
            writer,
            tracker,
            risk,
            recent_outcomes: RwLock::new(Vec::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Candidate processing
    // -------------------------------------------------------------------------

    /// Run one candidate through the full pipeline. Never panics and never
    /// touches the ledger on a skip.
    pub async fn process_candidate(&self, symbol: &str) -> Outcome {
        let outcome = self.process_candidate_inner(symbol).await;

        match &outcome {
            Outcome::Entered { symbol, strategy, quantity, price } => {
                info!(symbol = %symbol, strategy = strategy.key(), quantity, price, "candidate entered");
            }
            Outcome::Held { symbol, reason } => {
                debug!(symbol = %symbol, reason = %reason, "candidate held");
            }
            Outcome::Skipped { symbol, step, reason } => {
                info!(symbol = %symbol, step = ?step, reason = %reason, "candidate skipped");
            }
            Outcome::Failed { symbol, step, reason } => {
                error!(symbol = %symbol, step = ?step, reason = %reason, "candidate failed");
            }
            Outcome::Exited { .. } => {}
        }

        self.remember(outcome.clone());
        outcome
    }

    async fn process_candidate_inner(&self, symbol: &str) -> Outcome {
        let now = Utc::now();

        // ── 1. Market data + profile ─────────────────────────────────────
        let snapshot = match self.source.fetch(symbol).await {
            Ok(snapshot) => snapshot,
            Err(e) => return Outcome::skipped(symbol, Step::MarketData, e.to_string()),
        };
        let profile = self.classifier.classify_snapshot(symbol, &snapshot);

        // ── 2. Route (decision is persisted by the router) ───────────────
        let decision = match self.router.route(&profile) {
            Ok(decision) => decision,
            Err(e) => return Outcome::failed(symbol, Step::Routing, e.to_string()),
        };

        // ── 3. Data-quality floor ────────────────────────────────────────
        if snapshot.closes.len() < 20 {
            return Outcome::skipped(
                symbol,
                Step::MarketData,
                format!("only {} closes, need 20", snapshot.closes.len()),
            );
        }
        if snapshot.current_price <= 0.0 {
            return Outcome::skipped(symbol, Step::MarketData, "no usable quote");
        }

        // ── 4. Recommendation lookup ─────────────────────────────────────
        let Some(rec) = self.recommendations.latest(&profile.symbol) else {
            return Outcome::skipped(symbol, Step::Recommendation, "no recommendation on file");
        };

        // ── 5. Entry validation ──────────────────────────────────────────
        let report = self.validator.validate(
            &profile.symbol,
            snapshot.current_price,
            rec.stop,
            &rec,
            now,
        );
        if !report.valid {
            // Below-band prices near the band are a defer, not a reject.
            if let Some(hint) =
                self.validator
                    .wait_for_better_entry(&profile.symbol, snapshot.current_price, &rec)
            {
                return Outcome::skipped(
                    symbol,
                    Step::Validation,
                    format!(
                        "wait for better entry: {} (target {:.2}-{:.2})",
                        hint.reason, hint.target_range.0, hint.target_range.1
                    ),
                );
            }
            // A stop that only fails the buffer check gets the shifted
            // alternative surfaced alongside the rejection.
            let mut reason = report.reason.clone();
            if report
                .checks
                .iter()
                .any(|c| c.name == "stop_buffer" && !c.passed)
            {
                let shifted = self
                    .validator
                    .recommended_stop(snapshot.current_price, &rec);
                reason = format!("{reason}; buffered stop would be {shifted:.2}");
            }
            return Outcome::skipped(symbol, Step::Validation, reason);
        }

        // ── 6. Engine signal ─────────────────────────────────────────────
        let Some(engine) = self.engines.get(&decision.strategy) else {
            return Outcome::failed(
                symbol,
                Step::Signal,
                format!("no engine registered for {}", decision.strategy),
            );
        };

        let account = match self.ledger.account() {
            Ok(account) => account,
            Err(e) => return Outcome::failed(symbol, Step::Signal, e.to_string()),
        };
        let has_position = match self.ledger.position(&profile.symbol) {
            Ok(existing) => existing.is_some(),
            Err(e) => return Outcome::failed(symbol, Step::Signal, e.to_string()),
        };

        let signal = engine.generate_signal(&snapshot, &account, has_position);
        match signal.action {
            TradeAction::Hold | TradeAction::Sell => {
                // GenerateSignal never sells; anything but BUY is a hold.
                return Outcome::Held {
                    symbol: profile.symbol.clone(),
                    reason: signal.reason,
                };
            }
            TradeAction::Buy => {}
        }

        if !signal.is_executable_buy() {
            return Outcome::skipped(
                symbol,
                Step::RiskGate,
                "invalid buy signal (zero quantity or missing stop)",
            );
        }

        // ── 7. Risk gates ────────────────────────────────────────────────
        match self.buy_gates(decision.strategy, &signal, account.cash, now) {
            Ok(None) => {}
            Ok(Some(reason)) => return Outcome::skipped(symbol, Step::RiskGate, reason),
            Err(e) => return Outcome::failed(symbol, Step::RiskGate, e.to_string()),
        }

        // ── 8. Commit + trade entry ──────────────────────────────────────
        // BUY commits are never retried; a failed commit skips the candidate.
        let stop_loss = signal.stop_loss.unwrap_or_default();
        let profit_target = signal.profit_target.unwrap_or_default();
        if let Err(e) = self
            .writer
            .execute_buy(
                &profile.symbol,
                decision.strategy.key(),
                signal.quantity,
                signal.price,
                stop_loss,
                profit_target,
                &signal.reason,
            )
            .await
        {
            return Outcome::failed(symbol, Step::Commit, e.to_string());
        }

        let trade_id = Uuid::new_v4().to_string();
        if let Err(e) = self.tracker.log_trade_entry(
            &trade_id,
            &profile.symbol,
            decision.strategy,
            decision.classification,
            signal.price,
            signal.quantity,
            decision.confidence,
        ) {
            // The position is live; tracking is degraded but trading is not.
            error!(symbol, error = %e, "trade entry logging failed");
        }

        Outcome::Entered {
            symbol: profile.symbol,
            strategy: decision.strategy,
            quantity: signal.quantity,
            price: signal.price,
        }
    }

    /// Executor-level gates, checked in order. `Ok(Some(reason))` blocks.
    fn buy_gates(
        &self,
        strategy: StrategyKind,
        signal: &TradeSignal,
        cash: f64,
        now: chrono::DateTime<Utc>,
    ) -> crate::error::Result<Option<String>> {
        let cost = signal.quantity as f64 * signal.price;

        if cost > cash {
            return Ok(Some(format!(
                "insufficient cash: need {cost:.2}, have {cash:.2}"
            )));
        }

        if self.ledger.position(&signal.symbol)?.is_some() {
            return Ok(Some(format!("position already open for {}", signal.symbol)));
        }

        let open = self.ledger.open_positions()?;
        if open.len() >= self.config.execution.max_positions as usize {
            return Ok(Some(format!(
                "max positions reached: {} >= {}",
                open.len(),
                self.config.execution.max_positions
            )));
        }

        let equity = self.ledger.portfolio_value()?;
        let allocated = self.ledger.allocation(strategy.key())?;
        let cap = self.config.execution.max_strategy_allocation * equity;
        if allocated + cost > cap {
            return Ok(Some(format!(
                "strategy allocation cap: {:.2} + {:.2} > {:.2}",
                allocated, cost, cap
            )));
        }

        let today = now.format("%Y-%m-%d").to_string();
        let todays_orders = self.ledger.orders_on_day(&today)?;
        if todays_orders >= self.config.execution.max_daily_trades {
            return Ok(Some(format!(
                "daily trade limit reached: {} >= {}",
                todays_orders, self.config.execution.max_daily_trades
            )));
        }

        let (allowed, reason) = self.risk.can_buy(now);
        if !allowed {
            return Ok(Some(reason.unwrap_or_else(|| "circuit breaker".into())));
        }

        if self.tracker.strategy_disabled(strategy)? {
            return Ok(Some(format!(
                "{} disabled: win rate under floor",
                strategy.key()
            )));
        }

        Ok(None)
    }

    // -------------------------------------------------------------------------
    // Monitoring
    // -------------------------------------------------------------------------

    /// Re-evaluate every open position once. Per-symbol failures are
    /// reported but never abort the tick.
    pub async fn monitor_positions(&self) -> Vec<Outcome> {
        let now = Utc::now();
        let positions = match self.ledger.open_positions() {
            Ok(positions) => positions,
            Err(e) => {
                error!(error = %e, "monitor cannot enumerate positions");
                return vec![Outcome::failed("*", Step::Monitor, e.to_string())];
            }
        };

        if positions.is_empty() {
            debug!("monitor tick: no open positions");
            return Vec::new();
        }

        let mut outcomes = Vec::with_capacity(positions.len());
        let mut unrealized_total = 0.0;

        for position in &positions {
            let outcome = self.monitor_one(position, now, &mut unrealized_total).await;
            self.remember(outcome.clone());
            outcomes.push(outcome);
        }

        self.risk.update_unrealized(unrealized_total, now);

        // Portfolio identity: cash + cost basis of open positions.
        match self.ledger.portfolio_value() {
            Ok(value) => debug!(
                portfolio_value = format!("{value:.2}"),
                unrealized = format!("{unrealized_total:.2}"),
                positions = positions.len(),
                "monitor tick complete"
            ),
            Err(e) => warn!(error = %e, "portfolio value unavailable"),
        }

        outcomes
    }

    async fn monitor_one(
        &self,
        position: &Position,
        now: chrono::DateTime<Utc>,
        unrealized_total: &mut f64,
    ) -> Outcome {
        let symbol = position.symbol.as_str();

        let snapshot = match self.source.fetch(symbol).await {
            Ok(snapshot) => snapshot,
            Err(e) => return Outcome::failed(symbol, Step::Monitor, e.to_string()),
        };
        let price = snapshot.current_price;
        if price <= 0.0 {
            return Outcome::failed(symbol, Step::Monitor, "no usable quote");
        }

        *unrealized_total += price * position.quantity as f64 - position.notional();

        let Some(kind) = StrategyKind::from_key(&position.strategy) else {
            return Outcome::failed(
                symbol,
                Step::Monitor,
                format!("unknown strategy {}", position.strategy),
            );
        };
        let Some(engine) = self.engines.get(&kind) else {
            return Outcome::failed(
                symbol,
                Step::Monitor,
                format!("no engine registered for {}", position.strategy),
            );
        };

        // Forced-exit breaker overrides the engine.
        let signal = if self.risk.forced_exit(position.entry_price, price) {
            warn!(
                symbol,
                entry = position.entry_price,
                price,
                "forced exit: drawdown beyond limit"
            );
            TradeSignal::sell(symbol, price, "forced exit: drawdown beyond limit")
        } else {
            engine.monitor_position(position, &snapshot, now)
        };

        match signal.action {
            TradeAction::Sell => self.execute_exit(position, kind, price, &signal.reason, now).await,
            TradeAction::Hold | TradeAction::Buy => {
                // Persist a ratcheted trailing stop surfaced on HOLD.
                if let Some(new_stop) = signal.stop_loss {
                    if new_stop > position.stop_loss {
                        if let Err(e) = self.writer.update_stop(symbol, new_stop).await {
                            warn!(symbol, error = %e, "trailing stop update failed");
                        } else {
                            debug!(symbol, new_stop, "trailing stop ratcheted");
                        }
                    }
                }
                Outcome::Held {
                    symbol: symbol.to_string(),
                    reason: signal.reason,
                }
            }
        }
    }

    /// Commit a SELL, retrying once on a failed transaction, then close the
    /// trade record and feed the result to the risk governor.
    async fn execute_exit(
        &self,
        position: &Position,
        kind: StrategyKind,
        price: f64,
        reason: &str,
        now: chrono::DateTime<Utc>,
    ) -> Outcome {
        let symbol = position.symbol.as_str();

        let mut result = self
            .writer
            .execute_sell(symbol, &position.strategy, price, reason)
            .await;
        if let Err(Error::TransactionFailed(first)) = &result {
            warn!(symbol, error = %first, "sell commit failed, retrying once");
            result = self
                .writer
                .execute_sell(symbol, &position.strategy, price, reason)
                .await;
        }
        if let Err(e) = result {
            return Outcome::failed(symbol, Step::Commit, e.to_string());
        }

        let pnl = (price - position.entry_price) * position.quantity as f64;
        self.risk.record_trade_result(pnl, now);

        match self.tracker.open_trade_id(symbol, kind) {
            Ok(Some(trade_id)) => {
                if let Err(e) = self.tracker.log_trade_exit(&trade_id, price, reason) {
                    error!(symbol, trade_id, error = %e, "trade exit logging failed");
                }
            }
            Ok(None) => warn!(symbol, "no open trade record for exit"),
            Err(e) => error!(symbol, error = %e, "trade lookup failed"),
        }

        info!(symbol, price, pnl, reason, "position exited");

        Outcome::Exited {
            symbol: symbol.to_string(),
            strategy: kind,
            quantity: position.quantity,
            price,
            reason: reason.to_string(),
        }
    }

    /// Run the monitor at a fixed cadence until cancellation. Ticks never
    /// overlap; a tick that overruns the interval simply delays the next.
    pub async fn run_monitoring_loop(&self, tick: Duration, shutdown: CancellationToken) {
        info!(interval_secs = tick.as_secs(), "monitor loop started");
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("monitor loop stopping");
                    return;
                }
                _ = ticker.tick() => {
                    let outcomes = self.monitor_positions().await;
                    let exits = outcomes
                        .iter()
                        .filter(|o| matches!(o, Outcome::Exited { .. }))
                        .count();
                    if exits > 0 {
                        info!(exits, "monitor tick closed positions");
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Audit ring
    // -------------------------------------------------------------------------

    fn remember(&self, outcome: Outcome) {
        let mut ring = self.recent_outcomes.write();
        ring.push(outcome);
        while ring.len() > MAX_RECENT_OUTCOMES {
            ring.remove(0);
        }
    }

    /// Snapshot of the most recent outcomes, oldest first.
    pub fn recent_outcomes(&self) -> Vec<Outcome> {
        self.recent_outcomes.read().clone()
    }
}

// =============================================================================
// Tests — end-to-end pipeline scenarios over a static source and an
// in-memory ledger
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use crate::config::Config;
    use crate::engines::build_engines;
    use crate::ledger::writer;
    use crate::market_data::StaticSource;
    use crate::screener::Recommendation;
    use crate::types::{ConfidenceLevel, SymbolFacts};

    struct Harness {
        executor: TradeExecutor,
        source: Arc<StaticSource>,
        store: Arc<RecommendationStore>,
        ledger: Ledger,
        tracker: Arc<PerformanceTracker>,
    }

    fn harness(starting_cash: f64) -> Harness {
        let mut config = Config::default();
        // Reference facts used by the momentum-sector scenario.
        config.routing.symbol_facts.insert(
            "MU".into(),
            SymbolFacts {
                market_cap: 100e9,
                sector: Some("semiconductors".into()),
            },
        );

        let ledger = Ledger::open_in_memory().unwrap();
        ledger.seed_account(starting_cash).unwrap();
        let (writer, _task) = writer::spawn(ledger.clone(), 16);

        let source = Arc::new(StaticSource::new());
        let tracker = Arc::new(PerformanceTracker::new(
            ledger.clone(),
            config.execution.strategy_win_rate_floor,
            config.execution.strategy_win_rate_window,
        ));
        let classifier = Classifier::new(config.routing.clone(), source.clone());
        let router = StrategyRouter::new(config.routing.clone(), tracker.clone());
        let validator =
            EntryValidator::new(config.validator.clone(), config.routing.min_stop_buffer);
        let engines = build_engines(&config.engines, config.routing.min_stop_buffer);
        let store = Arc::new(RecommendationStore::new());
        let risk = RiskGovernor::new(
            starting_cash,
            config.execution.daily_loss_limit,
            config.execution.consecutive_loss_limit,
            config.execution.loss_pause_minutes,
            config.execution.forced_exit_drawdown,
        );

        let executor = TradeExecutor::new(
            config,
            source.clone(),
            classifier,
            router,
            validator,
            engines,
            store.clone(),
            ledger.clone(),
            writer,
            tracker.clone(),
            risk,
        );

        Harness {
            executor,
            source,
            store,
            ledger,
            tracker,
        }
    }

    /// SPY sliding from 580 to 546 over 30 days: RSI deeply oversold.
    fn seed_declining_spy(source: &StaticSource, current_price: f64) {
        let closes: Vec<f64> = (0..30).map(|i| 580.0 - i as f64 * (34.0 / 29.0)).collect();
        source.set(crate::market_data::MarketSnapshot {
            symbol: "SPY".into(),
            volumes: vec![60e6; closes.len()],
            current_price,
            current_volume: 64e6,
            closes,
            source: "static".into(),
        });
    }

    fn spy_recommendation(age_hours: i64) -> Recommendation {
        Recommendation {
            symbol: "SPY".into(),
            entry_low: 540.0,
            entry_high: 550.0,
            target: 560.0,
            stop: 510.0,
            confidence_level: ConfidenceLevel::High,
            issued_at: Utc::now() - ChronoDuration::hours(age_hours),
        }
    }

    /// MU capped at 95.00 for 19 bars, breaking out at 95.50 on 1.8x volume.
    fn seed_mu_breakout(source: &StaticSource, current_price: f64) {
        let closes = vec![
            90.0, 91.0, 92.0, 93.0, 94.0, 95.0, 94.5, 93.5, 92.5, 93.0,
            93.5, 94.0, 94.2, 94.4, 94.6, 94.8, 94.9, 94.95, 95.0, 95.5,
        ];
        source.set(crate::market_data::MarketSnapshot {
            symbol: "MU".into(),
            volumes: vec![1_000_000.0; closes.len()],
            current_price,
            current_volume: 1_800_000.0,
            closes,
            source: "static".into(),
        });
    }

    // -------------------------------------------------------------------------
    // Scenario: ETF in band with oversold RSI enters and commits
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn etf_oversold_entry_commits_atomically() {
        let h = harness(10_000.0);
        seed_declining_spy(&h.source, 545.0);
        h.store.absorb(vec![spy_recommendation(2)]);

        let outcome = h.executor.process_candidate("SPY").await;
        let Outcome::Entered { symbol, strategy, quantity, price } = outcome else {
            panic!("expected entry, got {outcome:?}");
        };
        assert_eq!(symbol, "SPY");
        assert_eq!(strategy, StrategyKind::RsiMeanReversion);
        assert_eq!(quantity, 4); // floor(0.25 * 10_000 / 545)
        assert!((price - 545.0).abs() < 1e-9);

        // One BUY order, one position, cash debited, portfolio preserved.
        let position = h.ledger.position("SPY").unwrap().unwrap();
        assert!((position.stop_loss - 545.0 * 0.95).abs() < 1e-9);
        assert!((position.profit_target - 545.0 * 1.025).abs() < 1e-9);
        assert!((h.ledger.account().unwrap().cash - (10_000.0 - 4.0 * 545.0)).abs() < 1e-9);
        assert!((h.ledger.portfolio_value().unwrap() - 10_000.0).abs() < 1e-9);

        // Trade entry logged and linked to the open position.
        assert!(h
            .tracker
            .open_trade_id("SPY", StrategyKind::RsiMeanReversion)
            .unwrap()
            .is_some());
    }

    // -------------------------------------------------------------------------
    // Scenario: penny stock below the entry band defers instead of entering
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn penny_stock_below_band_waits() {
        let h = harness(10_000.0);
        let closes: Vec<f64> = (0..30)
            .map(|i| 2.10 - i as f64 * 0.006 + if i % 2 == 0 { 0.03 } else { -0.03 })
            .collect();
        h.source.set(crate::market_data::MarketSnapshot {
            symbol: "ABTC".into(),
            volumes: vec![5e5; closes.len()],
            current_price: 1.91,
            current_volume: 5e5,
            closes,
            source: "static".into(),
        });
        h.store.absorb(vec![Recommendation {
            symbol: "ABTC".into(),
            entry_low: 2.00,
            entry_high: 2.05,
            target: 2.25,
            stop: 1.90,
            confidence_level: ConfidenceLevel::High,
            issued_at: Utc::now() - ChronoDuration::hours(2),
        }]);

        let outcome = h.executor.process_candidate("ABTC").await;
        let Outcome::Skipped { step, reason, .. } = outcome else {
            panic!("expected skip, got {outcome:?}");
        };
        assert_eq!(step, Step::Validation);
        assert!(reason.contains("wait for better entry"));
        assert!(reason.contains("2.00-2.05"));

        // No ledger change of any kind.
        assert!(h.ledger.open_positions().unwrap().is_empty());
        assert!(h.ledger.recent_orders(10).unwrap().is_empty());
        assert!((h.ledger.account().unwrap().cash - 10_000.0).abs() < 1e-9);
    }

    // -------------------------------------------------------------------------
    // Scenario: stale recommendation is rejected but the route is still logged
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn stale_recommendation_rejected_after_routing() {
        let h = harness(10_000.0);
        seed_declining_spy(&h.source, 545.0);
        h.store.absorb(vec![spy_recommendation(26)]);

        let outcome = h.executor.process_candidate("SPY").await;
        let Outcome::Skipped { step, reason, .. } = outcome else {
            panic!("expected skip, got {outcome:?}");
        };
        assert_eq!(step, Step::Validation);
        assert!(reason.starts_with("freshness"));

        // The routing decision was persisted before validation failed.
        assert_eq!(h.tracker.decision_count(), 1);
        assert!(h.ledger.recent_orders(10).unwrap().is_empty());
    }

    // -------------------------------------------------------------------------
    // Scenario: consecutive-loss breaker blocks an otherwise valid entry
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn consecutive_losses_block_buys() {
        let h = harness(10_000.0);
        seed_declining_spy(&h.source, 545.0);
        h.store.absorb(vec![spy_recommendation(2)]);

        let now = Utc::now();
        for _ in 0..5 {
            h.executor.risk.record_trade_result(-10.0, now);
        }

        let outcome = h.executor.process_candidate("SPY").await;
        let Outcome::Skipped { step, reason, .. } = outcome else {
            panic!("expected skip, got {outcome:?}");
        };
        assert_eq!(step, Step::RiskGate);
        assert!(reason.contains("consecutive_losses"));
        assert!(h.ledger.recent_orders(10).unwrap().is_empty());
    }

    // -------------------------------------------------------------------------
    // Scenario: no recommendation means no entry
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn missing_recommendation_skips() {
        let h = harness(10_000.0);
        seed_declining_spy(&h.source, 545.0);

        let outcome = h.executor.process_candidate("SPY").await;
        let Outcome::Skipped { step, .. } = outcome else {
            panic!("expected skip, got {outcome:?}");
        };
        assert_eq!(step, Step::Recommendation);
    }

    // -------------------------------------------------------------------------
    // Scenario: too little history is rejected after routing
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn thin_history_skips() {
        let h = harness(10_000.0);
        h.source.seed("SPY", vec![545.0; 19], vec![1e6; 19]);
        h.store.absorb(vec![spy_recommendation(2)]);

        let outcome = h.executor.process_candidate("SPY").await;
        let Outcome::Skipped { step, reason, .. } = outcome else {
            panic!("expected skip, got {outcome:?}");
        };
        assert_eq!(step, Step::MarketData);
        assert!(reason.contains("19 closes"));
    }

    // -------------------------------------------------------------------------
    // Scenario: second candidate for an open symbol holds, never doubles up
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn no_second_position_for_same_symbol() {
        let h = harness(10_000.0);
        seed_declining_spy(&h.source, 545.0);
        h.store.absorb(vec![spy_recommendation(2)]);

        assert!(matches!(
            h.executor.process_candidate("SPY").await,
            Outcome::Entered { .. }
        ));
        let outcome = h.executor.process_candidate("SPY").await;
        let Outcome::Held { reason, .. } = outcome else {
            panic!("expected hold, got {outcome:?}");
        };
        assert_eq!(reason, "position already open");
        assert_eq!(h.ledger.open_positions().unwrap().len(), 1);
    }

    // -------------------------------------------------------------------------
    // Scenario: monitor exits at the profit target and closes the books
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn monitor_exit_closes_trade_and_credits_cash() {
        let h = harness(10_000.0);
        seed_declining_spy(&h.source, 545.0);
        h.store.absorb(vec![spy_recommendation(2)]);
        assert!(matches!(
            h.executor.process_candidate("SPY").await,
            Outcome::Entered { .. }
        ));

        // Price gaps through the 558.63 target.
        seed_declining_spy(&h.source, 558.90);
        let outcomes = h.executor.monitor_positions().await;
        assert_eq!(outcomes.len(), 1);
        let Outcome::Exited { reason, quantity, price, .. } = &outcomes[0] else {
            panic!("expected exit, got {:?}", outcomes[0]);
        };
        assert_eq!(reason, "profit target");
        assert_eq!(*quantity, 4);

        // Position gone, cash credited, trade record closed.
        assert!(h.ledger.position("SPY").unwrap().is_none());
        let expected_cash = 10_000.0 - 4.0 * 545.0 + 4.0 * price;
        assert!((h.ledger.account().unwrap().cash - expected_cash).abs() < 1e-9);
        assert!(h
            .tracker
            .open_trade_id("SPY", StrategyKind::RsiMeanReversion)
            .unwrap()
            .is_none());

        // The (strategy, etf) aggregate was refreshed.
        let metric_rows: u32 = h
            .ledger
            .lock()
            .query_row("SELECT COUNT(*) FROM strategy_metrics", [], |r| r.get(0))
            .unwrap();
        assert_eq!(metric_rows, 1);
    }

    // -------------------------------------------------------------------------
    // Scenario: momentum breakout enters and the trailing stop ratchets
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn momentum_breakout_enters_and_trails() {
        let h = harness(10_000.0);
        seed_mu_breakout(&h.source, 95.5);
        h.store.absorb(vec![Recommendation {
            symbol: "MU".into(),
            entry_low: 95.0,
            entry_high: 96.0,
            target: 104.0,
            stop: 87.0,
            confidence_level: ConfidenceLevel::High,
            issued_at: Utc::now() - ChronoDuration::hours(1),
        }]);

        let outcome = h.executor.process_candidate("MU").await;
        let Outcome::Entered { strategy, quantity, .. } = outcome else {
            panic!("expected entry, got {outcome:?}");
        };
        assert_eq!(strategy, StrategyKind::MomentumBreakout);
        assert_eq!(quantity, 20); // floor(0.20 * 10_000 / 95.5)

        let position = h.ledger.position("MU").unwrap().unwrap();
        assert!((position.stop_loss - 95.5 * 0.92).abs() < 1e-9);

        // A push to 99.00 holds and ratchets the stop to 89.10.
        seed_mu_breakout(&h.source, 99.0);
        let outcomes = h.executor.monitor_positions().await;
        assert!(matches!(outcomes[0], Outcome::Held { .. }));

        let position = h.ledger.position("MU").unwrap().unwrap();
        assert!((position.stop_loss - 89.1).abs() < 1e-9);
    }

    // -------------------------------------------------------------------------
    // Scenario: deep drawdown forces an exit regardless of the engine
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn forced_exit_on_deep_drawdown() {
        let h = harness(10_000.0);
        seed_declining_spy(&h.source, 545.0);
        h.store.absorb(vec![spy_recommendation(2)]);
        assert!(matches!(
            h.executor.process_candidate("SPY").await,
            Outcome::Entered { .. }
        ));

        // Down 25% from entry: beyond the 20% forced-exit limit. The RSI
        // engine would also exit on its stop here, but the reason must be
        // the breaker's.
        seed_declining_spy(&h.source, 545.0 * 0.75);
        let outcomes = h.executor.monitor_positions().await;
        let Outcome::Exited { reason, .. } = &outcomes[0] else {
            panic!("expected exit, got {:?}", outcomes[0]);
        };
        assert!(reason.contains("forced exit"));
    }

    // -------------------------------------------------------------------------
    // Invariant: cash + cost basis equals starting cash plus realized PnL
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn portfolio_identity_holds_across_round_trip() {
        let h = harness(10_000.0);
        seed_declining_spy(&h.source, 545.0);
        h.store.absorb(vec![spy_recommendation(2)]);
        h.executor.process_candidate("SPY").await;

        seed_declining_spy(&h.source, 558.90);
        h.executor.monitor_positions().await;

        let realized = 4.0 * (558.90 - 545.0);
        let value = h.ledger.portfolio_value().unwrap();
        assert!((value - (10_000.0 + realized)).abs() < 1e-9);
    }
}
