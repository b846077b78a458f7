// =============================================================================
// Meridian Paper Trader — Main Entry Point
// =============================================================================
//
// Wires the pipeline together and runs four long-lived tasks:
//   1. The screener poller, feeding the bounded candidate queue.
//   2. A small worker pool consuming candidates through the executor.
//   3. The position monitor loop.
//   4. The single ledger writer.
//
// Ctrl+C cancels the token: the poller stops, the queue drains, the monitor
// finishes its tick, and the writer completes in-flight transactions before
// the process exits.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod classifier;
mod config;
mod engines;
mod error;
mod executor;
mod indicators;
mod ledger;
mod market_data;
mod risk;
mod router;
mod screener;
mod tracker;
mod types;
mod validator;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::classifier::Classifier;
use crate::config::Config;
use crate::executor::TradeExecutor;
use crate::ledger::{writer, Ledger};
use crate::market_data::{http::HttpSource, local::LocalBarSource, ChainedSource, MarketDataSource};
use crate::risk::RiskGovernor;
use crate::router::StrategyRouter;
use crate::screener::{poller, CandidateQueue, RecommendationStore};
use crate::tracker::PerformanceTracker;
use crate::validator::EntryValidator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Meridian Paper Trader starting up");

    let config_path =
        std::env::var("MERIDIAN_CONFIG").unwrap_or_else(|_| "meridian.json".into());
    let config = if std::path::Path::new(&config_path).exists() {
        // A present-but-invalid config is fatal.
        Config::load(&config_path)?
    } else {
        warn!(path = %config_path, "config file not found, using defaults");
        let defaults = Config::default();
        defaults.validate()?;
        defaults
    };

    // ── 2. Ledger ────────────────────────────────────────────────────────
    let db_path = std::env::var("MERIDIAN_DB").unwrap_or_else(|_| config.db_path.clone());
    let ledger = Ledger::open(&db_path)?;
    ledger.seed_account(config.execution.starting_cash)?;

    let account = ledger.account()?;
    let open = ledger.open_positions()?;
    let portfolio_value = ledger.portfolio_value()?;
    info!(
        cash = format!("{:.2}", account.cash),
        open_positions = open.len(),
        portfolio_value = format!("{portfolio_value:.2}"),
        "ledger ready"
    );

    // ── 3. Market data sources ───────────────────────────────────────────
    let timeout = Duration::from_secs(config.market_data.fetch_timeout_secs);
    let mut sources: Vec<Arc<dyn MarketDataSource>> = Vec::new();
    if !config.market_data.primary_url.is_empty() {
        sources.push(Arc::new(HttpSource::new(
            config.market_data.primary_url.clone(),
            "primary",
            timeout,
        )));
    }
    if !config.market_data.bars_dir.is_empty() {
        sources.push(Arc::new(LocalBarSource::new(
            config.market_data.bars_dir.clone(),
        )));
    }
    if !config.market_data.fallback_url.is_empty() {
        sources.push(Arc::new(HttpSource::new(
            config.market_data.fallback_url.clone(),
            "fallback",
            timeout,
        )));
    }
    if sources.is_empty() {
        warn!("no market data sources configured, every fetch will fail");
    }
    let source: Arc<dyn MarketDataSource> = Arc::new(ChainedSource::new(sources));

    // ── 4. Pipeline components ───────────────────────────────────────────
    let tracker = Arc::new(PerformanceTracker::new(
        ledger.clone(),
        config.execution.strategy_win_rate_floor,
        config.execution.strategy_win_rate_window,
    ));
    let classifier = Classifier::new(config.routing.clone(), source.clone());
    let router = StrategyRouter::new(config.routing.clone(), tracker.clone());
    let validator = EntryValidator::new(config.validator.clone(), config.routing.min_stop_buffer);
    let engines = engines::build_engines(&config.engines, config.routing.min_stop_buffer);
    let risk = RiskGovernor::new(
        portfolio_value,
        config.execution.daily_loss_limit,
        config.execution.consecutive_loss_limit,
        config.execution.loss_pause_minutes,
        config.execution.forced_exit_drawdown,
    );

    let store = Arc::new(RecommendationStore::new());
    let queue = Arc::new(CandidateQueue::new(
        config.screener.queue_capacity,
        config.screener.cooldown_secs,
    ));

    let (ledger_writer, writer_task) = writer::spawn(ledger.clone(), 64);

    let executor = Arc::new(TradeExecutor::new(
        config.clone(),
        source.clone(),
        classifier,
        router,
        validator,
        engines,
        store.clone(),
        ledger.clone(),
        ledger_writer,
        tracker.clone(),
        risk,
    ));

    let shutdown = CancellationToken::new();

    // ── 5. Screener poller ───────────────────────────────────────────────
    let poller_task = tokio::spawn(poller::run_screener_poller(
        config.screener.clone(),
        store.clone(),
        queue.clone(),
        shutdown.clone(),
    ));

    // ── 6. Candidate workers ─────────────────────────────────────────────
    // Workers run until the queue is closed and drained, so candidates
    // already enqueued at shutdown are still processed.
    let mut worker_tasks = Vec::with_capacity(config.screener.workers);
    for worker_id in 0..config.screener.workers {
        let queue = queue.clone();
        let executor = executor.clone();
        worker_tasks.push(tokio::spawn(async move {
            info!(worker_id, "candidate worker started");
            while let Some(symbol) = queue.next().await {
                executor.process_candidate(&symbol).await;
            }
            info!(worker_id, "candidate worker drained and stopped");
        }));
    }

    // ── 7. Monitor loop ──────────────────────────────────────────────────
    let monitor_task = {
        let executor = executor.clone();
        let shutdown = shutdown.clone();
        let tick = Duration::from_secs(config.monitor_interval_secs);
        tokio::spawn(async move {
            executor.run_monitoring_loop(tick, shutdown).await;
        })
    };

    info!(
        workers = config.screener.workers,
        monitor_interval_secs = config.monitor_interval_secs,
        screener_poll_secs = config.screener.poll_interval_secs,
        "all subsystems running, press Ctrl+C to stop"
    );

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, draining");

    shutdown.cancel();
    queue.close();

    let _ = poller_task.await;
    join_all(worker_tasks).await;
    let _ = monitor_task.await;

    // Final performance report for the session.
    match tracker.report(30) {
        Ok(rows) if !rows.is_empty() => {
            for row in &rows {
                info!(
                    strategy = %row.strategy,
                    stock_type = %row.stock_type,
                    trades = row.total_trades,
                    win_rate = format!("{:.0}%", row.win_rate * 100.0),
                    avg_profit = format!("{:.2}%", row.avg_profit_pct * 100.0),
                    "30-day aggregate"
                );
            }
            if let Ok(top) = tracker.top_performers("avg_profit_pct", 1, 30) {
                if let Some(best) = top.first() {
                    info!(
                        strategy = %best.strategy,
                        stock_type = %best.stock_type,
                        avg_profit = format!("{:.2}%", best.avg_profit_pct * 100.0),
                        "top performer"
                    );
                }
            }
            if let Ok(accuracy) = tracker.routing_accuracy(30) {
                info!(accuracy = format!("{:.0}%", accuracy * 100.0), "routing accuracy");
            }
        }
        Ok(_) => info!("no closed trades in the last 30 days"),
        Err(e) => warn!(error = %e, "final report unavailable"),
    }
    info!(
        outcomes = executor.recent_outcomes().len(),
        "session outcome audit ring"
    );

    // Dropping the executor releases the last writer handle; the writer
    // then finishes in-flight transactions and exits.
    drop(executor);
    let _ = writer_task.await;

    info!("Meridian Paper Trader shut down complete");
    Ok(())
}
