// =============================================================================
// Configuration — engine settings loaded once at startup
// =============================================================================
//
// Every tunable parameter of the orchestrator lives here: routing thresholds,
// validator rules, executor caps, circuit-breaker limits, per-engine
// parameters, and the cadence of the two periodic loops.
//
// All fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older config file. A missing file falls back to defaults with a
// warning; a present-but-invalid file is fatal.
// =============================================================================

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::types::ConfidenceLevel;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_penny_threshold() -> f64 {
    5.0
}

fn default_high_vol_threshold() -> f64 {
    0.30
}

fn default_large_cap_threshold() -> f64 {
    100e9
}

fn default_mid_cap_threshold() -> f64 {
    10e9
}

fn default_min_stop_buffer() -> f64 {
    0.05
}

fn default_etf_symbols() -> Vec<String> {
    vec!["SPY".into(), "QQQ".into(), "IWM".into(), "DIA".into()]
}

fn default_momentum_sectors() -> Vec<String> {
    vec!["semiconductors".into()]
}

fn default_min_confidence() -> ConfidenceLevel {
    ConfidenceLevel::Medium
}

fn default_max_data_age_hours() -> i64 {
    24
}

fn default_wait_tolerance() -> f64 {
    0.05
}

fn default_starting_cash() -> f64 {
    100_000.0
}

fn default_max_positions() -> u32 {
    10
}

fn default_max_daily_trades() -> u32 {
    20
}

fn default_max_strategy_allocation() -> f64 {
    0.50
}

fn default_daily_loss_limit() -> f64 {
    0.05
}

fn default_consecutive_loss_limit() -> u32 {
    5
}

fn default_loss_pause_minutes() -> i64 {
    30
}

fn default_strategy_win_rate_floor() -> f64 {
    0.30
}

fn default_strategy_win_rate_window() -> u32 {
    20
}

fn default_forced_exit_drawdown() -> f64 {
    0.20
}

fn default_rsi_period() -> usize {
    14
}

fn default_rsi_oversold() -> f64 {
    45.0
}

fn default_rsi_overbought() -> f64 {
    55.0
}

fn default_rsi_position_size() -> f64 {
    0.25
}

fn default_rsi_profit_target() -> f64 {
    0.025
}

fn default_rsi_max_hold_days() -> i64 {
    12
}

fn default_breakout_period() -> usize {
    20
}

fn default_volume_multiplier() -> f64 {
    1.5
}

fn default_breakout_margin() -> f64 {
    0.001
}

fn default_momentum_stop_loss() -> f64 {
    0.08
}

fn default_trailing_stop() -> f64 {
    0.10
}

fn default_momentum_profit_target() -> f64 {
    0.08
}

fn default_momentum_position_size() -> f64 {
    0.20
}

fn default_momentum_max_hold_days() -> i64 {
    20
}

fn default_fast_period() -> usize {
    5
}

fn default_slow_period() -> usize {
    20
}

fn default_bollinger_period() -> usize {
    20
}

fn default_bollinger_num_std() -> f64 {
    2.0
}

fn default_bollinger_stop_pct() -> f64 {
    0.03
}

fn default_bollinger_profit_target() -> f64 {
    0.04
}

fn default_bollinger_position_size() -> f64 {
    0.25
}

fn default_bollinger_max_hold_days() -> i64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_monitor_interval_secs() -> u64 {
    60
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_screener_file() -> String {
    "screener.json".into()
}

fn default_queue_capacity() -> usize {
    64
}

fn default_cooldown_secs() -> i64 {
    3600
}

fn default_workers() -> usize {
    4
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_db_path() -> String {
    "meridian.db".into()
}

// =============================================================================
// Sections
// =============================================================================

/// Thresholds used by the classifier and the strategy router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Price below this is classified as a penny stock.
    #[serde(default = "default_penny_threshold")]
    pub penny_threshold: f64,

    /// Annualized volatility above this prefers the momentum strategy.
    #[serde(default = "default_high_vol_threshold")]
    pub high_vol_threshold: f64,

    /// Market cap above this is a large cap.
    #[serde(default = "default_large_cap_threshold")]
    pub large_cap_threshold: f64,

    /// Market cap above this (and below large) is a mid cap.
    #[serde(default = "default_mid_cap_threshold")]
    pub mid_cap_threshold: f64,

    /// Minimum gap between price and stop, as a fraction of price.
    #[serde(default = "default_min_stop_buffer")]
    pub min_stop_buffer: f64,

    /// Symbols always classified as ETFs.
    #[serde(default = "default_etf_symbols")]
    pub etf_symbols: Vec<String>,

    /// Sectors that bias routing toward the momentum strategy.
    #[serde(default = "default_momentum_sectors")]
    pub momentum_sectors: Vec<String>,

    /// Per-symbol reference facts (market cap, sector) for the classifier.
    #[serde(default)]
    pub symbol_facts: std::collections::HashMap<String, crate::types::SymbolFacts>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            penny_threshold: default_penny_threshold(),
            high_vol_threshold: default_high_vol_threshold(),
            large_cap_threshold: default_large_cap_threshold(),
            mid_cap_threshold: default_mid_cap_threshold(),
            min_stop_buffer: default_min_stop_buffer(),
            etf_symbols: default_etf_symbols(),
            momentum_sectors: default_momentum_sectors(),
            symbol_facts: std::collections::HashMap::new(),
        }
    }
}

/// Rules applied by the entry validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Recommendations below this confidence are rejected.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: ConfidenceLevel,

    /// Recommendations older than this are rejected as stale.
    #[serde(default = "default_max_data_age_hours")]
    pub max_data_age_hours: i64,

    /// How far below the entry band a price may sit and still count as
    /// "wait for a better entry" rather than a hard reject, as a fraction
    /// of entry_low.
    #[serde(default = "default_wait_tolerance")]
    pub wait_tolerance: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            max_data_age_hours: default_max_data_age_hours(),
            wait_tolerance: default_wait_tolerance(),
        }
    }
}

/// Executor caps and circuit-breaker limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Cash the account row is seeded with on first run.
    #[serde(default = "default_starting_cash")]
    pub starting_cash: f64,

    /// Hard cap on concurrently open positions.
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,

    /// Maximum executed orders per UTC day.
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,

    /// Per-strategy cap on allocated equity, as a fraction.
    #[serde(default = "default_max_strategy_allocation")]
    pub max_strategy_allocation: f64,

    /// Daily loss (realized + unrealized) that halts all buys, as a
    /// fraction of the day's starting equity.
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: f64,

    /// Consecutive losing closed trades that pause buys.
    #[serde(default = "default_consecutive_loss_limit")]
    pub consecutive_loss_limit: u32,

    /// Length of the consecutive-loss pause.
    #[serde(default = "default_loss_pause_minutes")]
    pub loss_pause_minutes: i64,

    /// Strategy win rate under this floor disables the strategy.
    #[serde(default = "default_strategy_win_rate_floor")]
    pub strategy_win_rate_floor: f64,

    /// Number of recent trades the win-rate floor is computed over.
    #[serde(default = "default_strategy_win_rate_window")]
    pub strategy_win_rate_window: u32,

    /// Open-position drawdown that forces a SELL on the next monitor tick.
    #[serde(default = "default_forced_exit_drawdown")]
    pub forced_exit_drawdown: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            starting_cash: default_starting_cash(),
            max_positions: default_max_positions(),
            max_daily_trades: default_max_daily_trades(),
            max_strategy_allocation: default_max_strategy_allocation(),
            daily_loss_limit: default_daily_loss_limit(),
            consecutive_loss_limit: default_consecutive_loss_limit(),
            loss_pause_minutes: default_loss_pause_minutes(),
            strategy_win_rate_floor: default_strategy_win_rate_floor(),
            strategy_win_rate_window: default_strategy_win_rate_window(),
            forced_exit_drawdown: default_forced_exit_drawdown(),
        }
    }
}

/// RSI mean-reversion engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsiEngineConfig {
    #[serde(default = "default_rsi_period")]
    pub period: usize,

    /// BUY when RSI falls below this.
    #[serde(default = "default_rsi_oversold")]
    pub oversold: f64,

    /// SELL when RSI rises above this.
    #[serde(default = "default_rsi_overbought")]
    pub overbought: f64,

    /// Fraction of available cash per position.
    #[serde(default = "default_rsi_position_size")]
    pub position_size: f64,

    /// Profit target as a fraction of entry price.
    #[serde(default = "default_rsi_profit_target")]
    pub profit_target: f64,

    #[serde(default = "default_rsi_max_hold_days")]
    pub max_hold_days: i64,
}

impl Default for RsiEngineConfig {
    fn default() -> Self {
        Self {
            period: default_rsi_period(),
            oversold: default_rsi_oversold(),
            overbought: default_rsi_overbought(),
            position_size: default_rsi_position_size(),
            profit_target: default_rsi_profit_target(),
            max_hold_days: default_rsi_max_hold_days(),
        }
    }
}

/// Momentum breakout engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumEngineConfig {
    /// Lookback over which resistance and average volume are computed.
    #[serde(default = "default_breakout_period")]
    pub breakout_period: usize,

    /// Current volume must be at least this multiple of average volume.
    #[serde(default = "default_volume_multiplier")]
    pub volume_multiplier: f64,

    /// Price must clear resistance by this fraction.
    #[serde(default = "default_breakout_margin")]
    pub breakout_margin: f64,

    /// Fixed stop distance as a fraction of entry price.
    #[serde(default = "default_momentum_stop_loss")]
    pub stop_loss: f64,

    /// Trailing stop distance as a fraction of the highest price seen.
    #[serde(default = "default_trailing_stop")]
    pub trailing_stop: f64,

    #[serde(default = "default_momentum_profit_target")]
    pub profit_target: f64,

    #[serde(default = "default_momentum_position_size")]
    pub position_size: f64,

    #[serde(default = "default_momentum_max_hold_days")]
    pub max_hold_days: i64,

    /// Fast moving-average window (momentum confirmation).
    #[serde(default = "default_fast_period")]
    pub fast_period: usize,

    /// Slow moving-average window.
    #[serde(default = "default_slow_period")]
    pub slow_period: usize,
}

impl Default for MomentumEngineConfig {
    fn default() -> Self {
        Self {
            breakout_period: default_breakout_period(),
            volume_multiplier: default_volume_multiplier(),
            breakout_margin: default_breakout_margin(),
            stop_loss: default_momentum_stop_loss(),
            trailing_stop: default_trailing_stop(),
            profit_target: default_momentum_profit_target(),
            position_size: default_momentum_position_size(),
            max_hold_days: default_momentum_max_hold_days(),
            fast_period: default_fast_period(),
            slow_period: default_slow_period(),
        }
    }
}

/// Bollinger mean-reversion engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BollingerEngineConfig {
    #[serde(default = "default_bollinger_period")]
    pub period: usize,

    /// Band width in standard deviations.
    #[serde(default = "default_bollinger_num_std")]
    pub num_std: f64,

    /// Stop distance as a fraction of entry price.
    #[serde(default = "default_bollinger_stop_pct")]
    pub stop_pct: f64,

    #[serde(default = "default_bollinger_profit_target")]
    pub profit_target: f64,

    #[serde(default = "default_bollinger_position_size")]
    pub position_size: f64,

    /// Exit at the middle band when true, at the upper band when false.
    #[serde(default = "default_true")]
    pub exit_at_middle: bool,

    #[serde(default = "default_bollinger_max_hold_days")]
    pub max_hold_days: i64,
}

impl Default for BollingerEngineConfig {
    fn default() -> Self {
        Self {
            period: default_bollinger_period(),
            num_std: default_bollinger_num_std(),
            stop_pct: default_bollinger_stop_pct(),
            profit_target: default_bollinger_profit_target(),
            position_size: default_bollinger_position_size(),
            exit_at_middle: true,
            max_hold_days: default_bollinger_max_hold_days(),
        }
    }
}

/// Per-engine parameter blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnginesConfig {
    #[serde(default)]
    pub rsi: RsiEngineConfig,
    #[serde(default)]
    pub momentum: MomentumEngineConfig,
    #[serde(default)]
    pub bollinger: BollingerEngineConfig,
}

/// Cadence of the screener poller and the candidate worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerConfig {
    /// Path of the screener JSON document.
    #[serde(default = "default_screener_file")]
    pub file: String,

    /// Seconds between screener polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Bound on the candidate queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Re-enqueue cooldown per symbol, in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,

    /// Number of candidate-processing workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            file: default_screener_file(),
            poll_interval_secs: default_poll_interval_secs(),
            queue_capacity: default_queue_capacity(),
            cooldown_secs: default_cooldown_secs(),
            workers: default_workers(),
        }
    }
}

/// Market-data source endpoints and deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// Primary quote/bars HTTP API base URL. Empty disables the source.
    #[serde(default)]
    pub primary_url: String,

    /// Fallback HTTP API base URL. Empty disables the source.
    #[serde(default)]
    pub fallback_url: String,

    /// Directory of local daily-bar files. Empty disables the source.
    #[serde(default)]
    pub bars_dir: String,

    /// Per-call deadline for fetches, in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            primary_url: String::new(),
            fallback_url: String::new(),
            bars_dir: String::new(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

// =============================================================================
// Top-level config
// =============================================================================

/// Complete engine configuration, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub validator: ValidatorConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub engines: EnginesConfig,

    #[serde(default)]
    pub screener: ScreenerConfig,

    #[serde(default)]
    pub market_data: MarketDataConfig,

    /// Seconds between monitor ticks.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Path of the SQLite ledger file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            routing: RoutingConfig::default(),
            validator: ValidatorConfig::default(),
            execution: ExecutionConfig::default(),
            engines: EnginesConfig::default(),
            screener: ScreenerConfig::default(),
            market_data: MarketDataConfig::default(),
            monitor_interval_secs: default_monitor_interval_secs(),
            db_path: default_db_path(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    ///
    /// A missing file is reported as an error so the caller can fall back to
    /// defaults; a file that exists but fails to parse or validate is fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::ConfigInvalid(format!("{}: {e}", path.display())))?;

        config.validate()?;

        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Sanity-check ranges and orderings. Violations are `ConfigInvalid`.
    pub fn validate(&self) -> Result<()> {
        fn fraction(name: &str, v: f64) -> Result<()> {
            if !(v > 0.0 && v <= 1.0) {
                return Err(Error::ConfigInvalid(format!(
                    "{name} must be in (0, 1], got {v}"
                )));
            }
            Ok(())
        }

        if self.routing.penny_threshold <= 0.0 {
            return Err(Error::ConfigInvalid(
                "routing.penny_threshold must be positive".into(),
            ));
        }
        if self.routing.mid_cap_threshold >= self.routing.large_cap_threshold {
            return Err(Error::ConfigInvalid(
                "routing.mid_cap_threshold must be below large_cap_threshold".into(),
            ));
        }
        fraction("routing.min_stop_buffer", self.routing.min_stop_buffer)?;

        fraction("execution.max_strategy_allocation", self.execution.max_strategy_allocation)?;
        fraction("execution.daily_loss_limit", self.execution.daily_loss_limit)?;
        fraction("execution.forced_exit_drawdown", self.execution.forced_exit_drawdown)?;
        if self.execution.starting_cash <= 0.0 {
            return Err(Error::ConfigInvalid(
                "execution.starting_cash must be positive".into(),
            ));
        }
        if self.execution.max_positions == 0 {
            return Err(Error::ConfigInvalid(
                "execution.max_positions must be nonzero".into(),
            ));
        }

        fraction("engines.rsi.position_size", self.engines.rsi.position_size)?;
        fraction("engines.momentum.position_size", self.engines.momentum.position_size)?;
        fraction("engines.bollinger.position_size", self.engines.bollinger.position_size)?;
        if self.engines.momentum.fast_period >= self.engines.momentum.slow_period {
            return Err(Error::ConfigInvalid(
                "engines.momentum.fast_period must be below slow_period".into(),
            ));
        }
        if self.engines.rsi.oversold >= self.engines.rsi.overbought {
            return Err(Error::ConfigInvalid(
                "engines.rsi.oversold must be below overbought".into(),
            ));
        }

        if self.monitor_interval_secs == 0 {
            return Err(Error::ConfigInvalid(
                "monitor_interval_secs must be nonzero".into(),
            ));
        }
        if self.screener.poll_interval_secs == 0 {
            return Err(Error::ConfigInvalid(
                "screener.poll_interval_secs must be nonzero".into(),
            ));
        }
        if self.screener.workers == 0 || self.screener.queue_capacity == 0 {
            return Err(Error::ConfigInvalid(
                "screener.workers and queue_capacity must be nonzero".into(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_and_thresholds() {
        let cfg = Config::default();
        assert!((cfg.routing.penny_threshold - 5.0).abs() < f64::EPSILON);
        assert!((cfg.routing.high_vol_threshold - 0.30).abs() < f64::EPSILON);
        assert!((cfg.routing.large_cap_threshold - 100e9).abs() < 1.0);
        assert!((cfg.routing.min_stop_buffer - 0.05).abs() < f64::EPSILON);
        assert_eq!(cfg.routing.etf_symbols, vec!["SPY", "QQQ", "IWM", "DIA"]);
        assert_eq!(cfg.validator.min_confidence, ConfidenceLevel::Medium);
        assert_eq!(cfg.validator.max_data_age_hours, 24);
        assert_eq!(cfg.execution.max_positions, 10);
        assert_eq!(cfg.execution.max_daily_trades, 20);
        assert!((cfg.execution.max_strategy_allocation - 0.50).abs() < f64::EPSILON);
        assert!((cfg.execution.daily_loss_limit - 0.05).abs() < f64::EPSILON);
        assert_eq!(cfg.execution.consecutive_loss_limit, 5);
        assert_eq!(cfg.monitor_interval_secs, 60);
        assert_eq!(cfg.screener.poll_interval_secs, 300);
        assert_eq!(cfg.screener.workers, 4);
    }

    #[test]
    fn default_engine_parameters() {
        let cfg = Config::default();
        assert_eq!(cfg.engines.rsi.period, 14);
        assert!((cfg.engines.rsi.oversold - 45.0).abs() < f64::EPSILON);
        assert!((cfg.engines.rsi.overbought - 55.0).abs() < f64::EPSILON);
        assert!((cfg.engines.rsi.position_size - 0.25).abs() < f64::EPSILON);
        assert!((cfg.engines.rsi.profit_target - 0.025).abs() < f64::EPSILON);
        assert_eq!(cfg.engines.rsi.max_hold_days, 12);

        assert_eq!(cfg.engines.momentum.breakout_period, 20);
        assert!((cfg.engines.momentum.stop_loss - 0.08).abs() < f64::EPSILON);
        assert!((cfg.engines.momentum.trailing_stop - 0.10).abs() < f64::EPSILON);
        assert_eq!(cfg.engines.momentum.max_hold_days, 20);

        assert_eq!(cfg.engines.bollinger.period, 20);
        assert!((cfg.engines.bollinger.stop_pct - 0.03).abs() < f64::EPSILON);
        assert!(cfg.engines.bollinger.exit_at_middle);
        assert_eq!(cfg.engines.bollinger.max_hold_days, 15);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.execution.max_positions, 10);
        assert_eq!(cfg.engines.rsi.period, 14);
        cfg.validate().unwrap();
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "execution": { "max_positions": 3 }, "monitor_interval_secs": 5 }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.execution.max_positions, 3);
        assert_eq!(cfg.monitor_interval_secs, 5);
        assert_eq!(cfg.execution.max_daily_trades, 20);
    }

    #[test]
    fn validate_rejects_bad_fraction() {
        let mut cfg = Config::default();
        cfg.execution.max_strategy_allocation = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_ma_periods() {
        let mut cfg = Config::default();
        cfg.engines.momentum.fast_period = 30;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.execution.max_positions, cfg2.execution.max_positions);
        assert_eq!(cfg.routing.etf_symbols, cfg2.routing.etf_symbols);
    }
}
