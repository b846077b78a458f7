// =============================================================================
// Shared types used across the Meridian paper-trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Action requested by a strategy engine for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Categorical confidence attached to a screener recommendation.
///
/// Ordering is `Low < Medium < High`, so the validator's floor check is a
/// plain comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    /// Map a 1–10 numeric screener score onto the categorical scale:
    /// >= 8 is HIGH, 5–7 is MEDIUM, everything else LOW.
    pub fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            Self::High
        } else if score >= 5.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Parse a textual label, case-insensitively. Unknown labels map to LOW.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Self::High,
            "MEDIUM" | "MED" => Self::Medium,
            _ => Self::Low,
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// Stock-tier label derived by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    PennyStock,
    SmallCap,
    MidCap,
    LargeCap,
    Etf,
    Unknown,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PennyStock => "penny_stock",
            Self::SmallCap => "small_cap",
            Self::MidCap => "mid_cap",
            Self::LargeCap => "large_cap",
            Self::Etf => "etf",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "penny_stock" => Self::PennyStock,
            "small_cap" => Self::SmallCap,
            "mid_cap" => Self::MidCap,
            "large_cap" => Self::LargeCap,
            "etf" => Self::Etf,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static reference facts for a symbol (market cap, sector), supplied via
/// configuration when known. Fundamentals are not available from the quote
/// sources in scope, so absence degrades classification, never errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolFacts {
    /// Market capitalization in dollars; 0 means unknown.
    #[serde(default)]
    pub market_cap: f64,
    /// Sector label; `None` means unknown.
    #[serde(default)]
    pub sector: Option<String>,
}

/// The trading strategies the router can select between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RsiMeanReversion,
    MomentumBreakout,
    BollingerMeanReversion,
}

impl StrategyKind {
    /// All known strategies, in router scoring order.
    pub const ALL: [StrategyKind; 3] = [
        Self::RsiMeanReversion,
        Self::MomentumBreakout,
        Self::BollingerMeanReversion,
    ];

    /// Stable key used in config, the ledger, and routing decisions.
    pub fn key(&self) -> &'static str {
        match self {
            Self::RsiMeanReversion => "rsi_mean_reversion",
            Self::MomentumBreakout => "momentum_breakout",
            Self::BollingerMeanReversion => "bollinger_mean_reversion",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "rsi_mean_reversion" => Some(Self::RsiMeanReversion),
            "momentum_breakout" => Some(Self::MomentumBreakout),
            "bollinger_mean_reversion" => Some(Self::BollingerMeanReversion),
            _ => None,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// One strategy with its routing score, used for decision alternatives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoredStrategy {
    pub strategy: StrategyKind,
    pub score: f64,
}

/// Persisted record of one router call.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub decision_id: String,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub classification: Classification,
    /// Final confidence in [0, 1] after feedback modulation.
    pub confidence: f64,
    pub reason: String,
    /// Non-selected strategies, sorted by descending score.
    pub alternatives: Vec<ScoredStrategy>,
    pub issued_at: chrono::DateTime<chrono::Utc>,
}
