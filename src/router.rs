// =============================================================================
// Strategy Router — maps a stock profile to a trading strategy
// =============================================================================
//
// Scoring is rule-table driven. For each strategy the first matching rule in
// table order sets its raw score and rationale:
//
//   ETF                                   -> rsi_mean_reversion   0.95
//   penny stock                           -> momentum_breakout    0.90
//   annualized volatility > threshold     -> momentum_breakout    0.85
//   stable large cap (vol < 0.25)         -> rsi_mean_reversion   0.85
//   configured momentum sector            -> momentum_breakout    0.80
//   nothing matched                       -> rsi_mean_reversion   0.50
//
// The raw score is then multiplied by the tracker's feedback multiplier and
// capped at 1.0; a multiplier below the drop threshold removes the strategy
// from selection entirely (the tracker returns a 0.0 sentinel for disabled
// strategies). The winner is the argmax; the rest become alternatives. The
// decision is persisted through the tracker before it is returned.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::classifier::StockProfile;
use crate::config::RoutingConfig;
use crate::error::Result;
use crate::tracker::PerformanceTracker;
use crate::types::{Classification, RoutingDecision, ScoredStrategy, StrategyKind};

/// Volatility below which a large cap is considered stable.
const STABLE_LARGE_CAP_VOL: f64 = 0.25;
/// Feedback multipliers below this drop the strategy from selection.
const DROP_THRESHOLD: f64 = 0.30;

pub struct StrategyRouter {
    routing: RoutingConfig,
    tracker: Arc<PerformanceTracker>,
}

impl StrategyRouter {
    pub fn new(routing: RoutingConfig, tracker: Arc<PerformanceTracker>) -> Self {
        Self { routing, tracker }
    }

    /// Route `profile` to a strategy. Deterministic given the profile and
    /// the tracker's current aggregates; the decision is logged before it
    /// is returned.
    pub fn route(&self, profile: &StockProfile) -> Result<RoutingDecision> {
        let scored = self.raw_scores(profile);

        // Apply feedback and drop disabled strategies.
        let mut adjusted: Vec<(StrategyKind, f64, &'static str)> = Vec::new();
        for (kind, raw, rationale) in &scored {
            let multiplier = self
                .tracker
                .adjusted_confidence(*kind, profile.classification)?;
            if multiplier < DROP_THRESHOLD {
                debug!(
                    symbol = %profile.symbol,
                    strategy = kind.key(),
                    "strategy dropped from selection (disabled by feedback)"
                );
                continue;
            }
            adjusted.push((*kind, (raw * multiplier).min(1.0), rationale));
        }

        let (strategy, confidence, rationale) = adjusted
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .copied()
            .unwrap_or((StrategyKind::RsiMeanReversion, 0.0, "no eligible strategy"));

        let mut alternatives: Vec<ScoredStrategy> = adjusted
            .iter()
            .filter(|(kind, _, _)| *kind != strategy)
            .map(|(kind, score, _)| ScoredStrategy {
                strategy: *kind,
                score: *score,
            })
            .collect();
        alternatives.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let decision = RoutingDecision {
            decision_id: Uuid::new_v4().to_string(),
            symbol: profile.symbol.clone(),
            strategy,
            classification: profile.classification,
            confidence,
            reason: format!("{rationale} ({})", profile.classification),
            alternatives,
            issued_at: Utc::now(),
        };

        info!(
            symbol = %decision.symbol,
            strategy = decision.strategy.key(),
            confidence = format!("{:.2}", decision.confidence),
            reason = %decision.reason,
            "routing decision"
        );

        self.tracker.log_routing(&decision)?;
        Ok(decision)
    }

    /// Raw rule-table scores: for each strategy, the first matching rule in
    /// table order wins. Always yields at least the default row.
    fn raw_scores(&self, profile: &StockProfile) -> Vec<(StrategyKind, f64, &'static str)> {
        let mut scores: Vec<(StrategyKind, f64, &'static str)> = Vec::new();
        fn add(
            scores: &mut Vec<(StrategyKind, f64, &'static str)>,
            kind: StrategyKind,
            score: f64,
            rationale: &'static str,
        ) {
            if !scores.iter().any(|(k, _, _)| *k == kind) {
                scores.push((kind, score, rationale));
            }
        }

        if profile.is_etf {
            add(&mut scores, StrategyKind::RsiMeanReversion, 0.95, "ETF mean reversion");
        }
        if profile.classification == Classification::PennyStock {
            add(&mut scores, StrategyKind::MomentumBreakout, 0.90, "penny stock momentum");
        }
        if profile.volatility_annualized > self.routing.high_vol_threshold {
            add(&mut scores, StrategyKind::MomentumBreakout, 0.85, "high volatility");
        }
        if profile.classification == Classification::LargeCap
            && profile.volatility_annualized < STABLE_LARGE_CAP_VOL
        {
            add(&mut scores, StrategyKind::RsiMeanReversion, 0.85, "stable large cap");
        }
        if self
            .routing
            .momentum_sectors
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&profile.sector))
        {
            add(&mut scores, StrategyKind::MomentumBreakout, 0.80, "momentum sector");
        }

        if scores.is_empty() {
            add(
                &mut scores,
                StrategyKind::RsiMeanReversion,
                0.50,
                "default mean reversion",
            );
        }
        scores
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;

    fn router() -> StrategyRouter {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.seed_account(100_000.0).unwrap();
        let tracker = Arc::new(PerformanceTracker::new(ledger, 0.30, 20));
        StrategyRouter::new(RoutingConfig::default(), tracker)
    }

    fn profile(
        symbol: &str,
        price: f64,
        vol: f64,
        classification: Classification,
        is_etf: bool,
        sector: &str,
    ) -> StockProfile {
        StockProfile {
            symbol: symbol.into(),
            price,
            volatility_annualized: vol,
            market_cap: 0.0,
            sector: sector.into(),
            is_etf,
            avg_volume: 1e6,
            classification,
            warning: None,
        }
    }

    #[test]
    fn etf_routes_to_rsi_mean_reversion() {
        let r = router();
        let p = profile("SPY", 545.0, 0.12, Classification::Etf, true, "UNKNOWN");
        let d = r.route(&p).unwrap();
        assert_eq!(d.strategy, StrategyKind::RsiMeanReversion);
        assert!((d.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn volatile_penny_stock_routes_to_momentum() {
        let r = router();
        let p = profile("ABTC", 1.91, 0.45, Classification::PennyStock, false, "UNKNOWN");
        let d = r.route(&p).unwrap();
        assert_eq!(d.strategy, StrategyKind::MomentumBreakout);
        // The penny-stock rule is the first match; the volatility rule does
        // not stack on top of it.
        assert!((d.confidence - 0.90).abs() < 1e-9);
    }

    #[test]
    fn stable_large_cap_prefers_rsi() {
        let r = router();
        let p = profile("KO", 60.0, 0.15, Classification::LargeCap, false, "staples");
        let d = r.route(&p).unwrap();
        assert_eq!(d.strategy, StrategyKind::RsiMeanReversion);
        assert!((d.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn momentum_sector_beats_default() {
        let r = router();
        let p = profile(
            "NVDA",
            120.0,
            0.22,
            Classification::Unknown,
            false,
            "semiconductors",
        );
        let d = r.route(&p).unwrap();
        assert_eq!(d.strategy, StrategyKind::MomentumBreakout);
        assert!((d.confidence - 0.80).abs() < 1e-9);
    }

    #[test]
    fn unremarkable_profile_falls_back_to_rsi() {
        let r = router();
        let p = profile("XYZ", 25.0, 0.18, Classification::Unknown, false, "UNKNOWN");
        let d = r.route(&p).unwrap();
        assert_eq!(d.strategy, StrategyKind::RsiMeanReversion);
        assert!((d.confidence - 0.50).abs() < 1e-9);
    }

    #[test]
    fn routing_is_deterministic() {
        let r = router();
        let p = profile("SPY", 545.0, 0.12, Classification::Etf, true, "UNKNOWN");
        let d1 = r.route(&p).unwrap();
        let d2 = r.route(&p).unwrap();
        assert_eq!(d1.strategy, d2.strategy);
        assert!((d1.confidence - d2.confidence).abs() < 1e-12);
        assert_eq!(d1.reason, d2.reason);
        // Distinct decision ids: every call is persisted separately.
        assert_ne!(d1.decision_id, d2.decision_id);
    }

    #[test]
    fn alternatives_are_sorted_and_exclude_winner() {
        let r = router();
        // ETF with high volatility: rsi 0.95 wins, momentum 0.85 is the
        // alternative.
        let p = profile("SPY", 545.0, 0.40, Classification::Etf, true, "UNKNOWN");
        let d = r.route(&p).unwrap();
        assert_eq!(d.strategy, StrategyKind::RsiMeanReversion);
        assert_eq!(d.alternatives.len(), 1);
        assert_eq!(d.alternatives[0].strategy, StrategyKind::MomentumBreakout);
        assert!((d.alternatives[0].score - 0.85).abs() < 1e-9);
    }

    #[test]
    fn every_route_is_logged() {
        let r = router();
        let p = profile("SPY", 545.0, 0.12, Classification::Etf, true, "UNKNOWN");
        r.route(&p).unwrap();
        r.route(&p).unwrap();
        assert_eq!(r.tracker.decision_count(), 2);
    }
}
