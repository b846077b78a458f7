// =============================================================================
// Entry Validator — gates a proposed entry against the screener's guidance
// =============================================================================
//
// Four independent checks, each evaluated and reported; any failure fails
// the entry as a whole:
//   1. PriceRange  — current price inside the recommendation's entry band
//   2. StopBuffer  — proposed stop at least `min_stop_buffer` below price
//   3. Confidence  — recommendation confidence at or above the floor
//   4. Freshness   — recommendation younger than the max data age
//
// Two helpers round out the contract: `recommended_stop` shifts a too-tight
// screener stop out to the buffer, and `wait_for_better_entry` distinguishes
// "slightly below the band, defer" from a hard reject.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::ValidatorConfig;
use crate::screener::Recommendation;

/// One named check with its verdict.
#[derive(Debug, Clone, Serialize)]
pub struct EntryCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// Full validation report for one proposed entry.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// First failing check's detail, or "all checks passed".
    pub reason: String,
    pub checks: Vec<EntryCheck>,
}

/// Defer hint produced when price sits just below the entry band.
#[derive(Debug, Clone, Serialize)]
pub struct WaitHint {
    pub reason: String,
    /// The band the price should rise into.
    pub target_range: (f64, f64),
}

/// Validates entries against screener recommendations and risk rules.
pub struct EntryValidator {
    config: ValidatorConfig,
    /// Minimum stop gap as a fraction of price (shared with routing).
    min_stop_buffer: f64,
}

impl EntryValidator {
    pub fn new(config: ValidatorConfig, min_stop_buffer: f64) -> Self {
        Self {
            config,
            min_stop_buffer,
        }
    }

    /// Run all checks for `symbol` at `current_price` with the given
    /// `proposed_stop`.
    pub fn validate(
        &self,
        symbol: &str,
        current_price: f64,
        proposed_stop: f64,
        rec: &Recommendation,
        now: DateTime<Utc>,
    ) -> ValidationReport {
        let mut checks = Vec::with_capacity(4);

        // --- 1. Price range --------------------------------------------------
        let in_band = rec.entry_low <= current_price && current_price <= rec.entry_high;
        checks.push(EntryCheck {
            name: "price_range",
            passed: in_band,
            detail: format!(
                "price {current_price:.2} vs band {:.2}-{:.2}",
                rec.entry_low, rec.entry_high
            ),
        });

        // --- 2. Stop-loss buffer --------------------------------------------
        let buffer = if current_price > 0.0 {
            (current_price - proposed_stop) / current_price
        } else {
            0.0
        };
        // Tolerance keeps a stop at exactly the buffer from flapping on
        // floating-point rounding.
        checks.push(EntryCheck {
            name: "stop_buffer",
            passed: buffer >= self.min_stop_buffer - 1e-9,
            detail: format!(
                "stop gap {:.2}% vs minimum {:.2}%",
                buffer * 100.0,
                self.min_stop_buffer * 100.0
            ),
        });

        // --- 3. Confidence floor --------------------------------------------
        let confident = rec.confidence_level >= self.config.min_confidence;
        checks.push(EntryCheck {
            name: "confidence",
            passed: confident,
            detail: format!(
                "{} vs floor {}",
                rec.confidence_level, self.config.min_confidence
            ),
        });

        // --- 4. Freshness ----------------------------------------------------
        let age = rec.age(now);
        let fresh = age <= Duration::hours(self.config.max_data_age_hours);
        checks.push(EntryCheck {
            name: "freshness",
            passed: fresh,
            detail: format!(
                "age {}h vs limit {}h",
                age.num_hours(),
                self.config.max_data_age_hours
            ),
        });

        let valid = checks.iter().all(|c| c.passed);
        let reason = if valid {
            "all checks passed".to_string()
        } else {
            checks
                .iter()
                .find(|c| !c.passed)
                .map(|c| format!("{}: {}", c.name, c.detail))
                .unwrap_or_default()
        };

        debug!(symbol, valid, reason = %reason, "entry validated");

        ValidationReport {
            valid,
            reason,
            checks,
        }
    }

    /// Safe stop for an entry at `entry_price`: the screener's stop if it
    /// already clears the buffer, otherwise shifted down to exactly the
    /// buffer. Callers can compare against `rec.stop` to see the shift.
    pub fn recommended_stop(&self, entry_price: f64, rec: &Recommendation) -> f64 {
        let buffered = entry_price * (1.0 - self.min_stop_buffer);
        if rec.stop < buffered {
            rec.stop
        } else {
            buffered
        }
    }

    /// When price is below the band by less than the wait tolerance, advise
    /// deferring instead of rejecting outright.
    pub fn wait_for_better_entry(
        &self,
        symbol: &str,
        current_price: f64,
        rec: &Recommendation,
    ) -> Option<WaitHint> {
        if current_price >= rec.entry_low {
            return None;
        }

        let gap = (rec.entry_low - current_price) / rec.entry_low;
        if gap <= self.config.wait_tolerance {
            Some(WaitHint {
                reason: format!(
                    "{symbol} at {current_price:.2} is {:.1}% below the entry band",
                    gap * 100.0
                ),
                target_range: (rec.entry_low, rec.entry_high),
            })
        } else {
            None
        }
    }
}
