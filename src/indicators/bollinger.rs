// =============================================================================
// Bollinger Bands
// =============================================================================
//
// The middle band is the mean of the trailing window; the outer bands sit
// `num_std` population standard deviations to either side. Shares the mean
// and stdev helpers with the volatility code.

use crate::indicators::{mean, population_stdev};

/// Result of a Bollinger Band calculation.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bands over the trailing `period` closes, or `None` when the window does
/// not fill or the center is degenerate (zero or non-finite).
pub fn bollinger_bands(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerBands> {
    if period == 0 {
        return None;
    }
    let start = closes.len().checked_sub(period)?;
    let tail = &closes[start..];

    let center = mean(tail);
    if center == 0.0 || !center.is_finite() {
        return None;
    }

    let band = num_std * population_stdev(tail, center);
    if !band.is_finite() {
        return None;
    }

    Some(BollingerBands {
        upper: center + band,
        middle: center,
        lower: center - band,
    })
}
