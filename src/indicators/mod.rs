// =============================================================================
// Technical indicators used by the strategy engines and the classifier
// =============================================================================

pub mod bollinger;
pub mod rsi;

/// Arithmetic mean; 0.0 for an empty slice.
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation around a precomputed `center`.
pub(crate) fn population_stdev(values: &[f64], center: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - center) * (v - center)).sum();
    (sum_sq / values.len() as f64).sqrt()
}

/// Simple moving average of the trailing `period` values.
///
/// Returns `None` when fewer than `period` values are available or `period`
/// is zero.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 {
        return None;
    }
    let start = values.len().checked_sub(period)?;
    Some(mean(&values[start..]))
}

/// Annualized volatility from daily closes: the standard deviation of daily
/// log returns times √252.
///
/// Uses up to the trailing `max_window` closes. Returns 0.0 when fewer than
/// `min_returns` daily returns can be formed, or when any close is
/// non-positive (log return undefined).
pub fn annualized_volatility(closes: &[f64], max_window: usize, min_returns: usize) -> f64 {
    let window = if closes.len() > max_window {
        &closes[closes.len() - max_window..]
    } else {
        closes
    };

    if window.len() < min_returns + 1 || window.iter().any(|&c| c <= 0.0) {
        return 0.0;
    }

    let returns: Vec<f64> = window.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    let daily = population_stdev(&returns, mean(&returns));

    let vol = daily * (252.0_f64).sqrt();
    if vol.is_finite() {
        vol
    } else {
        0.0
    }
}
