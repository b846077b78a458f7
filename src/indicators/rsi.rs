// =============================================================================
// Relative Strength Index (RSI), Wilder-smoothed
// =============================================================================
//
// Single pass over the closes. The first `period` price moves build the
// seed averages as a plain mean; every later move folds in with Wilder's
// smoothing factor (period - 1) / period. RSI itself is expressed as
//
//   RSI = 100 * avg_gain / (avg_gain + avg_loss)
//
// which is algebraically the textbook 100 - 100 / (1 + RS) without the
// division-by-zero special case when there are no losses.
// =============================================================================

/// RSI values for `closes`, one per close from index `period` onward.
///
/// # Edge cases
/// - `period == 0` or not enough closes to form `period` moves => empty vec.
/// - A windowless market (no gains and no losses) reads as neutral 50.
/// - A non-finite intermediate truncates the series.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }

    let width = period as f64;
    let carry = (width - 1.0) / width;

    let mut avg_gain = 0.0_f64;
    let mut avg_loss = 0.0_f64;
    let mut out = Vec::with_capacity(closes.len() - period);

    for (i, pair) in closes.windows(2).enumerate() {
        let step = pair[1] - pair[0];
        let (up, down) = if step >= 0.0 { (step, 0.0) } else { (0.0, -step) };

        if i < period {
            // Seed phase: simple average of the first `period` moves.
            avg_gain += up / width;
            avg_loss += down / width;
            if i + 1 < period {
                continue;
            }
        } else {
            avg_gain = avg_gain * carry + up / width;
            avg_loss = avg_loss * carry + down / width;
        }

        let swing = avg_gain + avg_loss;
        let rsi = if swing > 0.0 {
            100.0 * avg_gain / swing
        } else {
            50.0
        };
        if !rsi.is_finite() {
            break;
        }
        out.push(rsi);
    }

    out
}

/// Most recent RSI value, or `None` on insufficient data.
pub fn latest_rsi(closes: &[f64], period: usize) -> Option<f64> {
    rsi_series(closes, period).last().copied()
}
