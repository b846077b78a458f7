// =============================================================================
// Screener Parser — heterogeneous JSON records to canonical Recommendations
// =============================================================================
//
// The upstream pipeline has emitted several shapes over time. The parser
// accepts all of them and nothing downstream ever sees raw JSON:
//
//   - top level: `{ "stocks": [...] }`, `{ "recommendations": [...] }`, or a
//     bare array
//   - symbol under `symbol` or `ticker`
//   - entry band as `"low-high"` / `"$low-$high"` strings (under
//     `entry_price_range`, `entry_range`, or `entry`), a single price, or
//     separate `entry_low` / `entry_high` numbers
//   - target under `target_price` or `target`
//   - stop under `stop_loss`, `stop`, or `Stop_loss`
//   - confidence as a label ("HIGH") or a 1–10 score, under `confidence`,
//     `confidence_score`, or `confidence_level`
//
// Records that are missing required fields or violate the band ordering
// (stop < entry_low <= entry_high < target) are rejected.
// =============================================================================

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::screener::Recommendation;
use crate::types::ConfidenceLevel;

/// Parse a whole screener document. Invalid entries are skipped with a
/// warning; the valid remainder is returned.
///
/// `fallback_issued_at` (usually the file mtime) stamps documents that carry
/// no outer `timestamp`.
pub fn parse_document(raw: &str, fallback_issued_at: DateTime<Utc>) -> Result<Vec<Recommendation>> {
    let doc: Value = serde_json::from_str(raw).context("screener document is not valid JSON")?;

    let issued_at = document_timestamp(&doc).unwrap_or(fallback_issued_at);

    let entries = match &doc {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("stocks")
            .or_else(|| map.get("recommendations"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .ok_or_else(|| anyhow!("document has no stocks/recommendations array"))?,
        _ => bail!("screener document must be an object or an array"),
    };

    let mut recs = Vec::with_capacity(entries.len());
    for entry in entries {
        match parse_record(entry, issued_at) {
            Ok(rec) => recs.push(rec),
            Err(e) => warn!(error = %e, "skipping malformed screener record"),
        }
    }
    Ok(recs)
}

/// Parse one recommendation record.
pub fn parse_record(entry: &Value, issued_at: DateTime<Utc>) -> Result<Recommendation> {
    let symbol = first_str(entry, &["symbol", "ticker"])
        .ok_or_else(|| anyhow!("record has no symbol/ticker"))?
        .trim()
        .to_uppercase();
    if symbol.is_empty() {
        bail!("record has an empty symbol");
    }

    let (entry_low, entry_high) = entry_band(entry)
        .with_context(|| format!("{symbol}: no usable entry range"))?;
    if entry_low > entry_high {
        bail!("{symbol}: entry_low {entry_low} above entry_high {entry_high}");
    }

    let target = first_number(entry, &["target_price", "target"])
        .ok_or_else(|| anyhow!("{symbol}: missing target"))?;
    if target <= entry_high {
        bail!("{symbol}: target {target} not above entry_high {entry_high}");
    }

    let stop = first_number(entry, &["stop_loss", "stop", "Stop_loss"])
        .ok_or_else(|| anyhow!("{symbol}: missing stop"))?;
    if stop >= entry_low {
        bail!("{symbol}: stop {stop} not below entry_low {entry_low}");
    }

    let confidence_level = confidence(entry)
        .ok_or_else(|| anyhow!("{symbol}: missing confidence"))?;

    Ok(Recommendation {
        symbol,
        entry_low,
        entry_high,
        target,
        stop,
        confidence_level,
        issued_at,
    })
}

// ---------------------------------------------------------------------------
// Field extraction helpers
// ---------------------------------------------------------------------------

/// Outer issuance timestamp: RFC 3339 string or UNIX epoch seconds.
fn document_timestamp(doc: &Value) -> Option<DateTime<Utc>> {
    let ts = doc.get("timestamp")?;
    match ts {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => {
            let secs = n.as_i64()?;
            DateTime::from_timestamp(secs, 0)
        }
        _ => None,
    }
}

fn first_str<'a>(entry: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| entry.get(k)?.as_str())
}

/// Accepts numbers or numeric strings (with optional currency prefix).
fn first_number(entry: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| value_as_price(entry.get(k)?))
}

fn value_as_price(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

fn parse_price(s: &str) -> Option<f64> {
    s.trim().trim_start_matches('$').trim().parse().ok()
}

/// Entry band: range string, single price, or separate low/high fields.
fn entry_band(entry: &Value) -> Option<(f64, f64)> {
    // Separate numeric fields win when both are present.
    if let (Some(low), Some(high)) = (
        first_number(entry, &["entry_low"]),
        first_number(entry, &["entry_high"]),
    ) {
        return Some((low, high));
    }

    let raw = entry
        .get("entry_price_range")
        .or_else(|| entry.get("entry_range"))
        .or_else(|| entry.get("entry"))?;

    match raw {
        Value::Number(n) => {
            let p = n.as_f64()?;
            Some((p, p))
        }
        Value::String(s) => parse_range(s),
        _ => None,
    }
}

/// `"2.00-2.05"`, `"$2.00-$2.05"`, or a bare price.
fn parse_range(s: &str) -> Option<(f64, f64)> {
    let s = s.trim();
    // Split on the dash between the two prices, tolerating currency prefixes.
    if let Some((left, right)) = s.split_once('-') {
        let low = parse_price(left)?;
        let high = parse_price(right)?;
        Some((low, high))
    } else {
        let p = parse_price(s)?;
        Some((p, p))
    }
}

/// Confidence: categorical label or 1–10 numeric score.
fn confidence(entry: &Value) -> Option<ConfidenceLevel> {
    let raw = entry
        .get("confidence")
        .or_else(|| entry.get("confidence_score"))
        .or_else(|| entry.get("confidence_level"))?;

    match raw {
        Value::String(s) => {
            // Numeric strings ("8") still map through the score scale.
            if let Ok(score) = s.trim().parse::<f64>() {
                Some(ConfidenceLevel::from_score(score))
            } else {
                Some(ConfidenceLevel::from_label(s))
            }
        }
        Value::Number(n) => Some(ConfidenceLevel::from_score(n.as_f64()?)),
        _ => None,
    }
}
