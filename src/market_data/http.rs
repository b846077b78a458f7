// =============================================================================
// HTTP bar/quote source
// =============================================================================
//
// Fetches daily bars and the current quote from a JSON HTTP API:
//
//   GET {base_url}/bars/{SYMBOL}
//   {
//     "closes":  [543.2, 544.8, ...],
//     "volumes": [61234000, 59871000, ...],
//     "price":   545.0,
//     "volume":  64100000
//   }
//
// `price`/`volume` are optional; when absent the last bar stands in for the
// current quote. The same adapter serves as both the primary and the
// fallback source (different base URLs).
// =============================================================================

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::market_data::{MarketDataSource, MarketSnapshot};

/// Wire format of the bars endpoint.
#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    closes: Vec<f64>,
    #[serde(default)]
    volumes: Vec<f64>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

/// HTTP source with a per-call deadline.
pub struct HttpSource {
    base_url: String,
    tag: &'static str,
    client: reqwest::Client,
}

impl HttpSource {
    /// Build a source against `base_url`; `tag` distinguishes primary from
    /// fallback in logs and snapshots.
    pub fn new(base_url: impl Into<String>, tag: &'static str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            tag,
            client,
        }
    }
}

#[async_trait]
impl MarketDataSource for HttpSource {
    async fn fetch(&self, symbol: &str) -> Result<MarketSnapshot> {
        let url = format!("{}/bars/{}", self.base_url.trim_end_matches('/'), symbol);
        debug!(symbol, url = %url, source = self.tag, "fetching bars");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))
            .map_err(|e| Error::DataUnavailable {
                symbol: symbol.to_string(),
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(Error::DataUnavailable {
                symbol: symbol.to_string(),
                detail: format!("{} returned HTTP {}", self.tag, resp.status()),
            });
        }

        let body: BarsResponse = resp.json().await.map_err(|e| Error::DataUnavailable {
            symbol: symbol.to_string(),
            detail: format!("bad bars payload: {e}"),
        })?;

        let current_price = body
            .price
            .or_else(|| body.closes.last().copied())
            .unwrap_or(0.0);
        let current_volume = body
            .volume
            .or_else(|| body.volumes.last().copied())
            .unwrap_or(0.0);

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            closes: body.closes,
            volumes: body.volumes,
            current_price,
            current_volume,
            source: self.tag.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        self.tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bars_response_tolerates_missing_quote() {
        let body: BarsResponse =
            serde_json::from_str(r#"{"closes":[1.0,2.0],"volumes":[10.0,20.0]}"#).unwrap();
        assert_eq!(body.closes.len(), 2);
        assert!(body.price.is_none());
        assert!(body.volume.is_none());
    }

    #[test]
    fn bars_response_full() {
        let body: BarsResponse = serde_json::from_str(
            r#"{"closes":[1.0],"volumes":[10.0],"price":1.5,"volume":99.0}"#,
        )
        .unwrap();
        assert_eq!(body.price, Some(1.5));
        assert_eq!(body.volume, Some(99.0));
    }
}
