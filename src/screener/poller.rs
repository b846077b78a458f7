// =============================================================================
// Screener Poller — periodic re-read of the screener document
// =============================================================================
//
// Runs as a background task: every `poll_interval` it re-reads the screener
// file, absorbs parsed recommendations into the store, and enqueues each
// symbol as a candidate (the queue coalesces repeats within the cooldown).
// A missing or malformed file is a warning, never fatal; the next poll may
// succeed.
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScreenerConfig;
use crate::screener::{parser, CandidateQueue, RecommendationStore};

/// Run the poller until cancellation. Spawned once at startup.
pub async fn run_screener_poller(
    config: ScreenerConfig,
    store: Arc<RecommendationStore>,
    queue: Arc<CandidateQueue>,
    shutdown: CancellationToken,
) {
    info!(
        file = %config.file,
        poll_interval_secs = config.poll_interval_secs,
        "screener poller started"
    );

    let mut ticker = interval(Duration::from_secs(config.poll_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("screener poller stopping");
                return;
            }
            _ = ticker.tick() => {
                poll_once(&config.file, &store, &queue).await;
            }
        }
    }
}

/// One poll: read, parse, absorb, enqueue.
pub async fn poll_once(
    path: impl AsRef<Path>,
    store: &RecommendationStore,
    queue: &CandidateQueue,
) {
    let path = path.as_ref().to_path_buf();

    let read = tokio::task::spawn_blocking(move || {
        let mtime = file_mtime(&path);
        std::fs::read_to_string(&path).map(|raw| (raw, mtime))
    })
    .await;

    let (raw, mtime) = match read {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            warn!(error = %e, "screener file unreadable, will retry next poll");
            return;
        }
        Err(e) => {
            warn!(error = %e, "screener read task failed");
            return;
        }
    };

    let fallback_issued_at = mtime.unwrap_or_else(Utc::now);

    let recs = match parser::parse_document(&raw, fallback_issued_at) {
        Ok(recs) => recs,
        Err(e) => {
            warn!(error = %e, "screener document malformed, will retry next poll");
            return;
        }
    };

    let now = Utc::now();
    let mut enqueued = 0usize;
    let symbols: Vec<String> = recs.iter().map(|r| r.symbol.clone()).collect();
    store.absorb(recs);

    for symbol in symbols {
        if queue.enqueue(&symbol, now) {
            enqueued += 1;
        }
    }

    debug!(recommendations = store.len(), enqueued, "screener poll complete");
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}
