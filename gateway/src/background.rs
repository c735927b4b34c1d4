//! Background task loops for the gateway.

use crate::cache::CacheManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Keep the disk cache under `max_total_bytes`, checking every `interval`.
///
/// Files still being written are never touched; only complete entries are
/// eligible, oldest modification time first.
pub async fn cache_sweep_loop(cache: Arc<CacheManager>, max_total_bytes: u64, interval: Duration) {
    info!(
        max_total_bytes = max_total_bytes,
        interval_secs = interval.as_secs(),
        "Cache sweeper started"
    );
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match cache.sweep(max_total_bytes).await {
            Ok(report) if report.files_removed > 0 => {
                info!(
                    files_removed = report.files_removed,
                    bytes_removed = report.bytes_removed,
                    bytes_kept = report.bytes_kept,
                    "Cache sweep evicted files"
                );
            }
            Ok(report) => debug!(bytes_kept = report.bytes_kept, "Cache within budget"),
            Err(e) => error!(dir = %cache.dir().display(), error = %e, "Cache sweep failed"),
        }
    }
}
