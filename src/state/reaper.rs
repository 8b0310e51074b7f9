//! Background eviction of expired TTL entries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A store whose expired entries can be dropped.
#[async_trait]
pub trait Evict: Send + Sync {
    fn name(&self) -> &'static str;

    /// Remove entries expired at `now`; returns the number removed.
    async fn evict_expired(&self, now: DateTime<Utc>) -> usize;
}

/// One eviction pass over every store.
pub async fn reap_once(stores: &[Arc<dyn Evict>], now: DateTime<Utc>) -> usize {
    let mut total = 0;
    for store in stores {
        let removed = store.evict_expired(now).await;
        if removed > 0 {
            debug!(store = store.name(), removed, "Evicted expired entries");
        }
        total += removed;
    }
    total
}

/// Spawn the reaper on its own timer, independent of the poll loop.
///
/// Returns a `JoinHandle` and a shutdown sender. Send `true` (or drop the
/// sender) to stop reaping.
pub fn spawn_reaper(
    stores: Vec<Arc<dyn Evict>>,
    every: Duration,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(interval_secs = every.as_secs(), "TTL reaper started");
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown_rx.changed() => {}
            }
            if *shutdown_rx.borrow() || shutdown_rx.has_changed().is_err() {
                info!("TTL reaper shutting down");
                return;
            }

            reap_once(&stores, Utc::now()).await;
        }
    });

    (handle, shutdown_tx)
}
