//! In-memory, TTL-bounded worker state.
//!
//! Each store sits behind its own `tokio::sync::Mutex` and is shared by
//! `Arc` between the poll loop and the reaper.

pub mod cooldown;
pub mod dedup;
pub mod rate_limit;
pub mod reaper;
pub mod ttl;

use std::sync::Arc;

use crate::config::WorkerConfig;

pub use cooldown::SenderCooldown;
pub use dedup::DedupCache;
pub use rate_limit::{RateLimitWindow, RateLimiter};
pub use reaper::{Evict, reap_once, spawn_reaper};

/// The three TTL stores used by the gate pipeline.
#[derive(Clone)]
pub struct WorkerState {
    pub dedup: Arc<DedupCache>,
    pub cooldown: Arc<SenderCooldown>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl WorkerState {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            dedup: Arc::new(DedupCache::new(config.dedup_ttl)),
            cooldown: Arc::new(SenderCooldown::new(config.sender_cooldown)),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_window)),
        }
    }

    /// Stores to hand to [`spawn_reaper`].
    pub fn evictors(&self) -> Vec<Arc<dyn Evict>> {
        vec![
            self.dedup.clone(),
            self.cooldown.clone(),
            self.rate_limiter.clone(),
        ]
    }
}
