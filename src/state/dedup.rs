//! Processed-message cache.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use crate::state::reaper::Evict;
use crate::state::ttl::{ExpiringMap, to_delta};

/// Message ids admitted into the pipeline within the last TTL.
///
/// An id is marked the moment it is admitted, whatever the later outcome.
pub struct DedupCache {
    ttl: TimeDelta,
    entries: Mutex<ExpiringMap<DateTime<Utc>>>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: to_delta(ttl),
            entries: Mutex::new(ExpiringMap::new()),
        }
    }

    /// Mark `id` as processed. Returns `false` if it already was within the TTL.
    pub async fn check_and_mark(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.contains(id, now) {
            return false;
        }
        entries.insert(id, now, now + self.ttl);
        true
    }

    /// When `id` was admitted, if still inside the TTL.
    pub async fn processed_at(&self, id: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.entries.lock().await.get(id, now).copied()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl Evict for DedupCache {
    fn name(&self) -> &'static str {
        "dedup"
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        self.entries.lock().await.evict_expired(now)
    }
}
