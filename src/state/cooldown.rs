//! Per-sender reply spacing.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use crate::state::reaper::Evict;
use crate::state::ttl::{ExpiringMap, to_delta};

/// Last reply time per lower-cased sender address.
pub struct SenderCooldown {
    window: TimeDelta,
    entries: Mutex<ExpiringMap<DateTime<Utc>>>,
}

impl SenderCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window: to_delta(window),
            entries: Mutex::new(ExpiringMap::new()),
        }
    }

    /// Whether a reply to `sender` at `now` would be too soon.
    pub async fn is_cooling(&self, sender: &str, now: DateTime<Utc>) -> bool {
        self.entries.lock().await.contains(&sender.to_lowercase(), now)
    }

    /// Time left before `sender` may be replied to again.
    pub async fn remaining(&self, sender: &str, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.entries
            .lock()
            .await
            .expires_at(&sender.to_lowercase(), now)
            .map(|at| at - now)
    }

    /// Record a reply sent to `sender` at `now`.
    pub async fn record(&self, sender: &str, now: DateTime<Utc>) {
        self.entries
            .lock()
            .await
            .insert(sender.to_lowercase(), now, now + self.window);
    }
}

#[async_trait]
impl Evict for SenderCooldown {
    fn name(&self) -> &'static str {
        "cooldown"
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        self.entries.lock().await.evict_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cooling_until_window_elapses() {
        let cooldown = SenderCooldown::new(Duration::from_secs(3600));
        let now = Utc::now();
        assert!(!cooldown.is_cooling("a@x.com", now).await);

        cooldown.record("a@x.com", now).await;
        assert!(cooldown.is_cooling("a@x.com", now + TimeDelta::minutes(59)).await);
        assert!(!cooldown.is_cooling("a@x.com", now + TimeDelta::minutes(60)).await);
    }

    #[tokio::test]
    async fn sender_match_is_case_insensitive() {
        let cooldown = SenderCooldown::new(Duration::from_secs(60));
        let now = Utc::now();
        cooldown.record("Alice@Example.com", now).await;
        assert!(cooldown.is_cooling("alice@example.com", now).await);
        assert!(cooldown.remaining("ALICE@example.com", now).await.is_some());
    }

    #[tokio::test]
    async fn remaining_counts_down() {
        let cooldown = SenderCooldown::new(Duration::from_secs(600));
        let now = Utc::now();
        cooldown.record("a@x.com", now).await;
        let left = cooldown
            .remaining("a@x.com", now + TimeDelta::minutes(4))
            .await
            .unwrap();
        assert_eq!(left, TimeDelta::minutes(6));
        assert!(cooldown.remaining("b@x.com", now).await.is_none());
    }
}
