//! Per-user reply rate limiting.
//!
//! Fixed windows: the first counted send opens a window that closes
//! `window` later. The count resets only once `now` is past `reset_at`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::state::reaper::Evict;
use crate::state::ttl::to_delta;

/// Sends counted in the current window for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitWindow {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitWindow {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.reset_at
    }
}

pub struct RateLimiter {
    window: TimeDelta,
    windows: Mutex<HashMap<String, RateLimitWindow>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window: to_delta(window),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Whether one more send fits under `max` at `now`. Never mutates.
    pub async fn check(&self, user: &str, max: u32, now: DateTime<Utc>) -> bool {
        match self.windows.lock().await.get(user) {
            Some(w) if !w.is_expired(now) => w.count < max,
            _ => max > 0,
        }
    }

    /// Count a successful send. Opens a fresh window if none is live.
    pub async fn increment(&self, user: &str, now: DateTime<Utc>) -> RateLimitWindow {
        let mut windows = self.windows.lock().await;
        let window = windows
            .entry(user.to_string())
            .and_modify(|w| {
                if w.is_expired(now) {
                    *w = RateLimitWindow {
                        count: 0,
                        reset_at: now + self.window,
                    };
                }
            })
            .or_insert(RateLimitWindow {
                count: 0,
                reset_at: now + self.window,
            });
        window.count = window.count.saturating_add(1);
        *window
    }

    /// Live window for `user`, if any.
    pub async fn snapshot(&self, user: &str, now: DateTime<Utc>) -> Option<RateLimitWindow> {
        self.windows
            .lock()
            .await
            .get(user)
            .filter(|w| !w.is_expired(now))
            .copied()
    }
}

#[async_trait]
impl Evict for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, w| !w.is_expired(now));
        before - windows.len()
    }
}
