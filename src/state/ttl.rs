//! Passive TTL map: expired entries read as absent until the reaper drops them.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// String-keyed map whose entries stop being visible at `expires_at`.
#[derive(Debug, Clone)]
pub struct ExpiringMap<V> {
    entries: HashMap<String, Entry<V>>,
}

impl<V> Default for ExpiringMap<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> ExpiringMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live value for `key`, if any.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|e| now < e.expires_at)
            .map(|e| &e.value)
    }

    pub fn contains(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.get(key, now).is_some()
    }

    /// Expiry of the live entry for `key`.
    pub fn expires_at(&self, key: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.entries
            .get(key)
            .map(|e| e.expires_at)
            .filter(|at| now < *at)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V, expires_at: DateTime<Utc>) {
        self.entries.insert(key.into(), Entry { value, expires_at });
    }

    /// Drop every entry expired at `now`. Returns how many were removed.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| now < e.expires_at);
        before - self.entries.len()
    }

    /// Number of stored entries, live or not yet reaped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Convert a configured duration, saturating on overflow.
pub fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
