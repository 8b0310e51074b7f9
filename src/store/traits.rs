//! Persistence traits and the records they carry.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AutoReplyConfig;
use crate::error::StoreError;

/// Reply records kept before the oldest are dropped.
pub const MAX_REPLY_RECORDS: usize = 1000;

/// Per-user auto-reply settings.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, user_email: &str) -> Result<Option<AutoReplyConfig>, StoreError>;

    /// Create or replace the config for `user_email`.
    async fn put(&self, user_email: &str, config: &AutoReplyConfig) -> Result<(), StoreError>;
}

/// One sent auto-reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoReplyRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_email: String,
    pub recipient: String,
    pub subject: String,
}

impl AutoReplyRecord {
    pub fn new(
        user_email: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            user_email: user_email.into(),
            recipient: recipient.into(),
            subject: subject.into(),
        }
    }
}

/// Reply counts per time bucket (UTC day boundaries).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyStats {
    pub today: u64,
    pub yesterday: u64,
    pub this_week: u64,
    pub this_month: u64,
    pub total: u64,
}

/// Bucket boundaries derived from `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsWindow {
    pub today_start: DateTime<Utc>,
    pub yesterday_start: DateTime<Utc>,
    pub week_start: DateTime<Utc>,
    pub month_start: DateTime<Utc>,
}

impl StatsWindow {
    pub fn at(now: DateTime<Utc>) -> Self {
        let today_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(now);
        Self {
            today_start,
            yesterday_start: today_start - TimeDelta::days(1),
            week_start: today_start - TimeDelta::days(7),
            month_start: today_start - TimeDelta::days(30),
        }
    }
}

impl ReplyStats {
    /// Count timestamps into buckets.
    pub fn tally<I>(timestamps: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        let window = StatsWindow::at(now);
        let mut stats = Self::default();
        for ts in timestamps {
            stats.total += 1;
            if ts >= window.today_start {
                stats.today += 1;
            } else if ts >= window.yesterday_start {
                stats.yesterday += 1;
            }
            if ts >= window.week_start {
                stats.this_week += 1;
            }
            if ts >= window.month_start {
                stats.this_month += 1;
            }
        }
        stats
    }
}

/// Append-only, FIFO-capped log of sent replies.
#[async_trait]
pub trait ReplyRecordStore: Send + Sync {
    async fn append(&self, record: &AutoReplyRecord) -> Result<(), StoreError>;

    /// Up to `limit` records, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AutoReplyRecord>, StoreError>;

    async fn stats(&self, now: DateTime<Utc>) -> Result<ReplyStats, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn window_uses_utc_midnight() {
        let window = StatsWindow::at(at("2025-03-10T15:30:00Z"));
        assert_eq!(window.today_start, at("2025-03-10T00:00:00Z"));
        assert_eq!(window.yesterday_start, at("2025-03-09T00:00:00Z"));
        assert_eq!(window.week_start, at("2025-03-03T00:00:00Z"));
        assert_eq!(window.month_start, at("2025-02-08T00:00:00Z"));
    }

    #[test]
    fn tally_buckets() {
        let now = at("2025-03-10T15:30:00Z");
        let stats = ReplyStats::tally(
            [
                at("2025-03-10T01:00:00Z"), // today
                at("2025-03-09T23:59:59Z"), // yesterday
                at("2025-03-05T12:00:00Z"), // week
                at("2025-02-20T12:00:00Z"), // month
                at("2024-12-01T00:00:00Z"), // total only
            ],
            now,
        );
        assert_eq!(
            stats,
            ReplyStats {
                today: 1,
                yesterday: 1,
                this_week: 3,
                this_month: 4,
                total: 5,
            }
        );
    }
}
