//! In-memory store implementations for tests and ephemeral runs.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::config::AutoReplyConfig;
use crate::error::StoreError;
use crate::store::traits::{
    AutoReplyRecord, ConfigStore, MAX_REPLY_RECORDS, ReplyRecordStore, ReplyStats,
};

#[derive(Default)]
pub struct MemoryConfigStore {
    configs: RwLock<HashMap<String, AutoReplyConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, user_email: &str) -> Result<Option<AutoReplyConfig>, StoreError> {
        Ok(self.configs.read().await.get(user_email).cloned())
    }

    async fn put(&self, user_email: &str, config: &AutoReplyConfig) -> Result<(), StoreError> {
        self.configs
            .write()
            .await
            .insert(user_email.to_string(), config.clone());
        Ok(())
    }
}

/// Oldest record at the front.
pub struct MemoryReplyRecordStore {
    records: RwLock<VecDeque<AutoReplyRecord>>,
    capacity: usize,
}

impl MemoryReplyRecordStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_REPLY_RECORDS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for MemoryReplyRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplyRecordStore for MemoryReplyRecordStore {
    async fn append(&self, record: &AutoReplyRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.push_back(record.clone());
        while records.len() > self.capacity {
            records.pop_front();
        }
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AutoReplyRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<ReplyStats, StoreError> {
        let records = self.records.read().await;
        Ok(ReplyStats::tally(records.iter().map(|r| r.timestamp), now))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.records.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn config_roundtrip() {
        let store = MemoryConfigStore::new();
        assert!(store.get("a@x.com").await.unwrap().is_none());

        let config = AutoReplyConfig {
            enabled: true,
            ..Default::default()
        };
        store.put("a@x.com", &config).await.unwrap();
        assert_eq!(store.get("a@x.com").await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn records_are_fifo_capped() {
        let store = MemoryReplyRecordStore::with_capacity(3);
        let now = Utc::now();
        for i in 0..5 {
            store
                .append(&AutoReplyRecord::new("u", format!("r{i}"), "Re: hi", now))
                .await
                .unwrap();
        }
        assert_eq!(store.len().await, 3);
        let recent = store.recent(10).await.unwrap();
        let recipients: Vec<_> = recent.iter().map(|r| r.recipient.as_str()).collect();
        assert_eq!(recipients, vec!["r4", "r3", "r2"]);
    }

    #[tokio::test]
    async fn stats_and_clear() {
        let store = MemoryReplyRecordStore::new();
        let now = Utc::now();
        store
            .append(&AutoReplyRecord::new("u", "r", "Re: hi", now))
            .await
            .unwrap();
        let stats = store.stats(now).await.unwrap();
        assert_eq!(stats.today, 1);
        assert_eq!(stats.total, 1);

        store.clear().await.unwrap();
        assert_eq!(store.stats(now).await.unwrap().total, 0);
    }
}
