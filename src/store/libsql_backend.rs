//! libSQL backend: durable `ConfigStore` + `ReplyRecordStore`.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AutoReplyConfig;
use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::{
    AutoReplyRecord, ConfigStore, MAX_REPLY_RECORDS, ReplyRecordStore, ReplyStats, StatsWindow,
};

/// libSQL store.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    record_cap: usize,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests and ephemeral runs).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            record_cap: MAX_REPLY_RECORDS,
        })
    }

    /// Override the reply record cap.
    pub fn with_record_cap(mut self, cap: usize) -> Self {
        self.record_cap = cap;
        self
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format; fixed width so text comparison orders correctly.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn row_to_record(row: &libsql::Row) -> Result<AutoReplyRecord, StoreError> {
    let get = |idx: i32| -> Result<String, StoreError> {
        row.get::<String>(idx)
            .map_err(|e| StoreError::Query(format!("read column {idx}: {e}")))
    };
    let id = get(0)?;
    Ok(AutoReplyRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| StoreError::Serialization(format!("bad record id {id}: {e}")))?,
        timestamp: parse_datetime(&get(1)?),
        user_email: get(2)?,
        recipient: get(3)?,
        subject: get(4)?,
    })
}

// ── ConfigStore ─────────────────────────────────────────────────────

#[async_trait]
impl ConfigStore for LibSqlStore {
    async fn get(&self, user_email: &str) -> Result<Option<AutoReplyConfig>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT config FROM auto_reply_configs WHERE user_email = ?1",
                params![user_email],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_config: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw: String = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("get_config: {e}")))?;
                let config = serde_json::from_str(&raw)
                    .map_err(|e| StoreError::Serialization(format!("config for {user_email}: {e}")))?;
                Ok(Some(config))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_config: {e}"))),
        }
    }

    async fn put(&self, user_email: &str, config: &AutoReplyConfig) -> Result<(), StoreError> {
        let raw =
            serde_json::to_string(config).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let now = format_datetime(Utc::now());

        self.conn()
            .execute(
                "INSERT INTO auto_reply_configs (user_email, config, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_email) DO UPDATE SET config = ?2, updated_at = ?3",
                params![user_email, raw, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("put_config: {e}")))?;

        debug!(user = %user_email, "Auto-reply config saved");
        Ok(())
    }
}

// ── ReplyRecordStore ────────────────────────────────────────────────

#[async_trait]
impl ReplyRecordStore for LibSqlStore {
    async fn append(&self, record: &AutoReplyRecord) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO auto_reply_records (id, timestamp, user_email, recipient, subject)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.to_string(),
                format_datetime(record.timestamp),
                record.user_email.as_str(),
                record.recipient.as_str(),
                record.subject.as_str()
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("append_record: {e}")))?;

        let trimmed = conn
            .execute(
                "DELETE FROM auto_reply_records WHERE seq NOT IN
                 (SELECT seq FROM auto_reply_records ORDER BY seq DESC LIMIT ?1)",
                params![self.record_cap as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("trim_records: {e}")))?;
        if trimmed > 0 {
            debug!(trimmed, "Dropped oldest reply records");
        }
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AutoReplyRecord>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, timestamp, user_email, recipient, subject
                 FROM auto_reply_records ORDER BY seq DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("recent_records: {e}")))?;

        let mut records = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_record(&row) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(error = %e, "Skipping unreadable reply record"),
                },
                Ok(None) => break,
                Err(e) => return Err(StoreError::Query(format!("recent_records: {e}"))),
            }
        }
        Ok(records)
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<ReplyStats, StoreError> {
        let window = StatsWindow::at(now);
        let mut rows = self
            .conn()
            .query(
                "SELECT
                    COALESCE(SUM(CASE WHEN timestamp >= ?1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN timestamp >= ?2 AND timestamp < ?1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN timestamp >= ?3 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN timestamp >= ?4 THEN 1 ELSE 0 END), 0),
                    COUNT(*)
                 FROM auto_reply_records",
                params![
                    format_datetime(window.today_start),
                    format_datetime(window.yesterday_start),
                    format_datetime(window.week_start),
                    format_datetime(window.month_start)
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("reply_stats: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("reply_stats: {e}")))?
            .ok_or_else(|| StoreError::Query("reply_stats: no row".into()))?;

        let count = |idx: i32| -> Result<u64, StoreError> {
            row.get::<i64>(idx)
                .map(|n| n.max(0) as u64)
                .map_err(|e| StoreError::Query(format!("reply_stats column {idx}: {e}")))
        };
        Ok(ReplyStats {
            today: count(0)?,
            yesterday: count(1)?,
            this_week: count(2)?,
            this_month: count(3)?,
            total: count(4)?,
        })
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM auto_reply_records", ())
            .await
            .map_err(|e| StoreError::Query(format!("clear_records: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn config_upsert() {
        let store = LibSqlStore::new_memory().await.unwrap();
        assert!(store.get("a@x.com").await.unwrap().is_none());

        let mut config = AutoReplyConfig::default();
        store.put("a@x.com", &config).await.unwrap();
        config.enabled = true;
        config.min_confidence = 0.8;
        store.put("a@x.com", &config).await.unwrap();

        assert_eq!(store.get("a@x.com").await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn corrupt_config_is_serialization_error() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO auto_reply_configs (user_email, config, updated_at) VALUES ('a@x.com', 'nope', '')",
                (),
            )
            .await
            .unwrap();
        assert!(matches!(
            store.get("a@x.com").await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn records_capped_oldest_first() {
        let store = LibSqlStore::new_memory().await.unwrap().with_record_cap(3);
        let now = Utc::now();
        for i in 0..5 {
            store
                .append(&AutoReplyRecord::new("u", format!("r{i}"), "Re: hi", now))
                .await
                .unwrap();
        }
        let recent = store.recent(10).await.unwrap();
        let recipients: Vec<_> = recent.iter().map(|r| r.recipient.as_str()).collect();
        assert_eq!(recipients, vec!["r4", "r3", "r2"]);
    }

    #[tokio::test]
    async fn stats_match_buckets() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let now = at("2025-03-10T15:30:00Z");
        for ts in [
            now - TimeDelta::hours(1),
            at("2025-03-09T08:00:00Z"),
            at("2025-03-05T08:00:00Z"),
            at("2025-02-15T08:00:00Z"),
            at("2024-01-01T00:00:00Z"),
        ] {
            store
                .append(&AutoReplyRecord::new("u", "r", "Re: hi", ts))
                .await
                .unwrap();
        }

        let stats = store.stats(now).await.unwrap();
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

        store.clear().await.unwrap();
        assert_eq!(store.stats(now).await.unwrap(), ReplyStats::default());
    }

    #[tokio::test]
    async fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("autoreply.db");
        {
            let store = LibSqlStore::new_local(&path).await.unwrap();
            store
                .put("a@x.com", &AutoReplyConfig::default())
                .await
                .unwrap();
        }
        let reopened = LibSqlStore::new_local(&path).await.unwrap();
        assert!(reopened.get("a@x.com").await.unwrap().is_some());
    }

    #[test]
    fn formatted_timestamps_sort_lexically() {
        let a = format_datetime(at("2025-03-09T23:59:59Z"));
        let b = format_datetime(at("2025-03-10T00:00:00Z"));
        assert!(a < b);
        assert_eq!(parse_datetime(&b), at("2025-03-10T00:00:00Z"));
    }
}
