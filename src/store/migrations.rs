//! Version-tracked schema migrations for the libSQL store.
//!
//! `run_migrations()` reads the highest applied version from `_migrations`
//! and applies only newer steps, in order.

use libsql::Connection;

use crate::error::StoreError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "auto_reply_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS auto_reply_configs (
                user_email TEXT PRIMARY KEY,
                config TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS auto_reply_records (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                timestamp TEXT NOT NULL,
                user_email TEXT NOT NULL,
                recipient TEXT NOT NULL,
                subject TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        name: "reply_record_indexes",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_auto_reply_records_timestamp
                ON auto_reply_records(timestamp);
            CREATE INDEX IF NOT EXISTS idx_auto_reply_records_user
                ON auto_reply_records(user_email);
        "#,
    },
];

const CREATE_MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
)";

fn migration_error(context: &str) -> impl Fn(libsql::Error) -> StoreError + '_ {
    move |e| StoreError::Migration(format!("{context}: {e}"))
}

/// Bring the schema up to the latest version.
///
/// Each step and its `_migrations` row commit in one transaction, so a
/// failed step leaves the recorded version where it was.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(CREATE_MIGRATIONS_TABLE, ())
        .await
        .map_err(migration_error("Failed to create _migrations"))?;

    let applied = get_current_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        tracing::debug!(version = applied, "Schema up to date");
        return Ok(());
    }

    for step in pending {
        tracing::info!(version = step.version, name = step.name, "Applying migration");
        apply(conn, step).await?;
    }

    tracing::info!(
        from = applied,
        to = get_current_version(conn).await?,
        "Schema migrated"
    );
    Ok(())
}

async fn apply(conn: &Connection, step: &Migration) -> Result<(), StoreError> {
    let context = format!("V{} {}", step.version, step.name);
    let tx = conn
        .transaction()
        .await
        .map_err(migration_error(&context))?;
    tx.execute_batch(step.sql)
        .await
        .map_err(migration_error(&context))?;
    seed_version(&tx, step.version, step.name).await?;
    tx.commit().await.map_err(migration_error(&context))
}

/// Highest applied version; 0 on a fresh database.
async fn get_current_version(conn: &Connection) -> Result<i64, StoreError> {
    let read = migration_error("Failed to read schema version");
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(&read)?;
    match rows.next().await.map_err(&read)? {
        Some(row) => row.get::<i64>(0).map_err(&read),
        None => Ok(0),
    }
}

async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(migration_error("Failed to record migration"))?;
    Ok(())
}
