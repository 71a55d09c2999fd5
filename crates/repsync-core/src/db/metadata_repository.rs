//! Sync metadata repository
//!
//! Used by both the reconciler (on-device) and the fan-out service
//! (relational store). Every write is a single whole-row upsert keyed by
//! `(table_name, user_id)`, so two writers never race on individual fields.

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite integers are i64

use libsql::{params, Connection, Row, Value};

use super::{millis_param, opt_integer, opt_millis, opt_text, text_param};
use crate::error::{Error, Result};
use crate::models::{SyncMetadata, SyncStatus, SyncTable};

const METADATA_COLUMNS: &str = "table_name, user_id, last_sync_at, status, conflict_count, \
     record_count, error_message, last_error_at, last_successful_sync_at, last_push_at, \
     last_pull_at, last_pull_fingerprint, pull_cursor";

/// Trait for sync metadata storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SyncMetadataRepository {
    /// Load metadata for a pair, if it was ever written
    async fn get(&self, table: SyncTable, user_id: &str) -> Result<Option<SyncMetadata>>;

    /// Load metadata, or a fresh idle row for a pair never seen before
    async fn get_or_default(&self, table: SyncTable, user_id: &str) -> Result<SyncMetadata> {
        Ok(self
            .get(table, user_id)
            .await?
            .unwrap_or_else(|| SyncMetadata::new(table, user_id)))
    }

    /// Upsert the whole row
    async fn save(&self, metadata: &SyncMetadata) -> Result<()>;

    /// All metadata rows for a user, in table order
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SyncMetadata>>;
}

/// libSQL implementation of `SyncMetadataRepository`
pub struct LibSqlMetadataRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMetadataRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncMetadataRepository for LibSqlMetadataRepository<'_> {
    async fn get(&self, table: SyncTable, user_id: &str) -> Result<Option<SyncMetadata>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {METADATA_COLUMNS} FROM sync_metadata
                     WHERE table_name = ?1 AND user_id = ?2"
                ),
                params![table.as_str(), user_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_metadata(&row)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, metadata: &SyncMetadata) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_metadata (
                    table_name, user_id, last_sync_at, status, conflict_count, record_count,
                    error_message, last_error_at, last_successful_sync_at, last_push_at,
                    last_pull_at, last_pull_fingerprint, pull_cursor
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(table_name, user_id) DO UPDATE SET
                    last_sync_at = excluded.last_sync_at,
                    status = excluded.status,
                    conflict_count = excluded.conflict_count,
                    record_count = excluded.record_count,
                    error_message = excluded.error_message,
                    last_error_at = excluded.last_error_at,
                    last_successful_sync_at = excluded.last_successful_sync_at,
                    last_push_at = excluded.last_push_at,
                    last_pull_at = excluded.last_pull_at,
                    last_pull_fingerprint = excluded.last_pull_fingerprint,
                    pull_cursor = excluded.pull_cursor",
                params![
                    metadata.table.as_str(),
                    metadata.user_id.as_str(),
                    millis_param(metadata.last_sync_at),
                    metadata.status.as_str(),
                    metadata.conflict_count as i64,
                    metadata.record_count as i64,
                    text_param(metadata.error_message.as_deref()),
                    millis_param(metadata.last_error_at),
                    millis_param(metadata.last_successful_sync_at),
                    millis_param(metadata.last_push_at),
                    millis_param(metadata.last_pull_at),
                    text_param(metadata.last_pull_fingerprint.as_deref()),
                    metadata.pull_cursor.map_or(Value::Null, Value::Integer),
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SyncMetadata>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {METADATA_COLUMNS} FROM sync_metadata WHERE user_id = ?1"),
                params![user_id],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(parse_metadata(&row)?);
        }
        entries.sort_by_key(|entry| entry.table);
        Ok(entries)
    }
}

fn parse_metadata(row: &Row) -> Result<SyncMetadata> {
    let table = row
        .get::<String>(0)?
        .parse::<SyncTable>()
        .map_err(|error| Error::Database(error.to_string()))?;
    let status = row
        .get::<String>(3)?
        .parse::<SyncStatus>()
        .map_err(Error::Database)?;

    Ok(SyncMetadata {
        table,
        user_id: row.get(1)?,
        last_sync_at: opt_millis(row, 2)?,
        status,
        conflict_count: row.get::<i64>(4)?.max(0) as u64,
        record_count: row.get::<i64>(5)?.max(0) as u64,
        error_message: opt_text(row, 6)?,
        last_error_at: opt_millis(row, 7)?,
        last_successful_sync_at: opt_millis(row, 8)?,
        last_push_at: opt_millis(row, 9)?,
        last_pull_at: opt_millis(row, 10)?,
        last_pull_fingerprint: opt_text(row, 11)?,
        pull_cursor: opt_integer(row, 12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_pair_defaults_to_idle() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlMetadataRepository::new(db.connection());

        assert!(repo
            .get(SyncTable::Workouts, "user-1")
            .await
            .unwrap()
            .is_none());
        let meta = repo
            .get_or_default(SyncTable::Workouts, "user-1")
            .await
            .unwrap();
        assert_eq!(meta.status, SyncStatus::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_replaces_the_whole_row() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlMetadataRepository::new(db.connection());

        let now = crate::util::from_millis(Utc::now().timestamp_millis());
        let mut meta = SyncMetadata::new(SyncTable::SleepLogs, "user-1");
        meta.mark_error("timeout");
        meta.last_error_at = Some(now);
        repo.save(&meta).await.unwrap();

        meta.mark_success(Some(now), 2);
        meta.last_successful_sync_at = Some(now);
        meta.last_push_at = Some(now);
        meta.record_count = 4;
        meta.last_pull_fingerprint = Some("abc".to_string());
        meta.advance_cursor(Some(42));
        repo.save(&meta).await.unwrap();

        let loaded = repo
            .get(SyncTable::SleepLogs, "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, meta);
        assert!(loaded.error_message.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_for_user_is_scoped_and_ordered() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlMetadataRepository::new(db.connection());

        for table in [SyncTable::Settings, SyncTable::Workouts] {
            repo.save(&SyncMetadata::new(table, "user-1")).await.unwrap();
        }
        repo.save(&SyncMetadata::new(SyncTable::Workouts, "user-2"))
            .await
            .unwrap();

        let entries = repo.list_for_user("user-1").await.unwrap();
        let tables: Vec<_> = entries.iter().map(|entry| entry.table).collect();
        assert_eq!(tables, vec![SyncTable::Workouts, SyncTable::Settings]);
    }
}
