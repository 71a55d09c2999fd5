//! Relational backing store
//!
//! Each synchronized table keeps an integer primary key (`id`, the document
//! store's `_sourceId`), the opaque `record_id`, version metadata, and the
//! entity payload as JSON.
//!
//! Every accepted write stamps the row with the table's next `change_seq`.
//! Readers page through changes by that sequence, never by the writer's
//! `updated_at`, so a device that pushes late is still seen by everyone.

use async_trait::async_trait;
use libsql::{params, Builder, Connection, Row};
use std::path::Path;

use super::{RemoteError, RemoteResult};
use crate::db::{millis_param, opt_millis, run_relational_migrations};
use crate::error::Result;
use crate::models::{RecordId, RelationalRow, SyncRecord, SyncTable, UpsertOutcome};

const ROW_COLUMNS: &str = "id, record_id, user_id, version, updated_at, deleted_at, data";
const CHANGE_SEQ_COLUMN: i32 = 7;

/// A row that exists remotely but could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRow {
    pub record_id: Option<RecordId>,
    pub reason: String,
}

/// One fetched row: decoded, or isolated as malformed
pub type FetchedRow = std::result::Result<RelationalRow, MalformedRow>;

/// Rows changed after a cursor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    pub rows: Vec<FetchedRow>,
    /// Change sequence of the last row in the batch; `None` when empty
    pub cursor: Option<i64>,
}

impl ChangeBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Authoritative cross-device store
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Rows of a user written after change sequence `after` (everything when
    /// `None`), tombstones included, in write order
    async fn fetch_changes(
        &self,
        table: SyncTable,
        user_id: &str,
        after: Option<i64>,
    ) -> RemoteResult<ChangeBatch>;

    /// A single row by record id
    async fn fetch_record(
        &self,
        table: SyncTable,
        record_id: &RecordId,
    ) -> RemoteResult<Option<FetchedRow>>;

    /// Insert or overwrite a record unless the stored version is the same or newer
    async fn upsert(&self, record: &SyncRecord) -> RemoteResult<UpsertOutcome>;

    /// Users with a live profile
    async fn active_user_ids(&self) -> RemoteResult<Vec<String>>;
}

/// libSQL implementation of `RelationalStore` (Turso or a local file)
pub struct LibSqlRelationalStore {
    _db: libsql::Database,
    conn: Connection,
}

impl LibSqlRelationalStore {
    /// Connect to a remote libSQL database and run migrations
    pub async fn open_remote(url: impl Into<String>, auth_token: impl Into<String>) -> Result<Self> {
        let db = Builder::new_remote(url.into(), auth_token.into())
            .build()
            .await?;
        Self::from_database(db).await
    }

    /// Open a local libSQL file and run migrations
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        Self::from_database(db).await
    }

    /// Open an in-memory store (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::from_database(db).await
    }

    async fn from_database(db: libsql::Database) -> Result<Self> {
        let conn = db.connect()?;
        run_relational_migrations(&conn).await?;
        Ok(Self { _db: db, conn })
    }

    /// Connection for the bookkeeping repositories stored alongside the data
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn stored_version(&self, table: SyncTable, record_id: &RecordId) -> RemoteResult<Option<i64>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT version FROM {table} WHERE record_id = ?1"),
                params![record_id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<i64>(0)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RelationalStore for LibSqlRelationalStore {
    async fn fetch_changes(
        &self,
        table: SyncTable,
        user_id: &str,
        after: Option<i64>,
    ) -> RemoteResult<ChangeBatch> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {ROW_COLUMNS}, change_seq FROM {table}
                     WHERE user_id = ?1 AND change_seq > ?2
                     ORDER BY change_seq ASC, id ASC"
                ),
                params![user_id, after.unwrap_or(i64::MIN)],
            )
            .await?;

        let mut batch = ChangeBatch::default();
        while let Some(row) = rows.next().await? {
            batch.cursor = batch.cursor.max(row.get::<i64>(CHANGE_SEQ_COLUMN).ok());
            batch.rows.push(parse_row(table, &row));
        }
        Ok(batch)
    }

    async fn fetch_record(
        &self,
        table: SyncTable,
        record_id: &RecordId,
    ) -> RemoteResult<Option<FetchedRow>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ROW_COLUMNS} FROM {table} WHERE record_id = ?1"),
                params![record_id.as_str()],
            )
            .await?;

        Ok(rows.next().await?.map(|row| parse_row(table, &row)))
    }

    async fn upsert(&self, record: &SyncRecord) -> RemoteResult<UpsertOutcome> {
        record
            .validate()
            .map_err(|error| RemoteError::Rejected(crate::util::sanitize(&error)))?;
        let data = record
            .entity
            .to_value()
            .and_then(|value| serde_json::to_string(&value))
            .map_err(|error| RemoteError::Rejected(crate::util::sanitize(&error)))?;
        let table = record.table();
        let existing = self.stored_version(table, &record.id).await?;

        let changed = self
            .conn
            .execute(
                &format!(
                    "INSERT INTO {table}
                        (record_id, user_id, version, updated_at, deleted_at, data, change_seq)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6,
                        (SELECT COALESCE(MAX(change_seq), 0) + 1 FROM {table}))
                     ON CONFLICT(record_id) DO UPDATE SET
                        user_id = excluded.user_id,
                        version = excluded.version,
                        updated_at = excluded.updated_at,
                        deleted_at = excluded.deleted_at,
                        data = excluded.data,
                        change_seq = excluded.change_seq
                     WHERE excluded.version > {table}.version"
                ),
                params![
                    record.id.as_str(),
                    record.user_id.as_str(),
                    i64::from(record.version),
                    record.updated_at.timestamp_millis(),
                    millis_param(record.state.deleted_at()),
                    data,
                ],
            )
            .await?;

        Ok(match (existing, changed) {
            (_, 0) => UpsertOutcome::Unchanged,
            (None, _) => UpsertOutcome::Created,
            (Some(_), _) => UpsertOutcome::Updated,
        })
    }

    async fn active_user_ids(&self) -> RemoteResult<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT DISTINCT user_id FROM {} WHERE deleted_at IS NULL ORDER BY user_id",
                    SyncTable::UserProfiles
                ),
                (),
            )
            .await?;

        let mut users = Vec::new();
        while let Some(row) = rows.next().await? {
            users.push(row.get::<String>(0)?);
        }
        Ok(users)
    }
}

fn parse_row(table: SyncTable, row: &Row) -> FetchedRow {
    let record_id = row.get::<String>(1).ok().map(RecordId::from);
    decode_row(table, row).map_err(|error| MalformedRow {
        record_id,
        reason: crate::util::sanitize(&error),
    })
}

fn decode_row(table: SyncTable, row: &Row) -> Result<RelationalRow> {
    let data: String = row.get(6)?;
    let record = crate::db::assemble_record(
        table,
        row.get::<String>(1)?,
        row.get::<String>(2)?,
        row.get::<i64>(3)?,
        row.get::<i64>(4)?,
        opt_millis(row, 5)?,
        &data,
    )?;
    record.validate()?;
    Ok(RelationalRow {
        source_id: row.get::<i64>(0)?,
        record,
    })
}
