//! Persisted per-record sync errors

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use libsql::{params, Connection, Row};

use super::{opt_text, text_param};
use crate::error::{Error, Result};
use crate::models::{RecordId, SyncError, SyncOperation, SyncTable};

/// Trait for sync error log operations (async)
#[allow(async_fn_in_trait)]
pub trait SyncErrorLogRepository {
    /// Append errors raised during a pass for `user_id`
    async fn append(&self, user_id: &str, errors: &[SyncError]) -> Result<()>;

    /// Most recent errors for a user, newest first
    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<SyncError>>;
}

/// libSQL implementation of `SyncErrorLogRepository`
pub struct LibSqlErrorLogRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlErrorLogRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncErrorLogRepository for LibSqlErrorLogRepository<'_> {
    async fn append(&self, user_id: &str, errors: &[SyncError]) -> Result<()> {
        for error in errors {
            self.conn
                .execute(
                    "INSERT INTO sync_error_log
                        (table_name, user_id, record_id, operation, error, occurred_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        error.table.as_str(),
                        user_id,
                        text_param(error.record_id.as_ref().map(RecordId::as_str)),
                        error.operation.as_str(),
                        error.error.as_str(),
                        error.timestamp.timestamp_millis(),
                    ],
                )
                .await?;
        }
        Ok(())
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<SyncError>> {
        let mut rows = self
            .conn
            .query(
                "SELECT table_name, record_id, operation, error, occurred_at
                 FROM sync_error_log
                 WHERE user_id = ?1
                 ORDER BY occurred_at DESC, id DESC
                 LIMIT ?2",
                params![user_id, limit as i64],
            )
            .await?;

        let mut errors = Vec::new();
        while let Some(row) = rows.next().await? {
            errors.push(parse_error(&row)?);
        }
        Ok(errors)
    }
}

fn parse_error(row: &Row) -> Result<SyncError> {
    let table = row
        .get::<String>(0)?
        .parse::<SyncTable>()
        .map_err(|error| Error::Database(error.to_string()))?;
    let operation = match row.get::<String>(2)?.as_str() {
        "create" => SyncOperation::Create,
        "update" => SyncOperation::Update,
        "delete" => SyncOperation::Delete,
        "read" => SyncOperation::Read,
        other => {
            return Err(Error::Database(format!("unknown sync operation: {other}")));
        }
    };

    Ok(SyncError {
        table,
        record_id: opt_text(row, 1)?.map(RecordId::from),
        error: row.get(3)?,
        timestamp: crate::util::from_millis(row.get::<i64>(4)?),
        operation,
    })
}
