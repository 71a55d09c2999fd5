//! Database layer for repsync

mod connection;
mod error_log_repository;
mod metadata_repository;
mod migrations;
mod record_repository;

pub use connection::Database;
pub use error_log_repository::{LibSqlErrorLogRepository, SyncErrorLogRepository};
pub use metadata_repository::{LibSqlMetadataRepository, SyncMetadataRepository};
pub use migrations::{run as run_local_migrations, run_relational as run_relational_migrations};
pub use record_repository::{LibSqlRecordRepository, RecordRepository};

pub(crate) use record_repository::assemble_record;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use libsql::{Row, Value};

/// Nullable timestamp parameter stored as unix milliseconds
pub(crate) fn millis_param(value: Option<DateTime<Utc>>) -> Value {
    value.map_or(Value::Null, |at| Value::Integer(at.timestamp_millis()))
}

/// Nullable text parameter
pub(crate) fn text_param(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |text| Value::Text(text.to_string()))
}

/// Read a nullable integer column
pub(crate) fn opt_integer(row: &Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Integer(value) => Ok(Some(value)),
        other => Err(Error::Database(format!(
            "column {idx}: expected integer, found {other:?}"
        ))),
    }
}

/// Read a nullable text column
pub(crate) fn opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(value) => Ok(Some(value)),
        other => Err(Error::Database(format!(
            "column {idx}: expected text, found {other:?}"
        ))),
    }
}

/// Read a nullable unix-millisecond column
pub(crate) fn opt_millis(row: &Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    Ok(opt_integer(row, idx)?.map(crate::util::from_millis))
}

/// Convert a stored version column
pub(crate) fn version_from_column(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Database(format!("invalid version column: {value}")))
}
