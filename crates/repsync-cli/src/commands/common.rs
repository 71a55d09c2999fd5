use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use repsync_core::config::ClientConfig;
use repsync_core::db::Database;
use repsync_core::models::{Entity, SyncError, SyncMetadata};
use repsync_core::remote::{LibSqlRelationalStore, RelationalStore};
use repsync_core::util::normalize_text_option;
use repsync_core::{SyncRecord, SyncResult};
use serde::Serialize;

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct WorkoutListItem {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
    pub calories_burned: Option<f64>,
    pub updated_at: DateTime<Utc>,
    pub relative_time: String,
    pub deleted: bool,
}

/// Apply `--db-path`/`--user` over the environment configuration
pub fn resolve_config(
    mut config: ClientConfig,
    db_path: Option<PathBuf>,
    user: Option<String>,
) -> ClientConfig {
    if let Some(path) = db_path {
        config.db_path = path;
    }
    if let Some(user) = user.and_then(|user| normalize_text(&user)) {
        config.user_id = Some(user);
    }
    config
}

pub async fn open_database(config: &ClientConfig) -> Result<Database, CliError> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Database::open(&config.db_path).await?)
}

/// Open the relational store named by the configuration
pub async fn open_relational(config: &ClientConfig) -> Result<Arc<dyn RelationalStore>, CliError> {
    let url = config
        .relational_url
        .as_deref()
        .ok_or(CliError::SyncNotConfigured)?;

    let store = if url.starts_with("libsql://") || url.starts_with("https://") {
        let token = config
            .relational_auth_token
            .clone()
            .ok_or(CliError::SyncNotConfigured)?;
        LibSqlRelationalStore::open_remote(url, token).await?
    } else {
        LibSqlRelationalStore::open(url).await?
    };
    tracing::debug!("Opened relational store");
    Ok(Arc::new(store))
}

pub fn normalize_text(value: &str) -> Option<String> {
    normalize_text_option(Some(value.to_string()))
}

pub fn workout_to_list_item(record: &SyncRecord, now: DateTime<Utc>) -> Option<WorkoutListItem> {
    let Entity::Workout(workout) = &record.entity else {
        return None;
    };
    Some(WorkoutListItem {
        id: record.id.to_string(),
        name: workout.name.clone(),
        version: record.version,
        started_at: workout.started_at,
        duration_seconds: workout.duration_seconds,
        calories_burned: workout.calories_burned,
        updated_at: record.updated_at,
        relative_time: format_relative_time(
            workout.started_at.timestamp_millis(),
            now.timestamp_millis(),
        ),
        deleted: record.is_tombstone(),
    })
}

pub fn format_workout_lines(items: &[WorkoutListItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let minutes = item
                .duration_seconds
                .map(|seconds| format!(" {}min", seconds / 60))
                .unwrap_or_default();
            let deleted = if item.deleted { " [deleted]" } else { "" };
            format!(
                "{}  {}{minutes}  v{}  ({}){deleted}",
                short_id(&item.id),
                item.name,
                item.version,
                item.relative_time
            )
        })
        .collect()
}

pub fn format_result_lines(results: &[SyncResult]) -> Vec<String> {
    results
        .iter()
        .map(|result| {
            format!(
                "{:<18} {:<8} processed={} created={} updated={} deleted={} conflicts={} errors={} ({}ms)",
                result.table.as_str(),
                result.status.as_str(),
                result.records_processed,
                result.records_created,
                result.records_updated,
                result.records_deleted,
                result.conflicts,
                result.errors.len(),
                result.duration_ms
            )
        })
        .collect()
}

pub fn format_metadata_lines(metadata: &[SyncMetadata]) -> Vec<String> {
    metadata
        .iter()
        .map(|meta| {
            let last_sync = meta
                .last_successful_sync_at
                .map_or_else(|| "never".to_string(), |at| format_sync_timestamp(at.timestamp_millis()));
            let error = meta
                .error_message
                .as_deref()
                .map(|message| format!(" error={message}"))
                .unwrap_or_default();
            format!(
                "{:<18} {:<8} last={last_sync} records={} conflicts={}{error}",
                meta.table.as_str(),
                meta.status.as_str(),
                meta.record_count,
                meta.conflict_count
            )
        })
        .collect()
}

pub fn format_error_lines(errors: &[SyncError]) -> Vec<String> {
    errors
        .iter()
        .map(|error| {
            let record = error
                .record_id
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string);
            format!(
                "{} {} {} record={record} {}",
                format_sync_timestamp(error.timestamp.timestamp_millis()),
                error.table.as_str(),
                error.operation.as_str(),
                error.error
            )
        })
        .collect()
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
