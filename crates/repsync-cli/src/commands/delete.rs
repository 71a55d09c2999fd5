use repsync_core::config::ClientConfig;
use repsync_core::db::{LibSqlRecordRepository, RecordRepository};
use repsync_core::{RecordId, SyncTable};

use crate::commands::common::{normalize_text, open_database};
use crate::error::CliError;

pub async fn run_delete(id: &str, config: &ClientConfig) -> Result<(), CliError> {
    let id = delete_workout(id, config).await?;
    println!("{id}");
    Ok(())
}

/// Soft-delete a workout owned by the configured user
pub(crate) async fn delete_workout(id: &str, config: &ClientConfig) -> Result<RecordId, CliError> {
    let id = RecordId::from(normalize_text(id).ok_or(CliError::EmptyRecordId)?);
    let user_id = config.require_user()?;
    let db = open_database(config).await?;
    let repo = LibSqlRecordRepository::new(db.connection());

    let mut record = repo
        .get(SyncTable::Workouts, &id)
        .await?
        .filter(|record| record.user_id == user_id && !record.is_tombstone())
        .ok_or_else(|| CliError::RecordNotFound(id.to_string()))?;

    record.soft_delete();
    repo.save(&record).await?;
    Ok(record.id)
}
