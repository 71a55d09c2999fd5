use chrono::Utc;
use repsync_core::config::ClientConfig;
use repsync_core::db::{LibSqlRecordRepository, RecordRepository};
use repsync_core::SyncTable;

use crate::commands::common::{
    format_workout_lines, open_database, workout_to_list_item, WorkoutListItem,
};
use crate::error::CliError;

pub async fn run_list(
    limit: usize,
    include_deleted: bool,
    as_json: bool,
    config: &ClientConfig,
) -> Result<(), CliError> {
    let items = list_workouts(limit, include_deleted, config).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No workouts yet. Log one with: repsync add \"Leg day\" --minutes 45");
        return Ok(());
    }

    for line in format_workout_lines(&items) {
        println!("{line}");
    }
    Ok(())
}

pub(crate) async fn list_workouts(
    limit: usize,
    include_deleted: bool,
    config: &ClientConfig,
) -> Result<Vec<WorkoutListItem>, CliError> {
    let user_id = config.require_user()?;
    let db = open_database(config).await?;
    let repo = LibSqlRecordRepository::new(db.connection());
    let records = repo
        .list(SyncTable::Workouts, user_id, include_deleted)
        .await?;

    let now = Utc::now();
    Ok(records
        .iter()
        .filter_map(|record| workout_to_list_item(record, now))
        .take(limit)
        .collect())
}
