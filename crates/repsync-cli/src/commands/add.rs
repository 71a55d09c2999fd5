use chrono::{Duration, Utc};
use repsync_core::config::ClientConfig;
use repsync_core::db::{LibSqlRecordRepository, RecordRepository};
use repsync_core::models::{Entity, Workout};
use repsync_core::SyncRecord;

use crate::commands::common::{normalize_text, open_database};
use crate::error::CliError;

pub struct NewWorkout {
    pub name_parts: Vec<String>,
    pub minutes: Option<i64>,
    pub calories: Option<f64>,
    pub notes: Option<String>,
}

pub async fn run_add(workout: NewWorkout, config: &ClientConfig) -> Result<(), CliError> {
    let record = add_workout(workout, config).await?;
    println!("{}", record.id);
    Ok(())
}

pub(crate) async fn add_workout(
    workout: NewWorkout,
    config: &ClientConfig,
) -> Result<SyncRecord, CliError> {
    let name = normalize_text(&workout.name_parts.join(" ")).ok_or(CliError::EmptyName)?;
    let user_id = config.require_user()?;

    let completed_at = Utc::now();
    let duration_seconds = workout.minutes.map(|minutes| minutes.saturating_mul(60));
    let started_at = duration_seconds.map_or(completed_at, |seconds| {
        completed_at - Duration::seconds(seconds)
    });

    let record = SyncRecord::new(
        user_id,
        Entity::Workout(Workout {
            name,
            started_at,
            completed_at: Some(completed_at),
            duration_seconds,
            calories_burned: workout.calories,
            notes: workout.notes.as_deref().and_then(normalize_text),
        }),
    );
    record.validate()?;

    let db = open_database(config).await?;
    let repo = LibSqlRecordRepository::new(db.connection());
    repo.save(&record).await?;
    tracing::debug!(record = %record.id, "Logged workout");
    Ok(record)
}
