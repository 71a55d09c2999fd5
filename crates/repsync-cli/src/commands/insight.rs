use repsync_core::background::{BackgroundOrchestrator, DerivationKind, InsightRequest};
use repsync_core::config::ClientConfig;
use repsync_core::db::{LibSqlRecordRepository, RecordRepository};
use repsync_core::fingerprint::fingerprint_records;
use repsync_core::models::Entity;
use repsync_core::{SyncRecord, SyncTable};
use serde::Serialize;

use crate::commands::common::open_database;
use crate::error::CliError;

/// Totals over the most recent workouts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkoutInsight {
    pub workouts: u64,
    pub total_minutes: i64,
    pub total_calories: f64,
    pub longest: Option<String>,
}

impl WorkoutInsight {
    fn from_records(records: &[SyncRecord]) -> Self {
        let mut insight = Self::default();
        let mut longest_seconds = 0;
        for record in records {
            let Entity::Workout(workout) = &record.entity else {
                continue;
            };
            insight.workouts += 1;
            let seconds = workout.duration_seconds.unwrap_or_default();
            insight.total_minutes += seconds / 60;
            insight.total_calories += workout.calories_burned.unwrap_or_default();
            if seconds > longest_seconds {
                longest_seconds = seconds;
                insight.longest = Some(workout.name.clone());
            }
        }
        insight
    }
}

pub async fn run_insight(limit: usize, config: &ClientConfig) -> Result<(), CliError> {
    let insight = workout_insight(limit, config).await?;

    if insight.workouts == 0 {
        println!("No workouts to summarize.");
        return Ok(());
    }

    println!("Workouts:  {}", insight.workouts);
    println!("Minutes:   {}", insight.total_minutes);
    println!("Calories:  {:.0}", insight.total_calories);
    if let Some(longest) = &insight.longest {
        println!("Longest:   {longest}");
    }
    Ok(())
}

pub(crate) async fn workout_insight(
    limit: usize,
    config: &ClientConfig,
) -> Result<WorkoutInsight, CliError> {
    let user_id = config.require_user()?;
    let db = open_database(config).await?;
    let repo = LibSqlRecordRepository::new(db.connection());
    let records: Vec<SyncRecord> = repo
        .list(SyncTable::Workouts, user_id, false)
        .await?
        .into_iter()
        .take(limit)
        .collect();

    let fingerprint = fingerprint_records(&records, limit);
    let source_count = u64::try_from(records.len()).unwrap_or(u64::MAX);
    let (orchestrator, mut receiver) = BackgroundOrchestrator::new(&config.sync);

    let request = orchestrator.request(
        fingerprint,
        DerivationKind::WorkoutInsight,
        source_count,
        move || Ok(WorkoutInsight::from_records(&records)),
    );
    match request {
        InsightRequest::Cached(insight) => Ok(insight),
        InsightRequest::Dispatched => match receiver.next_current().await {
            Some((_, result)) => Ok(result?),
            None => Ok(WorkoutInsight::default()),
        },
    }
}
