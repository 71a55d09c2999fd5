//! Domain payloads carried by synchronized records
//!
//! One concrete struct per table. Field names follow the relational
//! (snake_case) naming; the document shape lives in `transform`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SyncTable;

/// A logged workout session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    pub name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub calories_burned: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// An exercise definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    pub name: String,
    pub muscle_group: String,
    #[serde(default)]
    pub equipment: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// A reusable workout layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutTemplate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub exercise_ids: Vec<String>,
}

/// A workout scheduled for a calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedWorkout {
    pub name: String,
    pub scheduled_date: NaiveDate,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

/// Recovery state of one muscle group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuscleStatus {
    pub muscle_group: String,
    pub recovery_percentage: f64,
    #[serde(default)]
    pub last_worked_at: Option<DateTime<Utc>>,
}

/// Per-user profile; exactly one per user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub display_name: String,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub fitness_goal: Option<String>,
}

/// Per-user app settings; exactly one per user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub units: String,
    pub rest_timer_seconds: i64,
    pub notifications_enabled: bool,
}

/// A scheduled or delivered in-app notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read: bool,
}

/// One night of sleep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepLog {
    pub date: NaiveDate,
    pub hours: f64,
    #[serde(default)]
    pub quality: Option<i64>,
}

/// Daily recovery self-assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryLog {
    pub date: NaiveDate,
    pub score: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Client-side error report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLog {
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub context: Option<String>,
}

/// Payload of a synchronized record, one variant per table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Entity {
    Workout(Workout),
    Exercise(Exercise),
    WorkoutTemplate(WorkoutTemplate),
    PlannedWorkout(PlannedWorkout),
    MuscleStatus(MuscleStatus),
    UserProfile(UserProfile),
    Settings(UserSettings),
    Notification(Notification),
    SleepLog(SleepLog),
    RecoveryLog(RecoveryLog),
    ErrorLog(ErrorLog),
}

impl Entity {
    /// Table this payload belongs to
    pub const fn table(&self) -> SyncTable {
        match self {
            Self::Workout(_) => SyncTable::Workouts,
            Self::Exercise(_) => SyncTable::Exercises,
            Self::WorkoutTemplate(_) => SyncTable::WorkoutTemplates,
            Self::PlannedWorkout(_) => SyncTable::PlannedWorkouts,
            Self::MuscleStatus(_) => SyncTable::MuscleStatuses,
            Self::UserProfile(_) => SyncTable::UserProfiles,
            Self::Settings(_) => SyncTable::Settings,
            Self::Notification(_) => SyncTable::Notifications,
            Self::SleepLog(_) => SyncTable::SleepLogs,
            Self::RecoveryLog(_) => SyncTable::RecoveryLogs,
            Self::ErrorLog(_) => SyncTable::ErrorLogs,
        }
    }

    /// Decode a relational-shaped JSON object for the given table.
    ///
    /// Unknown columns (`id`, `user_id`, `version`, ...) are ignored.
    pub fn from_value(table: SyncTable, value: Value) -> serde_json::Result<Self> {
        Ok(match table {
            SyncTable::Workouts => Self::Workout(serde_json::from_value(value)?),
            SyncTable::Exercises => Self::Exercise(serde_json::from_value(value)?),
            SyncTable::WorkoutTemplates => Self::WorkoutTemplate(serde_json::from_value(value)?),
            SyncTable::PlannedWorkouts => Self::PlannedWorkout(serde_json::from_value(value)?),
            SyncTable::MuscleStatuses => Self::MuscleStatus(serde_json::from_value(value)?),
            SyncTable::UserProfiles => Self::UserProfile(serde_json::from_value(value)?),
            SyncTable::Settings => Self::Settings(serde_json::from_value(value)?),
            SyncTable::Notifications => Self::Notification(serde_json::from_value(value)?),
            SyncTable::SleepLogs => Self::SleepLog(serde_json::from_value(value)?),
            SyncTable::RecoveryLogs => Self::RecoveryLog(serde_json::from_value(value)?),
            SyncTable::ErrorLogs => Self::ErrorLog(serde_json::from_value(value)?),
        })
    }

    /// Encode the payload as a relational-shaped JSON object
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_value_ignores_row_columns() {
        let entity = Entity::from_value(
            SyncTable::MuscleStatuses,
            json!({
                "id": 7,
                "user_id": "user-1",
                "muscle_group": "quads",
                "recovery_percentage": 62.5,
            }),
        )
        .unwrap();

        assert_eq!(entity.table(), SyncTable::MuscleStatuses);
        let Entity::MuscleStatus(status) = entity else {
            panic!("expected muscle status");
        };
        assert_eq!(status.muscle_group, "quads");
        assert!(status.last_worked_at.is_none());
    }

    #[test]
    fn from_value_rejects_missing_required_fields() {
        let result = Entity::from_value(SyncTable::SleepLogs, json!({ "hours": 7.5 }));
        assert!(result.is_err());
    }

    #[test]
    fn to_value_is_flat_snake_case() {
        let entity = Entity::Settings(UserSettings {
            units: "metric".to_string(),
            rest_timer_seconds: 90,
            notifications_enabled: true,
        });
        let value = entity.to_value().unwrap();
        assert_eq!(value["rest_timer_seconds"], 90);
        assert_eq!(value["notifications_enabled"], true);
    }
}
