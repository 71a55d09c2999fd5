//! The fixed set of synchronized tables

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A synchronized table.
///
/// Names match the relational store. Every variant must have a transform
/// entry, which the exhaustive matches in `transform` enforce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTable {
    Workouts,
    Exercises,
    WorkoutTemplates,
    PlannedWorkouts,
    MuscleStatuses,
    UserProfiles,
    Settings,
    Notifications,
    SleepLogs,
    RecoveryLogs,
    ErrorLogs,
}

impl SyncTable {
    /// Every synchronized table, in sweep order.
    pub const ALL: [Self; 11] = [
        Self::Workouts,
        Self::Exercises,
        Self::WorkoutTemplates,
        Self::PlannedWorkouts,
        Self::MuscleStatuses,
        Self::UserProfiles,
        Self::Settings,
        Self::Notifications,
        Self::SleepLogs,
        Self::RecoveryLogs,
        Self::ErrorLogs,
    ];

    /// Tables force-pushed when a device has never pushed before.
    pub const BOOTSTRAP: [Self; 7] = [
        Self::Workouts,
        Self::Exercises,
        Self::WorkoutTemplates,
        Self::PlannedWorkouts,
        Self::MuscleStatuses,
        Self::UserProfiles,
        Self::Settings,
    ];

    /// Relational table name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Workouts => "workouts",
            Self::Exercises => "exercises",
            Self::WorkoutTemplates => "workout_templates",
            Self::PlannedWorkouts => "planned_workouts",
            Self::MuscleStatuses => "muscle_statuses",
            Self::UserProfiles => "user_profiles",
            Self::Settings => "settings",
            Self::Notifications => "notifications",
            Self::SleepLogs => "sleep_logs",
            Self::RecoveryLogs => "recovery_logs",
            Self::ErrorLogs => "error_logs",
        }
    }
}

impl fmt::Display for SyncTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a table name is not part of the synchronized set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown table: {0}")]
pub struct UnknownTable(pub String);

impl FromStr for SyncTable {
    type Err = UnknownTable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|table| table.as_str() == name)
            .ok_or_else(|| UnknownTable(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_relational_name() {
        for table in SyncTable::ALL {
            assert_eq!(table.as_str().parse::<SyncTable>().unwrap(), table);
        }
    }

    #[test]
    fn rejects_unknown_tables() {
        let err = "meal_plans".parse::<SyncTable>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown table: meal_plans");
    }

    #[test]
    fn serde_uses_relational_names() {
        let json = serde_json::to_string(&SyncTable::MuscleStatuses).unwrap();
        assert_eq!(json, "\"muscle_statuses\"");
    }

    #[test]
    fn bootstrap_tables_start_with_workouts() {
        assert_eq!(SyncTable::BOOTSTRAP[0], SyncTable::Workouts);
        assert!(!SyncTable::BOOTSTRAP.contains(&SyncTable::ErrorLogs));
    }
}
