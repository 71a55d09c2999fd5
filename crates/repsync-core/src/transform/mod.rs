//! Relational row ↔ secondary-store document mapping
//!
//! Field names are fixed per entity in [`mapping`]; nothing is rewritten at
//! runtime. Timestamps and calendar dates become native document timestamps.
//! The relational integer key travels as `_sourceId`; the document store
//! mints its own `_id`.

mod document;
mod mapping;

pub use document::{DocValue, Document};

use chrono::NaiveDate;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{
    Entity, RecordId, RecordState, RelationalRow, SyncRecord, SyncTable,
};

/// Document key holding the relational primary key
pub const SOURCE_ID: &str = "_sourceId";
/// Document key holding the opaque record id
pub const RECORD_ID: &str = "recordId";
/// Document key holding the owning user
pub const USER_ID: &str = "userId";
/// Document key holding the record version
pub const VERSION: &str = "version";
/// Document key holding the last mutation time
pub const UPDATED_AT: &str = "updatedAt";
/// Document key holding the tombstone time
pub const DELETED_AT: &str = "deletedAt";

/// How a table's documents are located in the secondary store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    /// By the relational primary key copied into `_sourceId`
    SourceId,
    /// One document per user
    User,
    /// One document per user and muscle group
    UserAndMuscleGroup,
    /// One document per user and calendar day
    UserAndDate,
}

impl LookupStrategy {
    /// The single lookup strategy of a table
    pub const fn for_table(table: SyncTable) -> Self {
        match table {
            SyncTable::Workouts
            | SyncTable::Exercises
            | SyncTable::WorkoutTemplates
            | SyncTable::PlannedWorkouts
            | SyncTable::Notifications
            | SyncTable::ErrorLogs => Self::SourceId,
            SyncTable::UserProfiles | SyncTable::Settings => Self::User,
            SyncTable::MuscleStatuses => Self::UserAndMuscleGroup,
            SyncTable::SleepLogs | SyncTable::RecoveryLogs => Self::UserAndDate,
        }
    }
}

/// Natural-key filter locating a record's document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupFilter {
    SourceId(i64),
    User {
        user_id: String,
    },
    UserAndMuscleGroup {
        user_id: String,
        muscle_group: String,
    },
    UserAndDate {
        user_id: String,
        date: NaiveDate,
    },
}

impl LookupFilter {
    pub const fn strategy(&self) -> LookupStrategy {
        match self {
            Self::SourceId(_) => LookupStrategy::SourceId,
            Self::User { .. } => LookupStrategy::User,
            Self::UserAndMuscleGroup { .. } => LookupStrategy::UserAndMuscleGroup,
            Self::UserAndDate { .. } => LookupStrategy::UserAndDate,
        }
    }

    /// Filter as a document of equality constraints
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        match self {
            Self::SourceId(source_id) => doc.put(SOURCE_ID, *source_id),
            Self::User { user_id } => doc.put(USER_ID, user_id.as_str()),
            Self::UserAndMuscleGroup {
                user_id,
                muscle_group,
            } => {
                doc.put(USER_ID, user_id.as_str());
                doc.put("muscleGroup", muscle_group.as_str());
            }
            Self::UserAndDate { user_id, date } => {
                doc.put(USER_ID, user_id.as_str());
                doc.put("date", *date);
            }
        }
        doc
    }

    /// Filter for a row known only by its raw relational columns.
    ///
    /// Physically deleted rows arrive with whatever columns the change feed
    /// kept; only the natural-key columns of the table are required.
    pub fn from_row_json(table: SyncTable, row: &Value) -> Result<Self> {
        let text = |column: &str| {
            row.get(column)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidInput(format!("{table} row has no `{column}`")))
        };
        Ok(match LookupStrategy::for_table(table) {
            LookupStrategy::SourceId => Self::SourceId(
                row.get("id")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| Error::InvalidInput(format!("{table} row has no `id`")))?,
            ),
            LookupStrategy::User => Self::User {
                user_id: text("user_id")?,
            },
            LookupStrategy::UserAndMuscleGroup => Self::UserAndMuscleGroup {
                user_id: text("user_id")?,
                muscle_group: text("muscle_group")?,
            },
            LookupStrategy::UserAndDate => Self::UserAndDate {
                user_id: text("user_id")?,
                date: text("date")?.parse::<NaiveDate>().map_err(|error| {
                    Error::InvalidInput(format!("{table} row has an invalid `date`: {error}"))
                })?,
            },
        })
    }
}

/// Map a relational row to its sparse document shape.
///
/// `None` fields are omitted; `deletedAt` is always present on tombstones.
pub fn to_remote_shape(row: &RelationalRow) -> Document {
    let record = &row.record;
    let mut doc = Document::new();
    doc.put(SOURCE_ID, row.source_id);
    doc.put(RECORD_ID, record.id.as_str());
    doc.put(USER_ID, record.user_id.as_str());
    doc.put(VERSION, record.version);
    doc.put(UPDATED_AT, record.updated_at);
    match record.state {
        RecordState::Active => {}
        RecordState::Tombstoned { deleted_at } => doc.put(DELETED_AT, deleted_at),
    }
    mapping::write_entity(&record.entity, &mut doc);
    doc
}

/// Keys of a stored document that its replacement no longer carries.
///
/// Unsetting them makes the stored document equal to the row's shape: a
/// restored record loses `deletedAt`, a cleared optional field disappears.
/// The store-minted `_id` is kept.
pub fn stale_fields(stored: &Document, replacement: &Document) -> Vec<String> {
    stored
        .keys()
        .filter(|key| *key != "_id" && !replacement.contains(key))
        .map(str::to_string)
        .collect()
}

/// Build the natural-key filter for a relational row
pub fn build_lookup_filter(row: &RelationalRow) -> LookupFilter {
    let user_id = row.record.user_id.clone();
    match &row.record.entity {
        Entity::Workout(_)
        | Entity::Exercise(_)
        | Entity::WorkoutTemplate(_)
        | Entity::PlannedWorkout(_)
        | Entity::Notification(_)
        | Entity::ErrorLog(_) => LookupFilter::SourceId(row.source_id),
        Entity::UserProfile(_) | Entity::Settings(_) => LookupFilter::User { user_id },
        Entity::MuscleStatus(status) => LookupFilter::UserAndMuscleGroup {
            user_id,
            muscle_group: status.muscle_group.clone(),
        },
        Entity::SleepLog(log) => LookupFilter::UserAndDate {
            user_id,
            date: log.date,
        },
        Entity::RecoveryLog(log) => LookupFilter::UserAndDate {
            user_id,
            date: log.date,
        },
    }
}

/// Map a document back to a relational row
pub fn from_remote_shape(table: SyncTable, doc: &Document) -> Result<RelationalRow> {
    let version = u32::try_from(doc.int(VERSION)?)
        .map_err(|_| Error::InvalidInput("document version out of range".to_string()))?;
    let record = SyncRecord {
        id: RecordId::from(doc.text(RECORD_ID)?),
        user_id: doc.text(USER_ID)?,
        version,
        updated_at: doc.timestamp(UPDATED_AT)?,
        state: RecordState::from_deleted_at(doc.opt_timestamp(DELETED_AT)?),
        entity: mapping::read_entity(table, doc)?,
    };
    record.validate()?;
    Ok(RelationalRow {
        source_id: doc.int(SOURCE_ID)?,
        record,
    })
}

/// Version stored on a document, if any
pub fn document_version(doc: &Document) -> Option<u32> {
    match doc.get(VERSION) {
        Some(DocValue::Int(version)) => u32::try_from(*version).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ErrorLog, Exercise, MuscleStatus, Notification, PlannedWorkout, RecoveryLog, SleepLog,
        UserProfile, UserSettings, Workout, WorkoutTemplate,
    };
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn row(entity: Entity) -> RelationalRow {
        let mut record = SyncRecord::new("user-1", entity);
        record.id = RecordId::from("rec-1");
        record.updated_at = at("2024-05-01T10:00:00Z");
        RelationalRow {
            source_id: 17,
            record,
        }
    }

    fn sample(table: SyncTable) -> Entity {
        match table {
            SyncTable::Workouts => Entity::Workout(Workout {
                name: "Push".to_string(),
                started_at: at("2024-05-01T09:00:00Z"),
                completed_at: Some(at("2024-05-01T10:00:00Z")),
                duration_seconds: Some(3600),
                calories_burned: Some(410.5),
                notes: None,
            }),
            SyncTable::Exercises => Entity::Exercise(Exercise {
                name: "Squat".to_string(),
                muscle_group: "quads".to_string(),
                equipment: Some("barbell".to_string()),
                category: None,
            }),
            SyncTable::WorkoutTemplates => Entity::WorkoutTemplate(WorkoutTemplate {
                name: "5x5".to_string(),
                description: None,
                exercise_ids: vec!["e1".to_string(), "e2".to_string()],
            }),
            SyncTable::PlannedWorkouts => Entity::PlannedWorkout(PlannedWorkout {
                name: "Legs".to_string(),
                scheduled_date: day(),
                template_id: Some("t1".to_string()),
                completed: false,
            }),
            SyncTable::MuscleStatuses => Entity::MuscleStatus(MuscleStatus {
                muscle_group: "chest".to_string(),
                recovery_percentage: 75.0,
                last_worked_at: None,
            }),
            SyncTable::UserProfiles => Entity::UserProfile(UserProfile {
                display_name: "Sam".to_string(),
                weight_kg: Some(72.0),
                height_cm: None,
                fitness_goal: Some("strength".to_string()),
            }),
            SyncTable::Settings => Entity::Settings(UserSettings {
                units: "metric".to_string(),
                rest_timer_seconds: 90,
                notifications_enabled: true,
            }),
            SyncTable::Notifications => Entity::Notification(Notification {
                title: "Rest day".to_string(),
                body: "Take it easy".to_string(),
                scheduled_at: None,
                read: true,
            }),
            SyncTable::SleepLogs => Entity::SleepLog(SleepLog {
                date: day(),
                hours: 7.5,
                quality: Some(4),
            }),
            SyncTable::RecoveryLogs => Entity::RecoveryLog(RecoveryLog {
                date: day(),
                score: 8.0,
                notes: None,
            }),
            SyncTable::ErrorLogs => Entity::ErrorLog(ErrorLog {
                message: "boom".to_string(),
                occurred_at: at("2024-05-01T08:00:00Z"),
                context: None,
            }),
        }
    }

    #[test]
    fn every_table_maps_both_ways() {
        for table in SyncTable::ALL {
            let original = row(sample(table));
            let doc = to_remote_shape(&original);
            let restored = from_remote_shape(table, &doc).unwrap();
            assert_eq!(restored, original, "{table}");
        }
    }

    #[test]
    fn filter_strategy_is_fixed_per_table() {
        for table in SyncTable::ALL {
            let filter = build_lookup_filter(&row(sample(table)));
            assert_eq!(filter.strategy(), LookupStrategy::for_table(table), "{table}");
        }
    }

    #[test]
    fn document_keys_are_camel_case_with_source_id() {
        let doc = to_remote_shape(&row(sample(SyncTable::Workouts)));
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(
            keys,
            vec![
                "_sourceId",
                "caloriesBurned",
                "completedAt",
                "durationSeconds",
                "name",
                "recordId",
                "startedAt",
                "updatedAt",
                "userId",
                "version",
            ]
        );
        assert_eq!(doc.int(SOURCE_ID).unwrap(), 17);
        assert!(!doc.contains("_id"));
    }

    #[test]
    fn timestamps_and_dates_are_native() {
        let doc = to_remote_shape(&row(sample(SyncTable::SleepLogs)));
        assert!(matches!(doc.get("date"), Some(DocValue::Timestamp(_))));
        assert!(matches!(doc.get(UPDATED_AT), Some(DocValue::Timestamp(_))));
        assert_eq!(
            doc.to_ejson()["date"],
            serde_json::json!({ "$date": "2024-05-01T00:00:00.000Z" })
        );
    }

    #[test]
    fn nulls_are_dropped_but_tombstones_are_written() {
        let mut original = row(sample(SyncTable::RecoveryLogs));
        let live = to_remote_shape(&original);
        assert!(!live.contains("notes"));
        assert!(!live.contains(DELETED_AT));

        original.record.soft_delete();
        let dead = to_remote_shape(&original);
        assert!(matches!(dead.get(DELETED_AT), Some(DocValue::Timestamp(_))));
        assert_eq!(document_version(&dead), Some(2));
    }

    #[test]
    fn composite_filters_use_natural_keys() {
        let filter = build_lookup_filter(&row(sample(SyncTable::MuscleStatuses)));
        assert_eq!(
            filter,
            LookupFilter::UserAndMuscleGroup {
                user_id: "user-1".to_string(),
                muscle_group: "chest".to_string(),
            }
        );

        let doc = filter.to_document();
        assert!(to_remote_shape(&row(sample(SyncTable::MuscleStatuses))).matches(&doc));
    }

    #[test]
    fn filters_build_from_raw_deleted_rows() {
        let old = serde_json::json!({ "id": 42, "user_id": "user-1" });
        assert_eq!(
            LookupFilter::from_row_json(SyncTable::Workouts, &old).unwrap(),
            LookupFilter::SourceId(42)
        );

        let old = serde_json::json!({ "user_id": "user-1", "date": "2024-05-01" });
        assert_eq!(
            LookupFilter::from_row_json(SyncTable::SleepLogs, &old).unwrap(),
            LookupFilter::UserAndDate {
                user_id: "user-1".to_string(),
                date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            }
        );

        let missing = serde_json::json!({ "user_id": "user-1" });
        assert!(LookupFilter::from_row_json(SyncTable::MuscleStatuses, &missing).is_err());
    }

    #[test]
    fn from_remote_shape_rejects_incomplete_documents() {
        let mut doc = to_remote_shape(&row(sample(SyncTable::Exercises)));
        doc.remove("muscleGroup");
        assert!(from_remote_shape(SyncTable::Exercises, &doc).is_err());
    }

    #[test]
    fn restored_and_cleared_fields_are_stale() {
        let mut stored_row = row(sample(SyncTable::Workouts));
        stored_row.record.soft_delete();
        let mut stored = to_remote_shape(&stored_row);
        stored.put("_id", "65f0c0ffee");

        let mut restored = stored_row.clone();
        restored.record.restore();
        assert_eq!(
            stale_fields(&stored, &to_remote_shape(&restored)),
            vec![DELETED_AT.to_string()]
        );

        let Entity::Workout(mut workout) = restored.record.entity.clone() else {
            unreachable!()
        };
        workout.calories_burned = None;
        restored.record.update(Entity::Workout(workout)).unwrap();
        let mut stale = stale_fields(&stored, &to_remote_shape(&restored));
        stale.sort();
        assert_eq!(stale, vec!["caloriesBurned".to_string(), DELETED_AT.to_string()]);
    }
}
