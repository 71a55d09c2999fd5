//! Versioned, soft-deletable records

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use super::{Entity, SyncTable};
use crate::error::{Error, Result};

/// Stable record identifier, opaque across stores.
///
/// Locally created records use UUID v7 (time-sortable); identifiers coming
/// from other stores are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Liveness of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Live record
    Active,
    /// Soft-deleted; kept so the deletion itself propagates
    Tombstoned { deleted_at: DateTime<Utc> },
}

impl RecordState {
    /// Build from a nullable `deleted_at` column
    pub const fn from_deleted_at(deleted_at: Option<DateTime<Utc>>) -> Self {
        match deleted_at {
            Some(deleted_at) => Self::Tombstoned { deleted_at },
            None => Self::Active,
        }
    }

    /// Nullable `deleted_at` column value
    pub const fn deleted_at(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Active => None,
            Self::Tombstoned { deleted_at } => Some(deleted_at),
        }
    }
}

/// A synchronizable record: identity, version metadata, and payload
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    /// Stable identifier
    pub id: RecordId,
    /// Owning user
    pub user_id: String,
    /// Monotonic mutation counter, starting at 1
    pub version: u32,
    /// Wall-clock time of the last mutation (informational, never decides conflicts)
    pub updated_at: DateTime<Utc>,
    /// Active or tombstoned
    pub state: RecordState,
    /// Domain payload
    pub entity: Entity,
}

impl SyncRecord {
    /// Create a new record at version 1
    #[must_use]
    pub fn new(user_id: impl Into<String>, entity: Entity) -> Self {
        Self {
            id: RecordId::new(),
            user_id: user_id.into(),
            version: 1,
            updated_at: Utc::now(),
            state: RecordState::Active,
            entity,
        }
    }

    /// Table the record belongs to
    pub const fn table(&self) -> SyncTable {
        self.entity.table()
    }

    /// Whether the record is a tombstone
    pub const fn is_tombstone(&self) -> bool {
        matches!(self.state, RecordState::Tombstoned { .. })
    }

    /// Replace the payload, bumping the version by one.
    ///
    /// The payload must stay in the same table.
    pub fn update(&mut self, entity: Entity) -> Result<()> {
        if entity.table() != self.table() {
            return Err(Error::InvalidInput(format!(
                "cannot move record {} from {} to {}",
                self.id,
                self.table(),
                entity.table()
            )));
        }
        self.entity = entity;
        self.touch();
        Ok(())
    }

    /// Soft delete: mark as tombstone and bump the version.
    ///
    /// The payload is kept for conflict comparison and undo. Deleting a
    /// tombstone is a no-op.
    pub fn soft_delete(&mut self) {
        if self.is_tombstone() {
            return;
        }
        let now = Utc::now();
        self.state = RecordState::Tombstoned { deleted_at: now };
        self.touch_at(now);
    }

    /// Bring a tombstone back to life, bumping the version.
    pub fn restore(&mut self) {
        if self.is_tombstone() {
            self.state = RecordState::Active;
            self.touch();
        }
    }

    /// Whether this tombstone is old enough to be physically purged
    pub fn is_purgeable(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        match self.state {
            RecordState::Active => false,
            RecordState::Tombstoned { deleted_at } => deleted_at + retention <= now,
        }
    }

    /// Reject records no store should accept
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(Error::InvalidInput("record id is empty".to_string()));
        }
        if self.user_id.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "record {} has no user id",
                self.id
            )));
        }
        if self.version == 0 {
            return Err(Error::InvalidInput(format!(
                "record {} has version 0",
                self.id
            )));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.touch_at(Utc::now());
    }

    fn touch_at(&mut self, now: DateTime<Utc>) {
        self.version = self.version.saturating_add(1);
        // Keep updated_at monotonic even if the device clock moved backwards.
        self.updated_at = now.max(self.updated_at);
    }
}

/// A record as stored in the relational backing store.
///
/// `source_id` is the relational integer primary key; the opaque record id
/// travels as `record_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationalRow {
    /// Relational primary key
    pub source_id: i64,
    /// The synchronized record
    pub record: SyncRecord,
}

#[derive(Deserialize)]
struct RowColumns {
    id: i64,
    record_id: String,
    user_id: String,
    version: u32,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    deleted_at: Option<DateTime<Utc>>,
}

impl RelationalRow {
    /// Decode a relational row as delivered by change webhooks
    pub fn from_json(table: SyncTable, value: Value) -> Result<Self> {
        let columns: RowColumns = serde_json::from_value(value.clone())?;
        let entity = Entity::from_value(table, value)?;
        let row = Self {
            source_id: columns.id,
            record: SyncRecord {
                id: RecordId::from(columns.record_id),
                user_id: columns.user_id,
                version: columns.version,
                updated_at: columns.updated_at,
                state: RecordState::from_deleted_at(columns.deleted_at),
                entity,
            },
        };
        row.record.validate()?;
        Ok(row)
    }

    /// Encode as a flat relational row
    pub fn to_json(&self) -> Result<Value> {
        let mut map = match self.record.entity.to_value()? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        map.insert("id".to_string(), Value::from(self.source_id));
        map.insert(
            "record_id".to_string(),
            Value::from(self.record.id.as_str()),
        );
        map.insert("user_id".to_string(), Value::from(self.record.user_id.as_str()));
        map.insert("version".to_string(), Value::from(self.record.version));
        map.insert(
            "updated_at".to_string(),
            serde_json::to_value(self.record.updated_at)?,
        );
        map.insert(
            "deleted_at".to_string(),
            serde_json::to_value(self.record.state.deleted_at())?,
        );
        Ok(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Exercise, Workout};
    use serde_json::json;

    fn workout() -> Entity {
        Entity::Workout(Workout {
            name: "Push day".to_string(),
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            calories_burned: None,
            notes: None,
        })
    }

    #[test]
    fn new_record_starts_at_version_one() {
        let record = SyncRecord::new("user-1", workout());
        assert_eq!(record.version, 1);
        assert_eq!(record.state, RecordState::Active);
        assert_eq!(record.table(), SyncTable::Workouts);
    }

    #[test]
    fn every_mutation_bumps_version_once() {
        let mut record = SyncRecord::new("user-1", workout());
        record.update(workout()).unwrap();
        record.update(workout()).unwrap();
        record.soft_delete();
        record.restore();
        assert_eq!(record.version, 5);
    }

    #[test]
    fn soft_delete_keeps_payload() {
        let mut record = SyncRecord::new("user-1", workout());
        let payload = record.entity.clone();
        record.soft_delete();
        assert!(record.is_tombstone());
        assert_eq!(record.version, 2);
        assert_eq!(record.entity, payload);

        record.soft_delete();
        assert_eq!(record.version, 2);
    }

    #[test]
    fn update_rejects_table_change() {
        let mut record = SyncRecord::new("user-1", workout());
        let err = record
            .update(Entity::Exercise(Exercise {
                name: "Squat".to_string(),
                muscle_group: "quads".to_string(),
                equipment: None,
                category: None,
            }))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(record.version, 1);
    }

    #[test]
    fn tombstones_become_purgeable_after_retention() {
        let mut record = SyncRecord::new("user-1", workout());
        record.soft_delete();
        let deleted_at = record.state.deleted_at().unwrap();
        let retention = Duration::days(30);

        assert!(!record.is_purgeable(deleted_at + Duration::days(29), retention));
        assert!(record.is_purgeable(deleted_at + Duration::days(30), retention));
    }

    #[test]
    fn validate_rejects_missing_user() {
        let mut record = SyncRecord::new("", workout());
        assert!(record.validate().is_err());
        record.user_id = "user-1".to_string();
        record.version = 0;
        assert!(record.validate().is_err());
    }

    #[test]
    fn relational_row_parses_webhook_shape() {
        let row = RelationalRow::from_json(
            SyncTable::Workouts,
            json!({
                "id": 42,
                "record_id": "rec-1",
                "user_id": "user-1",
                "version": 3,
                "updated_at": "2024-05-01T10:00:00Z",
                "deleted_at": "2024-05-02T10:00:00Z",
                "name": "Leg day",
                "started_at": "2024-05-01T09:00:00Z",
            }),
        )
        .unwrap();

        assert_eq!(row.source_id, 42);
        assert_eq!(row.record.id.as_str(), "rec-1");
        assert_eq!(row.record.version, 3);
        assert!(row.record.is_tombstone());
    }

    #[test]
    fn relational_row_to_json_carries_columns() {
        let row = RelationalRow {
            source_id: 9,
            record: SyncRecord::new("user-1", workout()),
        };
        let value = row.to_json().unwrap();
        assert_eq!(value["id"], 9);
        assert_eq!(value["user_id"], "user-1");
        assert_eq!(value["version"], 1);
        assert!(value["deleted_at"].is_null());
        assert_eq!(value["name"], "Push day");
    }
}
