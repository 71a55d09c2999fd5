//! On-device record repository
//!
//! Every synchronized table shares one `local_records` table keyed by
//! `(table_name, id)`. A record is dirty while its `version` is ahead of
//! `synced_version`, the highest version confirmed by the relational store.

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite integers are i64

use chrono::{DateTime, Duration, Utc};
use libsql::{params, Connection, Row, Value};

use super::{millis_param, opt_millis, version_from_column};
use crate::error::{Error, Result};
use crate::models::{Entity, RecordId, RecordState, SyncRecord, SyncTable};

const RECORD_COLUMNS: &str = "table_name, id, user_id, version, updated_at, deleted_at, data";

/// Trait for on-device record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// Persist a local mutation; the record stays dirty until pushed
    async fn save(&self, record: &SyncRecord) -> Result<()>;

    /// Persist a record pulled from the relational store in place of local
    /// version `replacing` (`None` when there was no local copy).
    ///
    /// Returns `false` without writing when the local row is no longer at
    /// `replacing`, e.g. an edit was saved in the meantime. A written record
    /// is not dirty.
    async fn apply_remote(&self, record: &SyncRecord, replacing: Option<u32>) -> Result<bool>;

    /// Get a record, tombstones included
    async fn get(&self, table: SyncTable, id: &RecordId) -> Result<Option<SyncRecord>>;

    /// List a user's records in a table, newest first
    async fn list(
        &self,
        table: SyncTable,
        user_id: &str,
        include_deleted: bool,
    ) -> Result<Vec<SyncRecord>>;

    /// Records whose version is ahead of the last pushed version
    async fn list_dirty(&self, table: SyncTable, user_id: &str) -> Result<Vec<SyncRecord>>;

    /// Whether any record of the pair awaits a push
    async fn has_dirty(&self, table: SyncTable, user_id: &str) -> Result<bool>;

    /// Record that `version` reached the relational store.
    ///
    /// Only ever raises the synced version, so edits made while the push was
    /// in flight stay dirty.
    async fn mark_synced(&self, table: SyncTable, id: &RecordId, version: u32) -> Result<()>;

    /// Highest version of a record confirmed by the relational store; 0 when
    /// never pushed or unknown
    async fn synced_version(&self, table: SyncTable, id: &RecordId) -> Result<u32>;

    /// Number of live (non-tombstoned) records
    async fn count(&self, table: SyncTable, user_id: &str) -> Result<u64>;

    /// Physically delete pushed tombstones that are past `retention` at `now`
    async fn purge_tombstones(
        &self,
        table: SyncTable,
        user_id: &str,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<u64>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_records(
        &self,
        sql: &str,
        table: SyncTable,
        user_id: &str,
    ) -> Result<Vec<SyncRecord>> {
        let mut rows = self.conn.query(sql, params![table.as_str(), user_id]).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(parse_local_record(&row)?);
        }
        Ok(records)
    }
}

/// Payload column for a record
fn encode_data(record: &SyncRecord) -> Result<String> {
    record.validate()?;
    Ok(serde_json::to_string(&record.entity.to_value()?)?)
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn save(&self, record: &SyncRecord) -> Result<()> {
        let data = encode_data(record)?;
        // Local edits leave the synced marker alone.
        self.conn
            .execute(
                "INSERT INTO local_records
                    (table_name, id, user_id, version, updated_at, deleted_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(table_name, id) DO UPDATE SET
                    user_id = excluded.user_id,
                    version = excluded.version,
                    updated_at = excluded.updated_at,
                    deleted_at = excluded.deleted_at,
                    data = excluded.data",
                params![
                    record.table().as_str(),
                    record.id.as_str(),
                    record.user_id.as_str(),
                    i64::from(record.version),
                    record.updated_at.timestamp_millis(),
                    millis_param(record.state.deleted_at()),
                    data,
                ],
            )
            .await?;
        Ok(())
    }

    async fn apply_remote(&self, record: &SyncRecord, replacing: Option<u32>) -> Result<bool> {
        let data = encode_data(record)?;
        let written = self
            .conn
            .execute(
                "INSERT INTO local_records
                    (table_name, id, user_id, version, updated_at, deleted_at, data, synced_version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?4)
                 ON CONFLICT(table_name, id) DO UPDATE SET
                    user_id = excluded.user_id,
                    version = excluded.version,
                    updated_at = excluded.updated_at,
                    deleted_at = excluded.deleted_at,
                    data = excluded.data,
                    synced_version = excluded.synced_version
                 WHERE local_records.version IS ?8",
                params![
                    record.table().as_str(),
                    record.id.as_str(),
                    record.user_id.as_str(),
                    i64::from(record.version),
                    record.updated_at.timestamp_millis(),
                    millis_param(record.state.deleted_at()),
                    data,
                    replacing.map_or(Value::Null, |version| Value::Integer(i64::from(version))),
                ],
            )
            .await?;
        Ok(written > 0)
    }

    async fn get(&self, table: SyncTable, id: &RecordId) -> Result<Option<SyncRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM local_records WHERE table_name = ?1 AND id = ?2"
                ),
                params![table.as_str(), id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_local_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        table: SyncTable,
        user_id: &str,
        include_deleted: bool,
    ) -> Result<Vec<SyncRecord>> {
        let filter = if include_deleted {
            ""
        } else {
            " AND deleted_at IS NULL"
        };
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM local_records
                 WHERE table_name = ?1 AND user_id = ?2{filter}
                 ORDER BY updated_at DESC, id ASC"
            ),
            table,
            user_id,
        )
        .await
    }

    async fn list_dirty(&self, table: SyncTable, user_id: &str) -> Result<Vec<SyncRecord>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM local_records
                 WHERE table_name = ?1 AND user_id = ?2 AND version > synced_version
                 ORDER BY updated_at ASC, id ASC"
            ),
            table,
            user_id,
        )
        .await
    }

    async fn has_dirty(&self, table: SyncTable, user_id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM local_records
                    WHERE table_name = ?1 AND user_id = ?2 AND version > synced_version
                )",
                params![table.as_str(), user_id],
            )
            .await?;

        Ok(match rows.next().await? {
            Some(row) => row.get::<i64>(0)? != 0,
            None => false,
        })
    }

    async fn mark_synced(&self, table: SyncTable, id: &RecordId, version: u32) -> Result<()> {
        self.conn
            .execute(
                "UPDATE local_records
                 SET synced_version = MAX(synced_version, ?3)
                 WHERE table_name = ?1 AND id = ?2",
                params![table.as_str(), id.as_str(), i64::from(version)],
            )
            .await?;
        Ok(())
    }

    async fn synced_version(&self, table: SyncTable, id: &RecordId) -> Result<u32> {
        let mut rows = self
            .conn
            .query(
                "SELECT synced_version FROM local_records WHERE table_name = ?1 AND id = ?2",
                params![table.as_str(), id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => version_from_column(row.get::<i64>(0)?),
            None => Ok(0),
        }
    }

    async fn count(&self, table: SyncTable, user_id: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM local_records
                 WHERE table_name = ?1 AND user_id = ?2 AND deleted_at IS NULL",
                params![table.as_str(), user_id],
            )
            .await?;

        Ok(match rows.next().await? {
            Some(row) => row.get::<i64>(0)? as u64,
            None => 0,
        })
    }

    async fn purge_tombstones(
        &self,
        table: SyncTable,
        user_id: &str,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<u64> {
        let pushed_tombstones = self
            .query_records(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM local_records
                     WHERE table_name = ?1 AND user_id = ?2
                       AND deleted_at IS NOT NULL AND synced_version >= version"
                ),
                table,
                user_id,
            )
            .await?;

        let mut purged = 0;
        for record in pushed_tombstones
            .iter()
            .filter(|record| record.is_purgeable(now, retention))
        {
            // A restore saved since the read bumps the version and survives.
            purged += self
                .conn
                .execute(
                    "DELETE FROM local_records
                     WHERE table_name = ?1 AND id = ?2 AND version = ?3",
                    params![table.as_str(), record.id.as_str(), i64::from(record.version)],
                )
                .await?;
        }
        Ok(purged)
    }
}

fn parse_local_record(row: &Row) -> Result<SyncRecord> {
    let table_name: String = row.get(0)?;
    let table = table_name
        .parse::<SyncTable>()
        .map_err(|error| Error::Database(error.to_string()))?;
    let data: String = row.get(6)?;

    assemble_record(
        table,
        row.get::<String>(1)?,
        row.get::<String>(2)?,
        row.get::<i64>(3)?,
        row.get::<i64>(4)?,
        opt_millis(row, 5)?,
        &data,
    )
}

/// Rebuild a record from its stored columns and JSON payload
pub(crate) fn assemble_record(
    table: SyncTable,
    id: String,
    user_id: String,
    version: i64,
    updated_at_millis: i64,
    deleted_at: Option<DateTime<Utc>>,
    data: &str,
) -> Result<SyncRecord> {
    let entity = Entity::from_value(table, serde_json::from_str(data)?)?;
    Ok(SyncRecord {
        id: RecordId::from(id),
        user_id,
        version: version_from_column(version)?,
        updated_at: crate::util::from_millis(updated_at_millis),
        state: RecordState::from_deleted_at(deleted_at),
        entity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Exercise, Workout};
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn workout(name: &str) -> SyncRecord {
        SyncRecord::new(
            "user-1",
            Entity::Workout(Workout {
                name: name.to_string(),
                started_at: crate::util::from_millis(Utc::now().timestamp_millis()),
                completed_at: None,
                duration_seconds: Some(3600),
                calories_burned: None,
                notes: None,
            }),
        )
    }

    fn normalized(mut record: SyncRecord) -> SyncRecord {
        record.updated_at = crate::util::from_millis(record.updated_at.timestamp_millis());
        record.state = RecordState::from_deleted_at(
            record
                .state
                .deleted_at()
                .map(|at| crate::util::from_millis(at.timestamp_millis())),
        );
        record
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_and_get_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlRecordRepository::new(db.connection());

        let record = workout("Push day");
        repo.save(&record).await.unwrap();

        let loaded = repo
            .get(SyncTable::Workouts, &record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, normalized(record));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn saved_records_are_dirty_until_marked_synced() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlRecordRepository::new(db.connection());

        let mut record = workout("Legs");
        repo.save(&record).await.unwrap();
        assert!(repo.has_dirty(SyncTable::Workouts, "user-1").await.unwrap());

        repo.mark_synced(SyncTable::Workouts, &record.id, 1)
            .await
            .unwrap();
        assert!(repo
            .list_dirty(SyncTable::Workouts, "user-1")
            .await
            .unwrap()
            .is_empty());

        record.soft_delete();
        repo.save(&record).await.unwrap();
        let dirty = repo.list_dirty(SyncTable::Workouts, "user-1").await.unwrap();
        assert_eq!(dirty.len(), 1);
        assert!(dirty[0].is_tombstone());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mark_synced_never_lowers_the_marker() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlRecordRepository::new(db.connection());

        let mut record = workout("Pull");
        record.update(record.entity.clone()).unwrap();
        repo.save(&record).await.unwrap();

        repo.mark_synced(SyncTable::Workouts, &record.id, 2)
            .await
            .unwrap();
        repo.mark_synced(SyncTable::Workouts, &record.id, 1)
            .await
            .unwrap();
        assert!(!repo.has_dirty(SyncTable::Workouts, "user-1").await.unwrap());
        assert_eq!(
            repo.synced_version(SyncTable::Workouts, &record.id)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_remote_is_not_dirty() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlRecordRepository::new(db.connection());

        let record = workout("Remote");
        assert!(repo.apply_remote(&record, None).await.unwrap());
        assert!(!repo.has_dirty(SyncTable::Workouts, "user-1").await.unwrap());
        assert_eq!(repo.count(SyncTable::Workouts, "user-1").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_remote_never_overwrites_an_edit_saved_meanwhile() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlRecordRepository::new(db.connection());

        let mut local = workout("Local");
        local.version = 3;
        repo.save(&local).await.unwrap();
        let mut remote = local.clone();
        remote.version = 4;
        remote.entity = workout("Other device").entity;

        // The pull decided against version 3; the user saved version 4 first.
        local.update(workout("Edited during pull").entity).unwrap();
        repo.save(&local).await.unwrap();

        assert!(!repo.apply_remote(&remote, Some(3)).await.unwrap());
        let stored = repo
            .get(SyncTable::Workouts, &local.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.entity, local.entity);
        assert!(repo.has_dirty(SyncTable::Workouts, "user-1").await.unwrap());

        // A copy that appeared after an insert decision is left alone too.
        assert!(!repo.apply_remote(&remote, None).await.unwrap());

        assert!(repo.apply_remote(&remote, Some(4)).await.unwrap());
        assert!(!repo.has_dirty(SyncTable::Workouts, "user-1").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_filters_tombstones_and_tables() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlRecordRepository::new(db.connection());

        let live = workout("Live");
        let mut dead = workout("Dead");
        dead.soft_delete();
        let exercise = SyncRecord::new(
            "user-1",
            Entity::Exercise(Exercise {
                name: "Squat".to_string(),
                muscle_group: "quads".to_string(),
                equipment: None,
                category: None,
            }),
        );
        for record in [&live, &dead, &exercise] {
            repo.save(record).await.unwrap();
        }

        let active = repo.list(SyncTable::Workouts, "user-1", false).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, live.id);

        let all = repo.list(SyncTable::Workouts, "user-1", true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(repo.count(SyncTable::Workouts, "user-1").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn purge_only_removes_pushed_tombstones_past_retention() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlRecordRepository::new(db.connection());

        let mut pushed = workout("Pushed");
        pushed.soft_delete();
        let mut unpushed = workout("Unpushed");
        unpushed.soft_delete();
        repo.save(&pushed).await.unwrap();
        repo.save(&unpushed).await.unwrap();
        repo.mark_synced(SyncTable::Workouts, &pushed.id, pushed.version)
            .await
            .unwrap();

        let retention = Duration::days(30);
        let early = Utc::now() + Duration::days(29);
        assert_eq!(
            repo.purge_tombstones(SyncTable::Workouts, "user-1", early, retention)
                .await
                .unwrap(),
            0
        );

        let late = Utc::now() + Duration::days(31);
        assert_eq!(
            repo.purge_tombstones(SyncTable::Workouts, "user-1", late, retention)
                .await
                .unwrap(),
            1
        );
        assert!(repo
            .get(SyncTable::Workouts, &pushed.id)
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .get(SyncTable::Workouts, &unpushed.id)
            .await
            .unwrap()
            .is_some());
    }
}
