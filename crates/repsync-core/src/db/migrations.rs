//! Database migrations
//!
//! The on-device store and the relational backing store have separate
//! schemas but share the bookkeeping tables (`sync_metadata`,
//! `sync_error_log`) so one repository serves both.

use crate::error::Result;
use crate::models::SyncTable;
use libsql::Connection;

/// Current on-device schema version
const LOCAL_VERSION: i32 = 2;

/// Current relational schema version
const RELATIONAL_VERSION: i32 = 2;

const SCHEMA_VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
)";

const SYNC_METADATA_TABLE: &str = "CREATE TABLE IF NOT EXISTS sync_metadata (
    table_name TEXT NOT NULL,
    user_id TEXT NOT NULL,
    last_sync_at INTEGER,
    status TEXT NOT NULL DEFAULT 'idle',
    conflict_count INTEGER NOT NULL DEFAULT 0,
    record_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    last_error_at INTEGER,
    last_successful_sync_at INTEGER,
    last_push_at INTEGER,
    last_pull_at INTEGER,
    last_pull_fingerprint TEXT,
    PRIMARY KEY (table_name, user_id)
)";

const SYNC_ERROR_LOG_TABLE: &str = "CREATE TABLE IF NOT EXISTS sync_error_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name TEXT NOT NULL,
    user_id TEXT NOT NULL,
    record_id TEXT,
    operation TEXT NOT NULL,
    error TEXT NOT NULL,
    occurred_at INTEGER NOT NULL
)";

const SYNC_METADATA_PULL_CURSOR: &str = "ALTER TABLE sync_metadata ADD COLUMN pull_cursor INTEGER";

const SYNC_ERROR_LOG_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_sync_error_log_user
    ON sync_error_log(user_id, occurred_at DESC)";

/// Run all pending on-device migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        apply(
            conn,
            1,
            [
                SCHEMA_VERSION_TABLE.to_string(),
                "CREATE TABLE IF NOT EXISTS local_records (
                    table_name TEXT NOT NULL,
                    id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    deleted_at INTEGER,
                    data TEXT NOT NULL,
                    synced_version INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (table_name, id)
                )"
                .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_local_records_user
                    ON local_records(user_id, table_name, updated_at DESC)"
                    .to_string(),
                SYNC_METADATA_TABLE.to_string(),
                SYNC_ERROR_LOG_TABLE.to_string(),
                SYNC_ERROR_LOG_INDEX.to_string(),
            ],
        )
        .await?;
        tracing::info!("Migrated local database to version 1");
    }

    if version < 2 {
        apply(conn, 2, [SYNC_METADATA_PULL_CURSOR.to_string()]).await?;
        tracing::info!("Migrated local database to version {LOCAL_VERSION}");
    }

    Ok(())
}

/// Run all pending relational backing store migrations
pub async fn run_relational(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        let mut statements = vec![SCHEMA_VERSION_TABLE.to_string()];
        for table in SyncTable::ALL {
            statements.push(format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    record_id TEXT NOT NULL UNIQUE,
                    user_id TEXT NOT NULL CHECK (length(trim(user_id)) > 0),
                    version INTEGER NOT NULL CHECK (version >= 1),
                    updated_at INTEGER NOT NULL,
                    deleted_at INTEGER,
                    data TEXT NOT NULL
                )"
            ));
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_user_updated
                    ON {table}(user_id, updated_at)"
            ));
        }
        statements.push(SYNC_METADATA_TABLE.to_string());
        statements.push(SYNC_ERROR_LOG_TABLE.to_string());
        statements.push(SYNC_ERROR_LOG_INDEX.to_string());

        apply(conn, 1, statements).await?;
        tracing::info!("Migrated relational database to version 1");
    }

    if version < 2 {
        let mut statements = Vec::new();
        for table in SyncTable::ALL {
            statements.push(format!(
                "ALTER TABLE {table} ADD COLUMN change_seq INTEGER NOT NULL DEFAULT 0"
            ));
            statements.push(format!("UPDATE {table} SET change_seq = id"));
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_user_change
                    ON {table}(user_id, change_seq)"
            ));
            if let Some(columns) = natural_key(table) {
                statements.push(format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_natural_key
                        ON {table}({columns}) WHERE deleted_at IS NULL"
                ));
            }
        }
        statements.push(SYNC_METADATA_PULL_CURSOR.to_string());

        apply(conn, 2, statements).await?;
        tracing::info!("Migrated relational database to version {RELATIONAL_VERSION}");
    }

    Ok(())
}

/// Index columns of the one-live-record-per-key tables
const fn natural_key(table: SyncTable) -> Option<&'static str> {
    match table {
        SyncTable::UserProfiles | SyncTable::Settings => Some("user_id"),
        SyncTable::MuscleStatuses => Some("user_id, json_extract(data, '$.muscle_group')"),
        SyncTable::SleepLogs | SyncTable::RecoveryLogs => {
            Some("user_id, json_extract(data, '$.date')")
        }
        SyncTable::Workouts
        | SyncTable::Exercises
        | SyncTable::WorkoutTemplates
        | SyncTable::PlannedWorkouts
        | SyncTable::Notifications
        | SyncTable::ErrorLogs => None,
    }
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Run a migration's statements in one transaction and record its version
async fn apply(
    conn: &Connection,
    version: i32,
    statements: impl IntoIterator<Item = String>,
) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(&stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            libsql::params![version],
        )
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, name: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM sqlite_master
                    WHERE type = 'table' AND name = ?1
                )",
                libsql::params![name],
            )
            .await
            .unwrap();

        rows.next()
            .await
            .unwrap()
            .is_some_and(|row| row.get::<i32>(0).unwrap() != 0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, LOCAL_VERSION);
        assert!(table_exists(&conn, "local_records").await);
        assert!(table_exists(&conn, "sync_metadata").await);
        assert!(table_exists(&conn, "sync_error_log").await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, LOCAL_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_relational_migrations_create_every_table() {
        let conn = setup().await;
        run_relational(&conn).await.unwrap();
        run_relational(&conn).await.unwrap();

        assert_eq!(get_version(&conn).await.unwrap(), RELATIONAL_VERSION);
        for table in SyncTable::ALL {
            assert!(table_exists(&conn, table.as_str()).await, "{table}");
        }
        assert!(table_exists(&conn, "sync_metadata").await);
        assert!(!table_exists(&conn, "local_records").await);
    }

    async fn insert_muscle_status(
        conn: &Connection,
        record_id: &str,
        deleted_at: &str,
    ) -> libsql::Result<u64> {
        conn.execute(
            &format!(
                "INSERT INTO muscle_statuses
                    (record_id, user_id, version, updated_at, deleted_at, data)
                 VALUES ('{record_id}', 'user-1', 1, 0, {deleted_at}, '{{\"muscle_group\": \"quads\"}}')"
            ),
            (),
        )
        .await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn relational_tables_carry_a_change_sequence() {
        let conn = setup().await;
        run_relational(&conn).await.unwrap();

        conn.execute(
            "INSERT INTO workouts (record_id, user_id, version, updated_at, data)
             VALUES ('w1', 'user-1', 1, 0, '{}')",
            (),
        )
        .await
        .unwrap();
        let mut rows = conn
            .query("SELECT change_seq FROM workouts WHERE record_id = 'w1'", ())
            .await
            .unwrap();
        let seq: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(seq, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn only_one_live_row_per_natural_key() {
        let conn = setup().await;
        run_relational(&conn).await.unwrap();

        insert_muscle_status(&conn, "old", "10").await.unwrap();
        insert_muscle_status(&conn, "live", "NULL").await.unwrap();
        let err = insert_muscle_status(&conn, "duplicate", "NULL")
            .await
            .unwrap_err();
        assert!(err.to_string().to_ascii_lowercase().contains("unique"));
    }
}
