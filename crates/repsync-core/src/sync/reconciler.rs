//! Table passes between the on-device store and the relational store

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};

use super::locks::SyncLocks;
use crate::config::SyncSettings;
use crate::db::{
    Database, LibSqlErrorLogRepository, LibSqlMetadataRepository, LibSqlRecordRepository,
    RecordRepository, SyncErrorLogRepository, SyncMetadataRepository,
};
use crate::error::{Error, Result};
use crate::fingerprint::fingerprint_records;
use crate::models::{
    SyncError, SyncMetadata, SyncOperation, SyncRecord, SyncResult, SyncStatus, SyncTable,
    UpsertOutcome,
};
use crate::remote::{ChangeBatch, RelationalStore, RemoteError};

/// Which halves of a pass to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncDirection {
    Push,
    Pull,
    #[default]
    Both,
}

impl SyncDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
            Self::Both => "both",
        }
    }

    pub const fn pulls(self) -> bool {
        matches!(self, Self::Pull | Self::Both)
    }

    pub const fn pushes(self) -> bool {
        matches!(self, Self::Push | Self::Both)
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" => Ok(Self::Push),
            "pull" => Ok(Self::Pull),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown sync direction: {other}")),
        }
    }
}

/// Who asked for the pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncTrigger {
    /// A user pressed "sync now"
    #[default]
    Manual,
    /// Periodic background or cron pass; subject to the cooldown
    Scheduled,
}

/// A "sync now" request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub user_id: String,
    /// Tables to sync; empty means every table
    pub tables: Vec<SyncTable>,
    pub direction: SyncDirection,
    /// Ignore the pull cursor and the cooldown
    pub force_full_sync: bool,
    pub trigger: SyncTrigger,
}

impl SyncRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tables: Vec::new(),
            direction: SyncDirection::default(),
            force_full_sync: false,
            trigger: SyncTrigger::default(),
        }
    }

    #[must_use]
    pub fn tables(mut self, tables: impl IntoIterator<Item = SyncTable>) -> Self {
        self.tables = tables.into_iter().collect();
        self
    }

    #[must_use]
    pub fn direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn force_full_sync(mut self, force: bool) -> Self {
        self.force_full_sync = force;
        self
    }

    #[must_use]
    pub fn scheduled(mut self) -> Self {
        self.trigger = SyncTrigger::Scheduled;
        self
    }

    /// Requested tables without duplicates, in request order
    fn resolved_tables(&self) -> Vec<SyncTable> {
        if self.tables.is_empty() {
            return SyncTable::ALL.to_vec();
        }
        let mut tables = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            if !tables.contains(table) {
                tables.push(*table);
            }
        }
        tables
    }
}

/// What a pull does with one fetched record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No local copy
    Insert,
    /// Remote version is strictly higher; the whole local record is replaced
    Overwrite,
    /// Remote version is the same or lower; counted as a conflict
    KeepLocal,
}

/// Decide a pulled record against the local copy, by version only
pub fn resolve(local: Option<&SyncRecord>, remote: &SyncRecord) -> Resolution {
    match local {
        None => Resolution::Insert,
        Some(local) if remote.version > local.version => Resolution::Overwrite,
        Some(_) => Resolution::KeepLocal,
    }
}

#[derive(Debug, Clone, Copy)]
struct PassOptions {
    direction: SyncDirection,
    force: bool,
    trigger: SyncTrigger,
}

/// Runs push/pull passes for one device
#[derive(Clone)]
pub struct Reconciler {
    db: Arc<Database>,
    remote: Arc<dyn RelationalStore>,
    locks: SyncLocks,
    settings: SyncSettings,
}

impl Reconciler {
    pub fn new(db: Arc<Database>, remote: Arc<dyn RelationalStore>, settings: SyncSettings) -> Self {
        Self {
            db,
            remote,
            locks: SyncLocks::new(),
            settings,
        }
    }

    /// Share an in-flight registry with other reconcilers of the same device
    #[must_use]
    pub fn with_locks(mut self, locks: SyncLocks) -> Self {
        self.locks = locks;
        self
    }

    pub const fn locks(&self) -> &SyncLocks {
        &self.locks
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Run the requested passes, seeding the relational store first when this
    /// device has never pushed.
    ///
    /// Transport failures surface as results in `error` status; only local
    /// storage failures are returned as `Err`.
    pub async fn sync(&self, request: &SyncRequest) -> Result<Vec<SyncResult>> {
        let user_id = request.user_id.trim();
        if user_id.is_empty() {
            return Err(Error::InvalidInput("user id is required to sync".to_string()));
        }

        let mut results = Vec::new();

        if self.needs_bootstrap(user_id).await? {
            tracing::info!(user = user_id, "First sync on this device, pushing local records");
            let options = PassOptions {
                direction: SyncDirection::Push,
                force: true,
                trigger: SyncTrigger::Manual,
            };
            for table in SyncTable::BOOTSTRAP {
                merge_into(&mut results, self.run_pass(table, user_id, options).await?);
            }
        }

        let options = PassOptions {
            direction: request.direction,
            force: request.force_full_sync,
            trigger: request.trigger,
        };
        for table in request.resolved_tables() {
            merge_into(&mut results, self.run_pass(table, user_id, options).await?);
        }

        Ok(results)
    }

    async fn needs_bootstrap(&self, user_id: &str) -> Result<bool> {
        let metadata = LibSqlMetadataRepository::new(self.db.connection())
            .get(SyncTable::Workouts, user_id)
            .await?;
        Ok(metadata.and_then(|metadata| metadata.last_push_at).is_none())
    }

    async fn run_pass(
        &self,
        table: SyncTable,
        user_id: &str,
        options: PassOptions,
    ) -> Result<SyncResult> {
        let Some(_guard) = self.locks.try_acquire(table, user_id) else {
            tracing::debug!(table = %table, user = user_id, "Pass already running, coalescing");
            return Ok(SyncResult::empty(table, SyncStatus::Syncing));
        };

        let metadata_repo = LibSqlMetadataRepository::new(self.db.connection());
        let mut metadata = metadata_repo.get_or_default(table, user_id).await?;
        let started_at = Utc::now();

        if options.trigger == SyncTrigger::Scheduled
            && !options.force
            && metadata.synced_within(started_at, self.settings.cooldown)
        {
            tracing::debug!(table = %table, user = user_id, "Synced recently, skipping");
            return Ok(SyncResult::empty(table, metadata.status));
        }

        metadata.mark_syncing();
        metadata_repo.save(&metadata).await?;

        let clock = Instant::now();
        let mut result = SyncResult::empty(table, SyncStatus::Syncing);
        let outcome = self.exchange(&mut metadata, &mut result, options).await;
        result.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(()) => {
                self.finish(&mut metadata, &mut result, started_at, options)
                    .await?;
                Ok(result)
            }
            Err(Error::Remote(error)) => {
                tracing::warn!(
                    table = %table,
                    user = user_id,
                    processed = result.records_processed,
                    "Sync pass aborted: {error}"
                );
                metadata.mark_error(error.to_string());
                metadata_repo.save(&metadata).await?;
                self.log_errors(user_id, &result.errors).await?;
                result.status = SyncStatus::Error;
                Ok(result)
            }
            Err(error) => {
                metadata.mark_error(error.to_string());
                if let Err(save_error) = metadata_repo.save(&metadata).await {
                    tracing::warn!(table = %table, "Failed to record sync error: {save_error}");
                }
                Err(error)
            }
        }
    }

    async fn exchange(
        &self,
        metadata: &mut SyncMetadata,
        result: &mut SyncResult,
        options: PassOptions,
    ) -> Result<()> {
        if options.direction.pulls() {
            self.pull(metadata, result, options.force).await?;
        }
        if options.direction.pushes() {
            self.push(metadata, result).await?;
        }
        Ok(())
    }

    async fn pull(
        &self,
        metadata: &mut SyncMetadata,
        result: &mut SyncResult,
        force: bool,
    ) -> Result<()> {
        let table = metadata.table;
        let user_id = metadata.user_id.clone();
        let records = LibSqlRecordRepository::new(self.db.connection());

        let after = if force { None } else { metadata.pull_cursor };
        let ChangeBatch {
            rows: fetched,
            cursor,
        } = self.remote.fetch_changes(table, &user_id, after).await?;

        let mut rows = Vec::with_capacity(fetched.len());
        let mut malformed = 0_usize;
        for entry in fetched {
            match entry {
                Ok(row) => rows.push(row.record),
                Err(bad) => {
                    malformed += 1;
                    result.record_failed(SyncError::new(
                        table,
                        bad.record_id,
                        SyncOperation::Read,
                        bad.reason,
                    ));
                }
            }
        }

        let fingerprint = fingerprint_records(&rows, rows.len());
        let already_applied = malformed == 0
            && metadata.last_pull_fingerprint.as_deref() == Some(fingerprint.as_str())
            && !records.has_dirty(table, &user_id).await?;

        if already_applied {
            tracing::debug!(table = %table, user = %user_id, "Pulled set unchanged, nothing to apply");
        } else {
            for remote in &rows {
                apply_pulled(&records, remote, self.settings.tombstone_retention, result).await?;
            }
        }

        metadata.advance_cursor(cursor);
        metadata.last_pull_at = Some(Utc::now());
        metadata.last_pull_fingerprint = Some(fingerprint.to_string());
        Ok(())
    }

    async fn push(&self, metadata: &mut SyncMetadata, result: &mut SyncResult) -> Result<()> {
        let table = metadata.table;
        let records = LibSqlRecordRepository::new(self.db.connection());
        let dirty = records.list_dirty(table, &metadata.user_id).await?;

        for record in &dirty {
            match self.remote.upsert(record).await {
                Ok(UpsertOutcome::Unchanged) => {
                    self.adopt_remote(&records, record, result).await?;
                }
                Ok(outcome) => {
                    records.mark_synced(table, &record.id, record.version).await?;
                    result.record_applied(outcome, record.is_tombstone());
                }
                Err(RemoteError::Rejected(reason)) => {
                    tracing::warn!(table = %table, record = %record.id, "Push rejected: {reason}");
                    result.record_failed(SyncError::new(
                        table,
                        Some(record.id.clone()),
                        push_operation(record),
                        reason,
                    ));
                }
                Err(error) => return Err(error.into()),
            }
        }

        metadata.last_push_at = Some(Utc::now());
        Ok(())
    }

    /// The relational store kept its own copy of a pushed record; take it
    async fn adopt_remote(
        &self,
        records: &LibSqlRecordRepository<'_>,
        local: &SyncRecord,
        result: &mut SyncResult,
    ) -> Result<()> {
        let table = local.table();
        match self.remote.fetch_record(table, &local.id).await? {
            Some(Ok(row)) if same_revision(local, &row.record) => {
                records.mark_synced(table, &local.id, local.version).await?;
                result.records_processed += 1;
            }
            Some(Ok(row)) if row.record.version >= local.version => {
                records.apply_remote(&row.record, Some(local.version)).await?;
                result.record_applied(UpsertOutcome::Unchanged, row.record.is_tombstone());
            }
            Some(Err(bad)) => result.record_failed(SyncError::new(
                table,
                Some(local.id.clone()),
                SyncOperation::Read,
                bad.reason,
            )),
            _ => result.record_failed(SyncError::new(
                table,
                Some(local.id.clone()),
                push_operation(local),
                format!("relational store did not accept version {}", local.version),
            )),
        }
        Ok(())
    }

    async fn finish(
        &self,
        metadata: &mut SyncMetadata,
        result: &mut SyncResult,
        started_at: DateTime<Utc>,
        options: PassOptions,
    ) -> Result<()> {
        let conn = self.db.connection();
        let records = LibSqlRecordRepository::new(conn);
        let table = metadata.table;
        let user_id = metadata.user_id.clone();

        let purged = records
            .purge_tombstones(table, &user_id, Utc::now(), self.settings.tombstone_retention)
            .await?;

        metadata.mark_success(options.direction.pulls().then_some(started_at), result.conflicts);
        metadata.record_count = records.count(table, &user_id).await?;
        LibSqlMetadataRepository::new(conn).save(metadata).await?;
        self.log_errors(&user_id, &result.errors).await?;

        result.status = metadata.status;
        tracing::info!(
            table = %table,
            user = %user_id,
            direction = %options.direction,
            processed = result.records_processed,
            created = result.records_created,
            updated = result.records_updated,
            deleted = result.records_deleted,
            conflicts = result.conflicts,
            errors = result.errors.len(),
            purged,
            duration_ms = result.duration_ms,
            "Sync pass finished"
        );
        Ok(())
    }

    async fn log_errors(&self, user_id: &str, errors: &[SyncError]) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }
        LibSqlErrorLogRepository::new(self.db.connection())
            .append(user_id, errors)
            .await
    }
}

async fn apply_pulled(
    records: &LibSqlRecordRepository<'_>,
    remote: &SyncRecord,
    retention: Duration,
    result: &mut SyncResult,
) -> Result<()> {
    let local = records.get(remote.table(), &remote.id).await?;
    let outcome = match resolve(local.as_ref(), remote) {
        // Purged here already; bringing it back would only purge it again.
        Resolution::Insert if remote.is_purgeable(Utc::now(), retention) => {
            result.records_processed += 1;
            return Ok(());
        }
        Resolution::Insert => UpsertOutcome::Created,
        Resolution::Overwrite => UpsertOutcome::Updated,
        Resolution::KeepLocal => {
            // Our own push coming back, or an older revision of it, is not a conflict.
            let echo = local.as_ref().is_some_and(|local| same_revision(local, remote))
                || remote.version <= records.synced_version(remote.table(), &remote.id).await?;
            if echo {
                result.records_processed += 1;
                return Ok(());
            }
            UpsertOutcome::Unchanged
        }
    };

    if outcome == UpsertOutcome::Unchanged {
        result.record_applied(outcome, remote.is_tombstone());
    } else if records
        .apply_remote(remote, local.as_ref().map(|local| local.version))
        .await?
    {
        result.record_applied(outcome, remote.is_tombstone());
    } else {
        tracing::debug!(
            table = %remote.table(),
            record = %remote.id,
            "Local record changed during the pull, keeping it"
        );
        result.record_applied(UpsertOutcome::Unchanged, remote.is_tombstone());
    }
    Ok(())
}

fn same_revision(a: &SyncRecord, b: &SyncRecord) -> bool {
    a.version == b.version && a.is_tombstone() == b.is_tombstone() && a.entity == b.entity
}

const fn push_operation(record: &SyncRecord) -> SyncOperation {
    if record.is_tombstone() {
        SyncOperation::Delete
    } else if record.version == 1 {
        SyncOperation::Create
    } else {
        SyncOperation::Update
    }
}

/// Fold a pass result into the list, one entry per table
fn merge_into(results: &mut Vec<SyncResult>, result: SyncResult) {
    match results.iter_mut().find(|existing| existing.table == result.table) {
        Some(existing) => {
            if severity(result.status) >= severity(existing.status) {
                existing.status = result.status;
            }
            existing.merge(result);
        }
        None => results.push(result),
    }
}

const fn severity(status: SyncStatus) -> u8 {
    match status {
        SyncStatus::Idle => 0,
        SyncStatus::Success => 1,
        SyncStatus::Syncing => 2,
        SyncStatus::Conflict => 3,
        SyncStatus::Error => 4,
    }
}
