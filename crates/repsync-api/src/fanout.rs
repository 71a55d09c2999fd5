//! Relational → document store fan-out
//!
//! Every write is an upsert keyed by the table's natural-key filter, so
//! replaying a webhook or re-running a sweep converges on the same documents.
//! A document never moves to a lower version.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sha2::{Digest, Sha256};

use repsync_core::db::{
    LibSqlErrorLogRepository, LibSqlMetadataRepository, SyncErrorLogRepository,
    SyncMetadataRepository,
};
use repsync_core::models::{
    RecordId, RelationalRow, SyncError, SyncOperation, UpsertOutcome,
};
use repsync_core::remote::{
    ChangeBatch, DocumentStore, LibSqlRelationalStore, RelationalStore, RemoteError,
};
use repsync_core::sync::SyncLocks;
use repsync_core::transform::{
    build_lookup_filter, document_version, stale_fields, to_remote_shape, LookupFilter, DELETED_AT,
    RECORD_ID,
};
use repsync_core::{Error, Result, SyncResult, SyncStatus, SyncTable};

use crate::trigger::{WebhookEvent, WebhookKind};

/// Applies relational rows to the document store and keeps server-side
/// sync metadata in the relational database
#[derive(Clone)]
pub struct Fanout {
    relational: Arc<LibSqlRelationalStore>,
    documents: Arc<dyn DocumentStore>,
    settings: repsync_core::config::SyncSettings,
    locks: SyncLocks,
}

impl Fanout {
    pub fn new(
        relational: Arc<LibSqlRelationalStore>,
        documents: Arc<dyn DocumentStore>,
        settings: repsync_core::config::SyncSettings,
    ) -> Self {
        Self {
            relational,
            documents,
            settings,
            locks: SyncLocks::new(),
        }
    }

    /// Apply one row-change event end to end.
    ///
    /// Inserts and updates are upserted; deletes remove the document of a
    /// physically removed row. Webhooks leave the pair's metadata alone since
    /// they cover a single record, not the table.
    pub async fn apply_webhook(&self, event: &WebhookEvent) -> Result<SyncResult> {
        let table = event.table;
        let clock = Instant::now();
        let mut result = SyncResult::empty(table, SyncStatus::Syncing);
        let Some(row) = event.row() else {
            return Err(Error::InvalidInput(format!(
                "{table} webhook carries no record"
            )));
        };

        match event.kind {
            WebhookKind::Insert | WebhookKind::Update => {
                match RelationalRow::from_json(table, row.clone()) {
                    Ok(row) => self.apply_row(&row, &mut result).await?,
                    Err(error) => result.record_failed(SyncError::new(
                        table,
                        row_record_id(row),
                        SyncOperation::Read,
                        repsync_core::util::sanitize(&error),
                    )),
                }
            }
            WebhookKind::Delete => self.remove_row(table, row, &mut result).await?,
        }

        if let Some(user_id) = row.get("user_id").and_then(serde_json::Value::as_str) {
            self.log_errors(user_id, &result.errors).await?;
        }
        result.duration_ms = elapsed_ms(clock);
        result.status = settled_status(&result);
        tracing::info!(
            trigger = "webhook",
            table = %table,
            processed = result.records_processed,
            created = result.records_created,
            updated = result.records_updated,
            deleted = result.records_deleted,
            conflicts = result.conflicts,
            errors = result.errors.len(),
            "Applied row change"
        );
        Ok(result)
    }

    /// Fan out one table for one user.
    ///
    /// Pulls rows written after the pair's change cursor (everything when
    /// `force`), applies them in batches, and records the outcome. A running
    /// pass for the same pair coalesces the request.
    pub async fn sync_user_table(
        &self,
        table: SyncTable,
        user_id: &str,
        force: bool,
    ) -> Result<SyncResult> {
        let user = user_fingerprint(user_id);
        let Some(_guard) = self.locks.try_acquire(table, user_id) else {
            tracing::debug!(table = %table, user = %user, "Fan-out already running, coalescing");
            return Ok(SyncResult::empty(table, SyncStatus::Syncing));
        };

        let metadata_repo = LibSqlMetadataRepository::new(self.relational.connection());
        let mut metadata = metadata_repo.get_or_default(table, user_id).await?;
        let started_at = Utc::now();
        metadata.mark_syncing();
        metadata_repo.save(&metadata).await?;

        let clock = Instant::now();
        let mut result = SyncResult::empty(table, SyncStatus::Syncing);
        let after = if force { None } else { metadata.pull_cursor };
        let outcome = self.fan_out_changes(table, user_id, after, &mut result).await;
        result.duration_ms = elapsed_ms(clock);

        match outcome {
            Ok((fetched, cursor)) => {
                metadata.mark_success(Some(started_at), result.conflicts);
                metadata.advance_cursor(cursor);
                metadata.record_count = fetched;
                metadata_repo.save(&metadata).await?;
                self.log_errors(user_id, &result.errors).await?;
                result.status = metadata.status;
                tracing::info!(
                    table = %table,
                    user = %user,
                    force,
                    processed = result.records_processed,
                    created = result.records_created,
                    updated = result.records_updated,
                    deleted = result.records_deleted,
                    conflicts = result.conflicts,
                    errors = result.errors.len(),
                    duration_ms = result.duration_ms,
                    "Fan-out pass finished"
                );
                Ok(result)
            }
            Err(Error::Remote(error)) => {
                tracing::warn!(
                    table = %table,
                    user = %user,
                    processed = result.records_processed,
                    "Fan-out pass aborted: {error}"
                );
                metadata.mark_error(error.to_string());
                metadata_repo.save(&metadata).await?;
                result.errors.push(SyncError::new(
                    table,
                    None,
                    SyncOperation::Read,
                    error.to_string(),
                ));
                self.log_errors(user_id, &result.errors).await?;
                result.status = SyncStatus::Error;
                Ok(result)
            }
            Err(error) => {
                metadata.mark_error(error.to_string());
                if let Err(save_error) = metadata_repo.save(&metadata).await {
                    tracing::warn!(table = %table, "Failed to record fan-out error: {save_error}");
                }
                Err(error)
            }
        }
    }

    /// Fan out every table for one user
    pub async fn sync_user(&self, user_id: &str, force: bool) -> Result<Vec<SyncResult>> {
        let mut results = Vec::with_capacity(SyncTable::ALL.len());
        for table in SyncTable::ALL {
            results.push(self.sync_user_table(table, user_id, force).await?);
        }
        Ok(results)
    }

    /// Fan out a single record, looked up by id in the relational store
    pub async fn sync_record(
        &self,
        table: SyncTable,
        user_id: &str,
        record_id: &RecordId,
    ) -> Result<SyncResult> {
        let clock = Instant::now();
        let mut result = SyncResult::empty(table, SyncStatus::Syncing);
        let read_failure = |reason: String| {
            SyncError::new(table, Some(record_id.clone()), SyncOperation::Read, reason)
        };

        match self.relational.fetch_record(table, record_id).await? {
            Some(Ok(row)) if row.record.user_id == user_id => {
                self.apply_row(&row, &mut result).await?;
            }
            Some(Ok(_)) => {
                result.record_failed(read_failure(format!(
                    "record {record_id} belongs to another user"
                )));
            }
            Some(Err(malformed)) => result.record_failed(read_failure(malformed.reason)),
            None => result.record_failed(read_failure(format!("record {record_id} not found"))),
        }

        self.log_errors(user_id, &result.errors).await?;
        result.duration_ms = elapsed_ms(clock);
        result.status = settled_status(&result);
        Ok(result)
    }

    /// Sweep every active user across every table.
    ///
    /// Pairs that completed a pass within the cooldown are skipped unless
    /// `force` is set and do not appear in the results. A failing user is
    /// logged and reported without stopping the sweep.
    pub async fn run_cron(&self, force: bool) -> Result<Vec<SyncResult>> {
        let users = self.relational.active_user_ids().await?;
        let metadata_repo = LibSqlMetadataRepository::new(self.relational.connection());
        let mut results = Vec::new();
        let mut skipped = 0_usize;

        for user_id in &users {
            for table in SyncTable::ALL {
                let now = Utc::now();
                let recent = match metadata_repo.get(table, user_id).await {
                    Ok(metadata) => metadata
                        .as_ref()
                        .is_some_and(|meta| meta.synced_within(now, self.settings.cooldown)),
                    Err(error) => {
                        results.push(failed_pass(table, &error));
                        continue;
                    }
                };
                if recent && !force {
                    skipped += 1;
                    continue;
                }

                match self.sync_user_table(table, user_id, force).await {
                    Ok(result) => results.push(result),
                    Err(error) => {
                        tracing::warn!(
                            table = %table,
                            user = %user_fingerprint(user_id),
                            "Cron fan-out failed: {error}"
                        );
                        results.push(failed_pass(table, &error));
                    }
                }
            }
        }

        tracing::info!(
            users = users.len(),
            passes = results.len(),
            skipped,
            force,
            "Cron sweep finished"
        );
        Ok(results)
    }

    /// Fetch a pair's changes and apply them; returns the number of rows
    /// fetched and the cursor to resume from
    async fn fan_out_changes(
        &self,
        table: SyncTable,
        user_id: &str,
        after: Option<i64>,
        result: &mut SyncResult,
    ) -> Result<(u64, Option<i64>)> {
        let ChangeBatch {
            rows: fetched,
            cursor,
        } = self.relational.fetch_changes(table, user_id, after).await?;
        let total = u64::try_from(fetched.len()).unwrap_or(u64::MAX);
        let mut rows = Vec::with_capacity(fetched.len());
        for row in fetched {
            match row {
                Ok(row) => rows.push(row),
                Err(malformed) => result.record_failed(SyncError::new(
                    table,
                    malformed.record_id,
                    SyncOperation::Read,
                    malformed.reason,
                )),
            }
        }

        for (index, batch) in rows.chunks(self.settings.batch_size.max(1)).enumerate() {
            for row in batch {
                self.apply_row(row, result).await?;
            }
            tracing::debug!(
                table = %table,
                batch = index,
                size = batch.len(),
                "Applied fan-out batch"
            );
        }
        Ok((total, cursor))
    }

    /// Upsert one row's document, refusing to regress a newer document.
    ///
    /// Natural-key tables share one document per key. A live document owned
    /// by a different record is never overwritten; the collision is reported.
    async fn apply_row(&self, row: &RelationalRow, result: &mut SyncResult) -> Result<()> {
        let table = row.record.table();
        let record_id = &row.record.id;
        let filter = build_lookup_filter(row);
        let document = to_remote_shape(row);
        let failed = |operation: SyncOperation, reason: String| {
            SyncError::new(table, Some(record_id.clone()), operation, reason)
        };

        let existing = match self.documents.find_one(table, &filter).await {
            Ok(existing) => existing,
            Err(error) if error.is_transport() => return Err(error.into()),
            Err(error) => {
                result.record_failed(failed(SyncOperation::Read, error.to_string()));
                return Ok(());
            }
        };

        let owner = existing
            .as_ref()
            .and_then(|doc| doc.opt_text(RECORD_ID).ok().flatten())
            .filter(|owner| owner != record_id.as_str());
        if let Some(owner) = owner {
            let held = existing.as_ref().is_some_and(|doc| !doc.contains(DELETED_AT));
            if row.record.is_tombstone() {
                tracing::debug!(
                    table = %table,
                    record = %record_id,
                    "Key belongs to another record, tombstone not written"
                );
                result.records_processed += 1;
                return Ok(());
            }
            if held {
                tracing::warn!(table = %table, record = %record_id, "Natural key collision");
                result.record_failed(failed(
                    SyncOperation::Update,
                    format!("document for this key belongs to live record {owner}"),
                ));
                return Ok(());
            }
        } else if existing
            .as_ref()
            .and_then(document_version)
            .is_some_and(|version| version > row.record.version)
        {
            tracing::debug!(
                table = %table,
                record = %record_id,
                "Document is newer than the row, keeping it"
            );
            result.records_processed += 1;
            result.conflicts += 1;
            return Ok(());
        }

        let operation = if row.record.is_tombstone() {
            SyncOperation::Delete
        } else if existing.is_none() {
            SyncOperation::Create
        } else {
            SyncOperation::Update
        };
        let unset = existing
            .as_ref()
            .map(|stored| stale_fields(stored, &document))
            .unwrap_or_default();
        match self.documents.upsert(table, &filter, &document, &unset).await {
            Ok(UpsertOutcome::Unchanged) => result.records_processed += 1,
            Ok(outcome) => result.record_applied(outcome, row.record.is_tombstone()),
            Err(error) if error.is_transport() => return Err(error.into()),
            Err(error) => result.record_failed(failed(operation, error.to_string())),
        }
        Ok(())
    }

    async fn remove_row(
        &self,
        table: SyncTable,
        row: &serde_json::Value,
        result: &mut SyncResult,
    ) -> Result<()> {
        let filter = match LookupFilter::from_row_json(table, row) {
            Ok(filter) => filter,
            Err(error) => {
                result.record_failed(SyncError::new(
                    table,
                    row_record_id(row),
                    SyncOperation::Delete,
                    repsync_core::util::sanitize(&error),
                ));
                return Ok(());
            }
        };

        match self.documents.delete(table, &filter).await {
            Ok(existed) => {
                result.records_processed += 1;
                if existed {
                    result.records_deleted += 1;
                }
            }
            Err(error) if error.is_transport() => return Err(error.into()),
            Err(error) => result.record_failed(SyncError::new(
                table,
                row_record_id(row),
                SyncOperation::Delete,
                error.to_string(),
            )),
        }
        Ok(())
    }

    async fn log_errors(&self, user_id: &str, errors: &[SyncError]) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }
        LibSqlErrorLogRepository::new(self.relational.connection())
            .append(user_id, errors)
            .await
    }

    #[cfg(test)]
    async fn metadata(
        &self,
        table: SyncTable,
        user_id: &str,
    ) -> Result<repsync_core::models::SyncMetadata> {
        LibSqlMetadataRepository::new(self.relational.connection())
            .get_or_default(table, user_id)
            .await
    }
}

/// Stable, non-reversible stand-in for a user id in logs
pub fn user_fingerprint(user_id: &str) -> String {
    let digest = Sha256::digest(user_id.as_bytes());
    hex::encode(&digest[..6])
}

fn row_record_id(row: &serde_json::Value) -> Option<RecordId> {
    row.get("record_id")
        .and_then(serde_json::Value::as_str)
        .map(RecordId::from)
}

fn failed_pass(table: SyncTable, error: &Error) -> SyncResult {
    let mut result = SyncResult::empty(table, SyncStatus::Error);
    result.errors.push(SyncError::new(
        table,
        None,
        SyncOperation::Read,
        repsync_core::util::sanitize(error),
    ));
    result
}

const fn settled_status(result: &SyncResult) -> SyncStatus {
    if result.conflicts > 0 {
        SyncStatus::Conflict
    } else {
        SyncStatus::Success
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}
