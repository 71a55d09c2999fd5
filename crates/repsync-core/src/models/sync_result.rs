//! Outcome of a sync pass

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RecordId, SyncStatus, SyncTable};

/// Operation a per-record error happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
    Read,
}

impl SyncOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "read",
        }
    }
}

/// An error isolated to a single record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncError {
    pub table: SyncTable,
    pub record_id: Option<RecordId>,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub operation: SyncOperation,
}

impl SyncError {
    pub fn new(
        table: SyncTable,
        record_id: Option<RecordId>,
        operation: SyncOperation,
        error: impl Into<String>,
    ) -> Self {
        Self {
            table,
            record_id,
            error: error.into(),
            timestamp: Utc::now(),
            operation,
        }
    }
}

/// How an upsert landed in the target store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No prior row existed
    Created,
    /// An older row was overwritten
    Updated,
    /// The store already held the same or a newer version
    Unchanged,
}

/// Summary of one table pass; never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub table: SyncTable,
    pub status: SyncStatus,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_deleted: u64,
    pub conflicts: u64,
    pub errors: Vec<SyncError>,
    pub duration_ms: u64,
}

impl SyncResult {
    /// Empty result for a table, in the given status
    pub const fn empty(table: SyncTable, status: SyncStatus) -> Self {
        Self {
            table,
            status,
            records_processed: 0,
            records_created: 0,
            records_updated: 0,
            records_deleted: 0,
            conflicts: 0,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Count a record written to the target store.
    ///
    /// Tombstones count as deletions regardless of whether the row existed.
    pub fn record_applied(&mut self, outcome: UpsertOutcome, tombstone: bool) {
        self.records_processed += 1;
        match outcome {
            UpsertOutcome::Unchanged => self.conflicts += 1,
            _ if tombstone => self.records_deleted += 1,
            UpsertOutcome::Created => self.records_created += 1,
            UpsertOutcome::Updated => self.records_updated += 1,
        }
    }

    /// Count a record that failed in isolation
    pub fn record_failed(&mut self, error: SyncError) {
        self.records_processed += 1;
        self.errors.push(error);
    }

    /// Fold another partial result for the same table into this one
    pub fn merge(&mut self, other: Self) {
        self.records_processed += other.records_processed;
        self.records_created += other.records_created;
        self.records_updated += other.records_updated;
        self.records_deleted += other.records_deleted;
        self.conflicts += other.conflicts;
        self.duration_ms += other.duration_ms;
        self.errors.extend(other.errors);
    }
}

/// Totals across many results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub tables: u64,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_deleted: u64,
    pub conflicts: u64,
    pub errors: u64,
    pub failed_tables: u64,
}

impl SyncSummary {
    pub fn from_results(results: &[SyncResult]) -> Self {
        results.iter().fold(Self::default(), |mut acc, result| {
            acc.tables += 1;
            acc.records_processed += result.records_processed;
            acc.records_created += result.records_created;
            acc.records_updated += result.records_updated;
            acc.records_deleted += result.records_deleted;
            acc.conflicts += result.conflicts;
            acc.errors += result.errors.len() as u64;
            if result.status == SyncStatus::Error {
                acc.failed_tables += 1;
            }
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_applied_counts_by_outcome() {
        let mut result = SyncResult::empty(SyncTable::Workouts, SyncStatus::Success);
        result.record_applied(UpsertOutcome::Created, false);
        result.record_applied(UpsertOutcome::Updated, false);
        result.record_applied(UpsertOutcome::Updated, true);
        result.record_applied(UpsertOutcome::Unchanged, true);

        assert_eq!(result.records_processed, 4);
        assert_eq!(result.records_created, 1);
        assert_eq!(result.records_updated, 1);
        assert_eq!(result.records_deleted, 1);
        assert_eq!(result.conflicts, 1);
    }

    #[test]
    fn summary_counts_failed_tables() {
        let mut failed = SyncResult::empty(SyncTable::Exercises, SyncStatus::Error);
        failed.record_failed(SyncError::new(
            SyncTable::Exercises,
            None,
            SyncOperation::Read,
            "timeout",
        ));
        let mut ok = SyncResult::empty(SyncTable::Workouts, SyncStatus::Success);
        ok.record_applied(UpsertOutcome::Created, false);

        let summary = SyncSummary::from_results(&[failed, ok]);
        assert_eq!(summary.tables, 2);
        assert_eq!(summary.failed_tables, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.records_processed, 2);
    }

    #[test]
    fn result_serializes_camel_case() {
        let result = SyncResult::empty(SyncTable::SleepLogs, SyncStatus::Success);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["table"], "sleep_logs");
        assert_eq!(value["recordsProcessed"], 0);
        assert_eq!(value["status"], "success");
    }
}
