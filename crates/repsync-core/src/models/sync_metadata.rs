//! Per-table, per-user sync bookkeeping

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::SyncTable;

/// Lifecycle state of a (table, user) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
    Conflict,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "syncing" => Ok(Self::Syncing),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "conflict" => Ok(Self::Conflict),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// Sync metadata row keyed by `(table, user_id)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub table: SyncTable,
    pub user_id: String,
    /// Start time of the last successful pass that pulled
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Highest relational change sequence already applied; pulls fetch after it
    pub pull_cursor: Option<i64>,
    pub status: SyncStatus,
    pub conflict_count: u64,
    pub record_count: u64,
    pub error_message: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    pub last_push_at: Option<DateTime<Utc>>,
    pub last_pull_at: Option<DateTime<Utc>>,
    /// Fingerprint of the last applied pull batch
    pub last_pull_fingerprint: Option<String>,
}

impl SyncMetadata {
    /// Fresh metadata for a pair that has never synced
    pub fn new(table: SyncTable, user_id: impl Into<String>) -> Self {
        Self {
            table,
            user_id: user_id.into(),
            last_sync_at: None,
            pull_cursor: None,
            status: SyncStatus::Idle,
            conflict_count: 0,
            record_count: 0,
            error_message: None,
            last_error_at: None,
            last_successful_sync_at: None,
            last_push_at: None,
            last_pull_at: None,
            last_pull_fingerprint: None,
        }
    }

    /// Whether the pair completed a successful pass within `window` of `now`
    pub fn synced_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.last_successful_sync_at
            .is_some_and(|at| now.signed_duration_since(at) < window)
    }

    /// Mark a pass as started
    pub fn mark_syncing(&mut self) {
        self.status = SyncStatus::Syncing;
    }

    /// Record a successful pass.
    ///
    /// `pulled_at` is the start time of a pass that pulled; push-only passes
    /// pass `None` and leave `last_sync_at` where it was.
    pub fn mark_success(&mut self, pulled_at: Option<DateTime<Utc>>, conflicts: u64) {
        let now = Utc::now();
        self.status = if conflicts > 0 {
            SyncStatus::Conflict
        } else {
            SyncStatus::Success
        };
        if pulled_at.is_some() {
            self.last_sync_at = pulled_at;
        }
        self.last_successful_sync_at = Some(now);
        self.conflict_count = self.conflict_count.saturating_add(conflicts);
        self.error_message = None;
    }

    /// Move the pull cursor forward; it never goes back
    pub fn advance_cursor(&mut self, cursor: Option<i64>) {
        self.pull_cursor = self.pull_cursor.max(cursor);
    }

    /// Record a failed pass
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = SyncStatus::Error;
        self.error_message = Some(message.into());
        self.last_error_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metadata_is_idle_and_never_synced() {
        let meta = SyncMetadata::new(SyncTable::Workouts, "user-1");
        assert_eq!(meta.status, SyncStatus::Idle);
        assert!(meta.last_push_at.is_none());
        assert!(!meta.synced_within(Utc::now(), Duration::hours(1)));
    }

    #[test]
    fn success_clears_error_and_advances_cursor() {
        let mut meta = SyncMetadata::new(SyncTable::Workouts, "user-1");
        meta.mark_error("network down");
        assert_eq!(meta.status, SyncStatus::Error);

        let started = Utc::now();
        meta.mark_success(Some(started), 0);
        assert_eq!(meta.status, SyncStatus::Success);
        assert_eq!(meta.last_sync_at, Some(started));
        assert!(meta.error_message.is_none());
        assert!(meta.last_error_at.is_some());
    }

    #[test]
    fn conflicts_are_accumulated() {
        let mut meta = SyncMetadata::new(SyncTable::Exercises, "user-1");
        meta.mark_success(Some(Utc::now()), 2);
        meta.mark_success(None, 1);
        assert_eq!(meta.conflict_count, 3);
        assert_eq!(meta.status, SyncStatus::Conflict);
    }

    #[test]
    fn push_only_success_keeps_pull_cursor() {
        let mut meta = SyncMetadata::new(SyncTable::Workouts, "user-1");
        meta.mark_success(None, 0);
        assert!(meta.last_sync_at.is_none());
        assert!(meta.last_successful_sync_at.is_some());

        let started = Utc::now();
        meta.mark_success(Some(started), 0);
        meta.mark_success(None, 0);
        assert_eq!(meta.last_sync_at, Some(started));
    }

    #[test]
    fn pull_cursor_only_moves_forward() {
        let mut meta = SyncMetadata::new(SyncTable::Workouts, "user-1");
        meta.advance_cursor(None);
        assert_eq!(meta.pull_cursor, None);
        meta.advance_cursor(Some(7));
        meta.advance_cursor(Some(3));
        meta.advance_cursor(None);
        assert_eq!(meta.pull_cursor, Some(7));
    }

    #[test]
    fn synced_within_respects_window() {
        let mut meta = SyncMetadata::new(SyncTable::Workouts, "user-1");
        let now = Utc::now();
        meta.last_successful_sync_at = Some(now - Duration::minutes(30));
        assert!(meta.synced_within(now, Duration::hours(1)));
        meta.last_successful_sync_at = Some(now - Duration::minutes(90));
        assert!(!meta.synced_within(now, Duration::hours(1)));
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            SyncStatus::Idle,
            SyncStatus::Syncing,
            SyncStatus::Success,
            SyncStatus::Error,
            SyncStatus::Conflict,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
    }
}
