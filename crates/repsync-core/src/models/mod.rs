//! Data models for repsync

mod entity;
mod record;
mod sync_metadata;
mod sync_result;
mod table;

pub use entity::{
    Entity, ErrorLog, Exercise, MuscleStatus, Notification, PlannedWorkout, RecoveryLog, SleepLog,
    UserProfile, UserSettings, Workout, WorkoutTemplate,
};
pub use record::{RecordId, RecordState, RelationalRow, SyncRecord};
pub use sync_metadata::{SyncMetadata, SyncStatus};
pub use sync_result::{SyncError, SyncOperation, SyncResult, SyncSummary, UpsertOutcome};
pub use table::{SyncTable, UnknownTable};
