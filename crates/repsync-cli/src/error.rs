use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] repsync_core::Error),
    #[error(transparent)]
    Config(#[from] repsync_core::config::ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Workout name cannot be empty")]
    EmptyName,
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Workout not found: {0}")]
    RecordNotFound(String),
    #[error("Sync failed for {0} table(s); see `repsync status`")]
    SyncFailed(u64),
    #[error(
        "Sync is not configured. Set RELATIONAL_DATABASE_URL (and RELATIONAL_AUTH_TOKEN for hosted databases)."
    )]
    SyncNotConfigured,
}
