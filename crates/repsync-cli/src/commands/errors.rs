use repsync_core::config::ClientConfig;
use repsync_core::db::{LibSqlErrorLogRepository, SyncErrorLogRepository};

use crate::commands::common::{format_error_lines, open_database};
use crate::error::CliError;

pub async fn run_errors(limit: usize, as_json: bool, config: &ClientConfig) -> Result<(), CliError> {
    let user_id = config.require_user()?;
    let db = open_database(config).await?;
    let errors = LibSqlErrorLogRepository::new(db.connection())
        .recent(user_id, limit)
        .await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&errors)?);
        return Ok(());
    }

    if errors.is_empty() {
        println!("No sync errors recorded.");
        return Ok(());
    }

    for line in format_error_lines(&errors) {
        println!("{line}");
    }
    Ok(())
}
