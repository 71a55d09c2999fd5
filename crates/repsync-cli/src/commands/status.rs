use repsync_core::config::ClientConfig;
use repsync_core::db::{LibSqlMetadataRepository, SyncMetadataRepository};

use crate::commands::common::{format_metadata_lines, open_database};
use crate::error::CliError;

pub async fn run_status(as_json: bool, config: &ClientConfig) -> Result<(), CliError> {
    let user_id = config.require_user()?;
    let db = open_database(config).await?;
    let metadata = LibSqlMetadataRepository::new(db.connection())
        .list_for_user(user_id)
        .await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    if metadata.is_empty() {
        println!("Nothing synced yet. Run: repsync sync");
        return Ok(());
    }

    for line in format_metadata_lines(&metadata) {
        println!("{line}");
    }
    Ok(())
}
