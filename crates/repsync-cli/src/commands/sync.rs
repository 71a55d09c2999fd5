use std::sync::Arc;

use repsync_core::config::ClientConfig;
use repsync_core::models::SyncSummary;
use repsync_core::sync::{Reconciler, SyncDirection, SyncRequest};
use repsync_core::{SyncResult, SyncTable};
use serde::Serialize;

use crate::commands::common::{format_result_lines, open_database, open_relational};
use crate::error::CliError;

pub struct SyncOptions {
    pub tables: Vec<SyncTable>,
    pub direction: SyncDirection,
    pub force_full: bool,
}

#[derive(Debug, Serialize)]
pub struct SyncReport {
    pub summary: SyncSummary,
    pub results: Vec<SyncResult>,
}

pub async fn run_sync(
    options: SyncOptions,
    as_json: bool,
    config: &ClientConfig,
) -> Result<(), CliError> {
    let report = sync_now(options, config).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_result_lines(&report.results) {
            println!("{line}");
        }
        println!(
            "Sync completed: {} processed, {} conflict(s), {} error(s)",
            report.summary.records_processed, report.summary.conflicts, report.summary.errors
        );
    }

    if report.summary.failed_tables > 0 {
        return Err(CliError::SyncFailed(report.summary.failed_tables));
    }
    Ok(())
}

pub(crate) async fn sync_now(
    options: SyncOptions,
    config: &ClientConfig,
) -> Result<SyncReport, CliError> {
    let user_id = config.require_user()?;
    let remote = open_relational(config).await?;
    let db = Arc::new(open_database(config).await?);

    let reconciler = Reconciler::new(db, remote, config.sync);
    let request = SyncRequest::new(user_id)
        .tables(options.tables)
        .direction(options.direction)
        .force_full_sync(options.force_full);

    let results = reconciler.sync(&request).await?;
    Ok(SyncReport {
        summary: SyncSummary::from_results(&results),
        results,
    })
}
