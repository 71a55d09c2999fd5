//! repsync CLI - log workouts offline and sync them across devices

mod cli;
mod commands;
mod error;


use clap::Parser;
use repsync_core::config::ClientConfig;

use crate::cli::{Cli, Commands};
use crate::commands::add::{run_add, NewWorkout};
use crate::commands::common::resolve_config;
use crate::commands::completions::run_completions;
use crate::commands::delete::run_delete;
use crate::commands::errors::run_errors;
use crate::commands::insight::run_insight;
use crate::commands::list::run_list;
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, SyncOptions};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("repsync=info".parse().unwrap())
                .add_directive("repsync_core=warn".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let config = resolve_config(ClientConfig::from_env()?, cli.db_path, cli.user);

    match cli.command {
        Commands::Add {
            name,
            minutes,
            calories,
            notes,
        } => {
            let workout = NewWorkout {
                name_parts: name,
                minutes,
                calories,
                notes,
            };
            run_add(workout, &config).await?;
        }
        Commands::List {
            limit,
            deleted,
            json,
        } => run_list(limit, deleted, json, &config).await?,
        Commands::Delete { id } => run_delete(&id, &config).await?,
        Commands::Sync {
            tables,
            direction,
            force_full,
            json,
        } => {
            let options = SyncOptions {
                tables,
                direction,
                force_full,
            };
            run_sync(options, json, &config).await?;
        }
        Commands::Status { json } => run_status(json, &config).await?,
        Commands::Errors { limit, json } => run_errors(limit, json, &config).await?,
        Commands::Insight { limit } => run_insight(limit, &config).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
