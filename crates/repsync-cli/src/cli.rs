use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use repsync_core::sync::SyncDirection;
use repsync_core::SyncTable;

#[derive(Parser)]
#[command(name = "repsync")]
#[command(about = "Log workouts offline and sync them across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Signed-in user (overrides REPSYNC_USER_ID)
    #[arg(long, global = true, value_name = "USER_ID")]
    pub user: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log a workout
    #[command(alias = "log")]
    Add {
        /// Workout name
        name: Vec<String>,
        /// Duration in minutes
        #[arg(long)]
        minutes: Option<i64>,
        /// Calories burned
        #[arg(long)]
        calories: Option<f64>,
        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// List recent workouts
    List {
        /// Number of workouts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Include soft-deleted workouts
        #[arg(long)]
        deleted: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Soft-delete a workout
    Delete {
        /// Workout record id
        id: String,
    },
    /// Push local changes and pull remote ones
    Sync {
        /// Table to sync; repeat for several (all tables when omitted)
        #[arg(long = "table", value_name = "TABLE")]
        tables: Vec<SyncTable>,
        /// push, pull or both
        #[arg(long, default_value_t = SyncDirection::Both)]
        direction: SyncDirection,
        /// Ignore the last sync time and fetch everything
        #[arg(long)]
        force_full: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show per-table sync state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent per-record sync errors
    Errors {
        /// Number of errors to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Summarize recent workouts
    Insight {
        /// Number of recent workouts to include
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
