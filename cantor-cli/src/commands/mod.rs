//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod run;
mod storage;

use std::path::PathBuf;

use anyhow::Result;
use cantor_runner::Config;
use clap::Subcommand;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Extract vocals from local files and remote URLs
    Run {
        /// Audio files to process
        files: Vec<PathBuf>,

        /// Remote media URL to fetch and process (repeatable)
        #[arg(long = "url")]
        urls: Vec<String>,

        /// Print final job reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete expired files once and report what was removed
    ///
    /// This process knows no jobs, so every expired entry is treated as
    /// abandoned. Files of jobs still running in another `cantor run` are
    /// deleted too once they are older than the expiry window; do not sweep
    /// while such a run is in progress.
    #[command(
        after_help = "Warning: expired files of jobs running in other cantor processes are deleted as well."
    )]
    Sweep {
        /// Print the sweep report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show disk usage of the upload and output directories
    Storage {
        /// Print usage as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run { files, urls, json } => run::handle_run(files, urls, json, config).await,
        Commands::Sweep { json } => storage::handle_sweep(json, config).await,
        Commands::Storage { json } => storage::handle_storage(json, config).await,
    }
}
