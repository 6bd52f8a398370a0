//! Cantor CLI
//!
//! Runs the vocal-extraction job engine in-process: submits files and URLs,
//! follows their progress, and manages the artifact roots.

mod commands;
mod config;
mod engine;
mod logging;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::ConfigOverrides;

#[derive(Parser)]
#[command(name = "cantor")]
#[command(about = "Vocal extraction job engine", long_about = None)]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    /// Also write daily-rotated logs to this directory
    #[arg(long, env = "LOG_DIR", global = true)]
    log_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Held for the process lifetime so buffered file logs get flushed
    let _guard = logging::init(cli.log_dir.as_deref())?;

    let config = cli.overrides.load()?;

    handle_command(cli.command, &config).await
}
