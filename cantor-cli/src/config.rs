//! Configuration module
//!
//! Starts from the environment and applies command-line overrides.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use cantor_runner::Config;
use cantor_runner::config::duration_from_hours;
use clap::Args;

/// Flags that override environment settings
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigOverrides {
    /// Directory for stored inputs
    #[arg(long, global = true)]
    pub upload_dir: Option<PathBuf>,

    /// Directory for extracted vocals
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Jobs processed at the same time
    #[arg(long, global = true)]
    pub max_concurrent: Option<usize>,

    /// Jobs allowed to wait for a free slot
    #[arg(long, global = true)]
    pub max_queued: Option<usize>,

    /// Per-stage timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Hours finished jobs are kept before being deleted
    #[arg(long, global = true)]
    pub expiry_hours: Option<u64>,
}

impl ConfigOverrides {
    /// Loads the environment configuration with overrides applied
    pub fn load(&self) -> Result<Config> {
        let config = self.apply(Config::from_env())?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn apply(&self, mut config: Config) -> Result<Config> {
        if let Some(dir) = &self.upload_dir {
            config.upload_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(n) = self.max_concurrent {
            config.max_concurrent_jobs = n;
        }
        if let Some(n) = self.max_queued {
            config.max_queued_jobs = n;
        }
        if let Some(secs) = self.timeout {
            config.job_timeout = Duration::from_secs(secs);
        }
        if let Some(hours) = self.expiry_hours {
            config.file_expiry = duration_from_hours(hours)
                .with_context(|| format!("--expiry-hours {} is too large", hours))?;
        }
        Ok(config)
    }
}
