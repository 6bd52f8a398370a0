//! Engine configuration
//!
//! Defines all configurable parameters for the job engine: admission bounds,
//! stage timeout and weights, artifact roots, retention, and the external
//! tools the stage executors invoke.

use std::path::PathBuf;
use std::time::Duration;

use cantor_core::domain::stage::{DEFAULT_DOWNLOAD_WEIGHT, StageWeights};

use crate::service::ReaperConfig;

/// Engine configuration
///
/// Defaults match a single-host deployment; every value can be overridden
/// from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where inputs are stored, one `<job id>.<ext>` per job
    pub upload_dir: PathBuf,

    /// Where results are written, one `<job id>/` per job
    pub output_dir: PathBuf,

    /// Pipelines allowed to run at once
    pub max_concurrent_jobs: usize,

    /// Admitted jobs allowed to wait for a slot
    pub max_queued_jobs: usize,

    /// Hard deadline for a single stage
    pub job_timeout: Duration,

    /// How long finished jobs and their files are kept
    pub file_expiry: Duration,

    /// Time between expiry sweeps
    pub cleanup_interval: Duration,

    /// Share of global progress given to the download stage of remote jobs
    pub download_stage_weight: f64,

    /// Typical job duration, used for queue wait estimates
    pub estimated_job_duration: Duration,

    pub demucs_model: String,
    pub python_bin: String,
    pub yt_dlp_bin: String,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(upload_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
            max_concurrent_jobs: 3,
            max_queued_jobs: 10,
            job_timeout: Duration::from_secs(600), // 10 minutes
            file_expiry: Duration::from_secs(24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
            download_stage_weight: DEFAULT_DOWNLOAD_WEIGHT,
            estimated_job_duration: Duration::from_secs(180),
            demucs_model: "htdemucs".to_string(),
            python_bin: "python".to_string(),
            yt_dlp_bin: "yt-dlp".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Recognized environment variables:
    /// - UPLOAD_DIR (optional, default: temp/uploads)
    /// - OUTPUT_DIR (optional, default: temp/outputs)
    /// - MAX_CONCURRENT_JOBS (optional, default: 3)
    /// - MAX_QUEUED_JOBS (optional, default: 10)
    /// - JOB_TIMEOUT_SECONDS (optional, default: 600)
    /// - FILE_EXPIRY_HOURS (optional, default: 24)
    /// - CLEANUP_INTERVAL_HOURS (optional, fractional, default: 1.0)
    /// - DOWNLOAD_STAGE_WEIGHT (optional, default: 40)
    /// - ESTIMATED_JOB_SECONDS (optional, default: 180)
    /// - DEMUCS_MODEL, PYTHON_BIN, YT_DLP_BIN (optional)
    ///
    /// Unparsable values fall back to their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let upload_dir = std::env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.upload_dir);

        let output_dir = std::env::var("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        let max_concurrent_jobs = std::env::var("MAX_CONCURRENT_JOBS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_concurrent_jobs);

        let max_queued_jobs = std::env::var("MAX_QUEUED_JOBS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_queued_jobs);

        let job_timeout = std::env::var("JOB_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.job_timeout);

        let file_expiry = std::env::var("FILE_EXPIRY_HOURS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .and_then(duration_from_hours)
            .unwrap_or(defaults.file_expiry);

        let cleanup_interval = std::env::var("CLEANUP_INTERVAL_HOURS")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .and_then(|hours| Duration::try_from_secs_f64(hours * 3600.0).ok())
            .unwrap_or(defaults.cleanup_interval);

        let download_stage_weight = std::env::var("DOWNLOAD_STAGE_WEIGHT")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(defaults.download_stage_weight);

        let estimated_job_duration = std::env::var("ESTIMATED_JOB_SECONDS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.estimated_job_duration);

        Self {
            upload_dir,
            output_dir,
            max_concurrent_jobs,
            max_queued_jobs,
            job_timeout,
            file_expiry,
            cleanup_interval,
            download_stage_weight,
            estimated_job_duration,
            demucs_model: std::env::var("DEMUCS_MODEL").unwrap_or(defaults.demucs_model),
            python_bin: std::env::var("PYTHON_BIN").unwrap_or(defaults.python_bin),
            yt_dlp_bin: std::env::var("YT_DLP_BIN").unwrap_or(defaults.yt_dlp_bin),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs must be greater than 0");
        }

        if self.job_timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        if self.file_expiry.is_zero() {
            anyhow::bail!("file_expiry must be greater than 0");
        }

        if self.cleanup_interval.is_zero() {
            anyhow::bail!("cleanup_interval must be greater than 0");
        }

        if !(self.download_stage_weight >= 1.0 && self.download_stage_weight <= 99.0) {
            anyhow::bail!("download_stage_weight must be between 1 and 99");
        }

        if self.upload_dir.as_os_str().is_empty() || self.output_dir.as_os_str().is_empty() {
            anyhow::bail!("upload_dir and output_dir cannot be empty");
        }

        if self.upload_dir == self.output_dir {
            anyhow::bail!("upload_dir and output_dir must differ");
        }

        Ok(())
    }

    /// Stage weights for every job kind
    pub fn stage_weights(&self) -> anyhow::Result<StageWeights> {
        StageWeights::with_download_weight(self.download_stage_weight).ok_or_else(|| {
            anyhow::anyhow!(
                "invalid download stage weight {}",
                self.download_stage_weight
            )
        })
    }

    pub fn reaper_config(&self) -> ReaperConfig {
        ReaperConfig::new(&self.upload_dir, &self.output_dir)
            .with_retention(self.file_expiry)
            .with_interval(self.cleanup_interval)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("temp/uploads", "temp/outputs")
    }
}

/// Whole hours as a `Duration`, or `None` if the seconds overflow
pub fn duration_from_hours(hours: u64) -> Option<Duration> {
    hours.checked_mul(3600).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.max_queued_jobs, 10);
        assert_eq!(config.job_timeout, Duration::from_secs(600));
        assert_eq!(config.file_expiry, Duration::from_secs(86400));
        assert_eq!(config.cleanup_interval, Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        config.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
        config.max_concurrent_jobs = 1;

        config.download_stage_weight = 100.0;
        assert!(config.validate().is_err());
        config.download_stage_weight = 25.0;

        config.output_dir = config.upload_dir.clone();
        assert!(config.validate().is_err());

        config.output_dir = PathBuf::from("temp/outputs");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stage_weights_follow_download_weight() {
        let mut config = Config::default();
        config.download_stage_weight = 25.0;

        let weights = config.stage_weights().unwrap();
        let plan = weights.plan_for(cantor_core::domain::job::JobKind::RemoteFetch);
        assert_eq!(plan.offset(1), 25.0);
    }

    #[test]
    fn test_duration_from_hours() {
        assert_eq!(duration_from_hours(24), Some(Duration::from_secs(86400)));
        assert_eq!(duration_from_hours(0), Some(Duration::ZERO));
        assert_eq!(duration_from_hours(u64::MAX), None);
        assert_eq!(duration_from_hours(u64::MAX / 3600 + 1), None);
    }

    #[test]
    fn test_reaper_config() {
        let config = Config::default();
        let reaper = config.reaper_config();

        assert_eq!(reaper.upload_dir, PathBuf::from("temp/uploads"));
        assert_eq!(reaper.retention, Duration::from_secs(86400));
        assert_eq!(reaper.interval, Duration::from_secs(3600));
    }
}
