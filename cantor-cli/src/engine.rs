//! Engine wiring
//!
//! Builds the job store, scheduler, pipeline runner, intake service and
//! reaper from a configuration, and owns their start/stop order.

use std::sync::Arc;

use anyhow::Result;
use cantor_runner::Config;
use cantor_runner::repository::{InMemoryJobRepository, JobRepository};
use cantor_runner::scheduler::Scheduler;
use cantor_runner::service::{ExpiryReaper, JobService, StageExecutors, StandardPipelineRunner};
use cantor_runner::stage::{DemucsExtractor, YtDlpDownloader};
use tracing::info;

pub struct Engine {
    pub service: JobService,
    pub reaper: ExpiryReaper,
}

impl Engine {
    pub fn build(config: &Config) -> Result<Self> {
        let jobs: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
        let scheduler = Scheduler::new(config.max_concurrent_jobs, config.max_queued_jobs);

        let executors = StageExecutors::new(
            Arc::new(YtDlpDownloader::new(&config.yt_dlp_bin, &config.upload_dir)),
            Arc::new(DemucsExtractor::new(
                &config.python_bin,
                &config.demucs_model,
                &config.output_dir,
            )),
        );
        let runner = Arc::new(StandardPipelineRunner::new(
            Arc::clone(&jobs),
            executors,
            config.stage_weights()?,
            config.job_timeout,
        ));

        let service = JobService::new(
            Arc::clone(&jobs),
            scheduler,
            runner,
            &config.upload_dir,
            config.estimated_job_duration,
        );
        let reaper = ExpiryReaper::new(config.reaper_config(), jobs);

        Ok(Self { service, reaper })
    }

    /// Starts background work
    pub fn start(&self) {
        self.reaper.start();
        info!("Engine started");
    }

    /// Lets running jobs finish, fails queued ones, then stops the reaper
    pub async fn shutdown(&self) {
        self.service.shutdown().await;
        self.reaper.stop().await;
        info!("Engine stopped");
    }
}
