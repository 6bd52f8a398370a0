//! Job intake
//!
//! Accepts new jobs, puts them through admission control and dispatches
//! their pipelines onto background tasks. Also answers status and statistics
//! queries for polling clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cantor_core::domain::job::{JobKind, JobRecord, JobStatus};
use cantor_core::dto::job::JobStatusReport;
use cantor_core::dto::stats::EngineStats;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{JobError, StorageError, SubmitError};
use crate::repository::JobRepository;
use crate::scheduler::{Reservation, Scheduler};
use crate::service::pipeline::PipelineRunner;

/// Entry point for submitting and querying jobs
pub struct JobService {
    jobs: Arc<dyn JobRepository>,
    scheduler: Scheduler,
    runner: Arc<dyn PipelineRunner>,
    upload_dir: PathBuf,
    estimated_job_duration: Duration,
    tasks: TaskTracker,
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        scheduler: Scheduler,
        runner: Arc<dyn PipelineRunner>,
        upload_dir: impl Into<PathBuf>,
        estimated_job_duration: Duration,
    ) -> Self {
        Self {
            jobs,
            scheduler,
            runner,
            upload_dir: upload_dir.into(),
            estimated_job_duration,
            tasks: TaskTracker::new(),
        }
    }

    /// Submits a local file. The file is copied into the upload root as
    /// `<job id>.<ext>` before the job is queued.
    ///
    /// Refused with `AdmissionError::QueueFull` before any record is created
    /// when the queue is full. A failed copy fails the job.
    pub async fn submit_upload(&self, source: &Path) -> Result<JobRecord, SubmitError> {
        let reservation = self.scheduler.try_reserve()?;

        let input_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        let job = self.jobs.create(JobKind::LocalUpload, &input_name);

        let dest = match source.extension() {
            Some(ext) => self
                .upload_dir
                .join(format!("{}.{}", job.id, ext.to_string_lossy())),
            None => self.upload_dir.join(job.id.to_string()),
        };

        if let Err(e) = self.store_input(source, &dest).await {
            warn!("Failed to store input for job {}: {}", job.id, e);
            if let Err(store_err) = self.jobs.set_error(
                job.id,
                "Failed to store input file".to_string(),
                Some(e.to_string()),
            ) {
                warn!("Failed to record error of job {}: {}", job.id, store_err);
            }
            return Err(e.into());
        }

        if let Err(e) = self.jobs.set_input_artifact(job.id, dest, Some(input_name)) {
            warn!("Failed to record input of job {}: {}", job.id, e);
        }

        info!("Accepted upload job {} ({})", job.id, job.input);
        self.dispatch(reservation, job.id);
        Ok(self.jobs.get(job.id).unwrap_or(job))
    }

    /// Submits a remote media URL; the fetch stage downloads it
    pub fn submit_remote(&self, url: &str) -> Result<JobRecord, SubmitError> {
        let reservation = self.scheduler.try_reserve()?;
        let job = self.jobs.create(JobKind::RemoteFetch, url);

        info!("Accepted remote job {} ({})", job.id, url);
        self.dispatch(reservation, job.id);
        Ok(job)
    }

    async fn store_input(&self, source: &Path, dest: &Path) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|e| StorageError::new(&self.upload_dir, e))?;
        tokio::fs::copy(source, dest)
            .await
            .map_err(|e| StorageError::new(source, e))?;
        Ok(())
    }

    /// Queues the job and spawns its pipeline behind admission control
    fn dispatch(&self, reservation: Reservation, job_id: Uuid) {
        let ticket = reservation.enqueue(job_id);
        let jobs = Arc::clone(&self.jobs);
        let runner = Arc::clone(&self.runner);

        self.tasks.spawn(async move {
            match ticket.ready().await {
                Ok(slot) => runner.run(job_id, slot).await,
                Err(e) => {
                    warn!("Job {} was not started: {}", job_id, e);
                    if let Err(store_err) = jobs.set_error(job_id, e.to_string(), None) {
                        warn!("Failed to record error of job {}: {}", job_id, store_err);
                    }
                }
            }
        });
    }

    pub fn get(&self, job_id: Uuid) -> Result<JobRecord, JobError> {
        self.jobs.get(job_id).inspect_err(|_| {
            debug!("Job {} not found", job_id);
        })
    }

    /// Status snapshot, with queue position and wait estimate while pending
    pub fn status(&self, job_id: Uuid) -> Result<JobStatusReport, JobError> {
        let job = self.get(job_id)?;
        let report = JobStatusReport::from(&job);

        if job.status != JobStatus::Pending {
            return Ok(report);
        }

        let position = self.scheduler.queue_position(job_id);
        let wait = self.estimated_wait(job_id).map(|d| d.as_secs());
        Ok(report.with_queue(position, wait))
    }

    /// Rough time until a queued job starts: its position times the typical
    /// job duration
    pub fn estimated_wait(&self, job_id: Uuid) -> Option<Duration> {
        let position = self.scheduler.queue_position(job_id)?;
        let position = u32::try_from(position).unwrap_or(u32::MAX);
        Some(self.estimated_job_duration.saturating_mul(position))
    }

    pub fn list(&self) -> Vec<JobRecord> {
        self.jobs.list()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            store: self.jobs.stats(),
            scheduler: self.scheduler.stats(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Stops admitting jobs and waits for running pipelines to finish.
    /// Jobs still waiting for a slot are failed.
    pub async fn shutdown(&self) {
        info!("Shutting down job service");
        self.scheduler.close();
        self.tasks.close();
        self.tasks.wait().await;
        debug!("All job tasks finished");
    }
}
