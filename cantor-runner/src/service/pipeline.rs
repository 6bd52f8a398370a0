//! Pipeline runner
//!
//! Drives one job through its stages:
//! - Moving the record into each stage's status
//! - Running the stage executor in its own task under a hard deadline
//! - Mapping stage-local progress onto the job's global progress
//! - Recording the final artifact, or the first error
//!
//! Stage progress travels over a watch channel and is written to the store by
//! the pipeline task alone, so the store sees a single writer per job however
//! many executors run concurrently.

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cantor_core::domain::job::JobKind;
use cantor_core::domain::stage::{StageKind, StagePlan, StageWeights};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, StageError};
use crate::repository::JobRepository;
use crate::scheduler::ExecutionSlot;
use crate::stage::{ProgressSink, StageExecutor, StageInput, StageOutput, StageRequest};

/// Service trait for running admitted jobs
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    /// Runs every stage of the job while holding `slot`.
    ///
    /// Never fails: the outcome is written to the job record, which ends up
    /// `Completed` or `Failed`. The slot is released before returning.
    async fn run(&self, job_id: Uuid, slot: ExecutionSlot);
}

/// Executor per stage kind
#[derive(Clone)]
pub struct StageExecutors {
    pub download: Arc<dyn StageExecutor>,
    pub extraction: Arc<dyn StageExecutor>,
}

impl StageExecutors {
    pub fn new(download: Arc<dyn StageExecutor>, extraction: Arc<dyn StageExecutor>) -> Self {
        Self {
            download,
            extraction,
        }
    }

    fn for_stage(&self, stage: StageKind) -> &Arc<dyn StageExecutor> {
        match stage {
            StageKind::Download => &self.download,
            StageKind::Extraction => &self.extraction,
        }
    }
}

/// Standard implementation of PipelineRunner
pub struct StandardPipelineRunner {
    jobs: Arc<dyn JobRepository>,
    executors: StageExecutors,
    weights: StageWeights,
    stage_timeout: Duration,
}

impl StandardPipelineRunner {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        executors: StageExecutors,
        weights: StageWeights,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            jobs,
            executors,
            weights,
            stage_timeout,
        }
    }

    /// Runs the job's stage plan, returning the last stage's artifact
    async fn execute(&self, job_id: Uuid) -> Result<StageOutput, PipelineError> {
        let job = self.jobs.get(job_id)?;
        let plan = self.weights.plan_for(job.kind);

        let mut input = match job.kind {
            JobKind::LocalUpload => StageInput::File(
                job.input_artifact_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(&job.input)),
            ),
            JobKind::RemoteFetch => StageInput::Url(job.input.clone()),
        };

        let mut last = None;
        for (index, weighted) in plan.stages().iter().enumerate() {
            let stage = weighted.stage;
            self.jobs
                .update_status(job_id, stage.status(), Some(plan.offset(index)))?;

            info!(
                "Job {} running {} stage ({}/{})",
                job_id,
                stage,
                index + 1,
                plan.len()
            );
            let output = self.run_stage(job_id, plan, index, stage, input).await?;

            if stage == StageKind::Download {
                self.jobs.set_input_artifact(
                    job_id,
                    output.path.clone(),
                    output.display_name.clone(),
                )?;
            }

            input = StageInput::File(output.path.clone());
            last = Some(output);
        }

        last.ok_or_else(|| StageError::new("No stages to run").into())
    }

    /// Runs one stage executor in its own task, forwarding its progress until
    /// it returns or the deadline passes.
    async fn run_stage(
        &self,
        job_id: Uuid,
        plan: &StagePlan,
        index: usize,
        stage: StageKind,
        input: StageInput,
    ) -> Result<StageOutput, PipelineError> {
        let executor = Arc::clone(self.executors.for_stage(stage));
        let name = executor.name();
        let (sink, mut progress_rx) = ProgressSink::channel();
        let request = StageRequest { job_id, input };

        let mut handle = tokio::spawn(async move { executor.run(request, sink).await });

        let deadline = tokio::time::sleep(self.stage_timeout);
        tokio::pin!(deadline);
        let mut listening = true;

        let joined = loop {
            tokio::select! {
                joined = &mut handle => break joined,
                changed = progress_rx.changed(), if listening => match changed {
                    Ok(()) => {
                        let local = *progress_rx.borrow_and_update();
                        self.jobs
                            .update_progress(job_id, plan.global_progress(index, local));
                    }
                    Err(_) => listening = false,
                },
                _ = &mut deadline => {
                    handle.abort();
                    // Wait until the task is torn down so any child process is gone.
                    let _ = (&mut handle).await;
                    warn!(
                        "Job {} {} stage ({}) timed out after {:?}",
                        job_id, stage, name, self.stage_timeout
                    );
                    return Err(PipelineError::Timeout {
                        stage,
                        after: self.stage_timeout,
                    });
                }
            }
        };

        let local = *progress_rx.borrow();
        self.jobs
            .update_progress(job_id, plan.global_progress(index, local));

        match joined {
            Ok(Ok(output)) => {
                debug!("Job {} {} stage produced {}", job_id, stage, output.path.display());
                Ok(output)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(e) if e.is_panic() => Err(PipelineError::Panicked {
                stage,
                details: panic_message(e.into_panic()),
            }),
            Err(e) => Err(PipelineError::Panicked {
                stage,
                details: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl PipelineRunner for StandardPipelineRunner {
    async fn run(&self, job_id: Uuid, slot: ExecutionSlot) {
        let started = Instant::now();
        info!("Starting pipeline for job {}", job_id);

        match self.execute(job_id).await {
            Ok(output) => {
                let name = output.name();
                match self.jobs.set_output(job_id, output.path, name) {
                    Ok(()) => info!(
                        "Job {} completed in {:.1}s",
                        job_id,
                        started.elapsed().as_secs_f64()
                    ),
                    Err(e) => error!("Failed to record output of job {}: {}", job_id, e),
                }
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);
                if let Err(store_err) = self.jobs.set_error(job_id, e.to_string(), e.details()) {
                    warn!("Failed to record error of job {}: {}", job_id, store_err);
                }
            }
        }

        slot.release();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
