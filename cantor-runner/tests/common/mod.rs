// Stub stage executors and an engine harness shared by the integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cantor_core::domain::job::JobRecord;
use cantor_core::domain::stage::StageWeights;
use cantor_runner::error::StageError;
use cantor_runner::repository::{InMemoryJobRepository, JobRepository};
use cantor_runner::scheduler::Scheduler;
use cantor_runner::service::{JobService, StageExecutors, StandardPipelineRunner};
use cantor_runner::stage::{ProgressSink, StageExecutor, StageOutput, StageRequest};
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Reports each step with a short pause, then returns `outcome`
pub struct ScriptedStage {
    pub steps: Vec<f64>,
    pub pause: Duration,
    pub outcome: Result<PathBuf, String>,
}

impl ScriptedStage {
    pub fn succeeding(steps: &[f64], path: &str) -> Arc<Self> {
        Arc::new(Self {
            steps: steps.to_vec(),
            pause: Duration::from_millis(5),
            outcome: Ok(PathBuf::from(path)),
        })
    }

    pub fn failing(steps: &[f64], message: &str) -> Arc<Self> {
        Arc::new(Self {
            steps: steps.to_vec(),
            pause: Duration::from_millis(5),
            outcome: Err(message.to_string()),
        })
    }
}

#[async_trait]
impl StageExecutor for ScriptedStage {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn run(
        &self,
        _request: StageRequest,
        progress: ProgressSink,
    ) -> Result<StageOutput, StageError> {
        for step in &self.steps {
            progress.report(*step);
            tokio::time::sleep(self.pause).await;
        }
        match &self.outcome {
            Ok(path) => Ok(StageOutput::new(path.clone())),
            Err(message) => Err(StageError::new(message.clone())),
        }
    }
}

/// Blocks until a gate permit is available, tracking how many run at once
pub struct GatedStage {
    pub gate: Arc<Semaphore>,
    pub started: AtomicUsize,
    pub running: AtomicUsize,
    pub max_running: AtomicUsize,
}

impl GatedStage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Arc::new(Semaphore::new(0)),
            started: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl StageExecutor for GatedStage {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn run(
        &self,
        request: StageRequest,
        progress: ProgressSink,
    ) -> Result<StageOutput, StageError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let permit = self.gate.acquire().await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        permit
            .map_err(|_| StageError::new("gate closed"))?
            .forget();

        progress.report(100.0);
        Ok(StageOutput::new(format!("/downloads/{}.mp3", request.job_id)))
    }
}

/// Sets a flag when dropped
struct KillGuard(Arc<AtomicBool>);

impl Drop for KillGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Never returns; records when it is torn down
pub struct HangingStage {
    pub killed: Arc<AtomicBool>,
}

impl HangingStage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            killed: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl StageExecutor for HangingStage {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn run(
        &self,
        _request: StageRequest,
        progress: ProgressSink,
    ) -> Result<StageOutput, StageError> {
        let _guard = KillGuard(Arc::clone(&self.killed));
        progress.report(30.0);
        std::future::pending::<()>().await;
        Err(StageError::new("unreachable"))
    }
}

pub struct Harness {
    pub jobs: Arc<InMemoryJobRepository>,
    pub service: JobService,
    pub uploads: tempfile::TempDir,
}

pub fn harness(
    download: Arc<dyn StageExecutor>,
    extraction: Arc<dyn StageExecutor>,
    max_concurrent: usize,
    max_queued: usize,
    stage_timeout: Duration,
) -> Harness {
    let uploads = tempfile::tempdir().unwrap();
    let jobs = Arc::new(InMemoryJobRepository::new());

    let runner = Arc::new(StandardPipelineRunner::new(
        jobs.clone(),
        StageExecutors::new(download, extraction),
        StageWeights::default(),
        stage_timeout,
    ));
    let service = JobService::new(
        jobs.clone(),
        Scheduler::new(max_concurrent, max_queued),
        runner,
        uploads.path(),
        Duration::from_secs(180),
    );

    Harness {
        jobs,
        service,
        uploads,
    }
}

/// Polls the store until the job is terminal
pub async fn wait_terminal(jobs: &InMemoryJobRepository, id: Uuid) -> JobRecord {
    loop {
        let job = jobs.get(id).unwrap();
        if job.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
