//! Stage executors
//!
//! A stage executor performs one externally executed step of a job (fetching
//! remote media, or separating the vocal track). It reports stage-local
//! progress in [0, 100] through a `ProgressSink` and returns the artifact it
//! produced or a `StageError`.
//!
//! Executors run in their own task. They are never cancelled cooperatively:
//! on timeout the task is aborted, and executors that spawn processes must
//! make sure dropping their future kills the process.

mod command;
pub mod demucs;
pub mod ytdlp;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::StageError;

pub use command::{CommandEvent, CommandOutcome, run_command};
pub use demucs::DemucsExtractor;
pub use ytdlp::YtDlpDownloader;

/// What a stage works on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageInput {
    /// A file already on local disk
    File(PathBuf),
    /// A remote media URL
    Url(String),
}

/// One stage invocation
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub job_id: Uuid,
    pub input: StageInput,
}

/// Artifact produced by a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    pub path: PathBuf,
    /// Human readable name, when the stage learns one (e.g. a media title)
    pub display_name: Option<String>,
}

impl StageOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Display name, falling back to the artifact's file name
    pub fn name(&self) -> String {
        self.display_name.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string())
        })
    }
}

/// Write end of a stage's progress channel
///
/// Values are clamped to [0, 100] and only ever move forward; reports that
/// would lower the value are dropped.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Arc<watch::Sender<f64>>,
}

impl ProgressSink {
    /// Creates a sink and the receiver the pipeline reads from
    pub fn channel() -> (Self, watch::Receiver<f64>) {
        let (tx, rx) = watch::channel(0.0);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// A sink nobody listens to
    pub fn noop() -> Self {
        Self::channel().0
    }

    pub fn report(&self, progress: f64) {
        if progress.is_nan() {
            return;
        }
        let progress = progress.clamp(0.0, 100.0);
        self.tx.send_if_modified(|current| {
            if progress > *current {
                *current = progress;
                true
            } else {
                false
            }
        });
    }

    /// Last reported value
    pub fn current(&self) -> f64 {
        *self.tx.borrow()
    }
}

/// Executor trait for a single processing stage
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Runs the stage to completion
    async fn run(
        &self,
        request: StageRequest,
        progress: ProgressSink,
    ) -> Result<StageOutput, StageError>;
}

/// Builds a stage error carrying the tail of a tool's stderr as details
pub(crate) fn tool_failure(message: impl Into<String>, stderr: &str) -> StageError {
    let error = StageError::new(message);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        error
    } else {
        error.with_details(stderr)
    }
}
