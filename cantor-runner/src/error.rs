//! Error taxonomy for the job engine

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use cantor_core::domain::job::JobStatus;
use cantor_core::domain::stage::StageKind;
use thiserror::Error;
use uuid::Uuid;

/// Admission refused by the scheduler
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Every slot is busy and the wait queue is full; retry later
    #[error("Server is busy ({active} running, {queued} queued), try again later")]
    QueueFull { active: usize, queued: usize },

    /// The scheduler is shutting down and admits nothing new
    #[error("Scheduler is shut down")]
    Closed,
}

/// Failure reported by a stage executor
///
/// The message is stored verbatim as the job's error message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StageError {
    pub message: String,
    pub details: Option<String>,
}

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Job store errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// No record with this identity
    #[error("Job {0} not found")]
    NotFound(Uuid),

    /// The requested step is not part of the job's state machine
    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    /// The job has already reached a terminal status
    #[error("Job {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: JobStatus },

    /// The job is still running and cannot be removed
    #[error("Job {id} is still {status}")]
    Active { id: Uuid, status: JobStatus },
}

/// Filesystem failure while placing or deleting an artifact
#[derive(Debug, Error)]
#[error("Storage error at {}: {source}", .path.display())]
pub struct StorageError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl StorageError {
    pub fn new(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

/// Why a job's pipeline stopped short of completion
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageError),

    /// The stage exceeded the hard deadline and was terminated
    #[error("Processing timed out after {} seconds", .after.as_secs())]
    Timeout { stage: StageKind, after: Duration },

    /// The stage executor panicked
    #[error("Processing failed")]
    Panicked { stage: StageKind, details: String },

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PipelineError {
    /// Supplementary text stored next to the job's error message
    pub fn details(&self) -> Option<String> {
        match self {
            PipelineError::Stage(e) => e.details.clone(),
            PipelineError::Timeout { stage, .. } => Some(format!("{} stage was terminated", stage)),
            PipelineError::Panicked { stage, details } => {
                Some(format!("{} stage panicked: {}", stage, details))
            }
            PipelineError::Job(e) => Some(e.to_string()),
            PipelineError::Storage(e) => Some(e.to_string()),
        }
    }
}

/// Why a submission was not accepted
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
