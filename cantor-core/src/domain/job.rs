//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Highest progress a job can report while it has not completed.
///
/// Keeps `progress == 100` reserved for `Completed`.
pub const MAX_IN_FLIGHT_PROGRESS: f64 = 99.9;

/// Which stage sequence a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// A file handed over by the client; extraction only
    LocalUpload,
    /// A remote media URL; fetch first, then extraction
    RemoteFetch,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::LocalUpload => write!(f, "local_upload"),
            JobKind::RemoteFetch => write!(f, "remote_fetch"),
        }
    }
}

/// Job lifecycle status
///
/// `Pending -> [Downloading ->] Processing -> Completed`, with any
/// non-terminal status able to fall into `Failed`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Downloading,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Completed and Failed accept no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self -> next` is a legal step for a job of the given kind.
    ///
    /// Only remote jobs pass through `Downloading`; local uploads go straight
    /// from `Pending` to `Processing`.
    pub fn can_transition_to(self, next: JobStatus, kind: JobKind) -> bool {
        use JobStatus::*;

        match (self, next) {
            (Pending, Downloading) => kind == JobKind::RemoteFetch,
            (Pending, Processing) => kind == JobKind::LocalUpload,
            (Downloading, Processing) => kind == JobKind::RemoteFetch,
            (Processing, Completed) => true,
            (Pending | Downloading | Processing, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Downloading => write!(f, "downloading"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Artifact produced by a successful job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    pub path: PathBuf,
    pub name: String,
}

/// Failure captured on a job. Written once, never replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub message: String,
    pub details: Option<String>,
}

/// Job record
///
/// Owned exclusively by the job store; everyone else works on clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Global progress in [0, 100]
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set only when the job completes; failures leave it empty
    pub completed_at: Option<DateTime<Utc>>,

    /// File name or source URL the job was created with
    pub input: String,
    /// Human readable name of the input once known (e.g. a remote title)
    pub input_name: Option<String>,
    /// Local copy of the input once materialized
    pub input_artifact_path: Option<PathBuf>,

    pub output: Option<JobOutput>,
    pub error: Option<JobFailure>,

    /// Wall-clock seconds from creation to completion or failure
    pub processing_duration: Option<f64>,
}

impl JobRecord {
    /// Creates a pending record with a fresh identity
    pub fn new(kind: JobKind, input: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Pending,
            progress: 0.0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            input: input.into(),
            input_name: None,
            input_artifact_path: None,
            output: None,
            error: None,
            processing_duration: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time elapsed since the last mutation
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }

    /// Seconds elapsed since creation
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_pending() {
        let record = JobRecord::new(JobKind::LocalUpload, "song.mp3");

        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.progress, 0.0);
        assert_eq!(record.input, "song.mp3");
        assert!(record.output.is_none());
        assert!(record.error.is_none());
        assert!(record.completed_at.is_none());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_records_get_distinct_ids() {
        let a = JobRecord::new(JobKind::LocalUpload, "a.mp3");
        let b = JobRecord::new(JobKind::LocalUpload, "a.mp3");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_local_upload_transitions() {
        use JobStatus::*;
        let kind = JobKind::LocalUpload;

        assert!(Pending.can_transition_to(Processing, kind));
        assert!(Processing.can_transition_to(Completed, kind));
        assert!(Processing.can_transition_to(Failed, kind));
        assert!(Pending.can_transition_to(Failed, kind));

        assert!(!Pending.can_transition_to(Downloading, kind));
        assert!(!Pending.can_transition_to(Completed, kind));
    }

    #[test]
    fn test_remote_fetch_transitions() {
        use JobStatus::*;
        let kind = JobKind::RemoteFetch;

        assert!(Pending.can_transition_to(Downloading, kind));
        assert!(Downloading.can_transition_to(Processing, kind));
        assert!(Downloading.can_transition_to(Failed, kind));
        assert!(!Pending.can_transition_to(Processing, kind));
        assert!(!Downloading.can_transition_to(Completed, kind));
    }

    #[test]
    fn test_terminal_statuses_are_final() {
        for kind in [JobKind::LocalUpload, JobKind::RemoteFetch] {
            for next in JobStatus::ALL {
                assert!(!JobStatus::Completed.can_transition_to(next, kind));
                assert!(!JobStatus::Failed.can_transition_to(next, kind));
            }
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");

        let kind = serde_json::to_string(&JobKind::RemoteFetch).unwrap();
        assert_eq!(kind, "\"remote_fetch\"");
    }
}
