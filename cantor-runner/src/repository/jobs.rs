//! Jobs repository
//!
//! Holds the lifecycle state of every job:
//! - Creating pending records
//! - Moving records through the status machine
//! - Composing monotonic progress
//! - Recording the terminal output or error
//! - Removing expired terminal records

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use cantor_core::domain::job::{
    JobFailure, JobKind, JobOutput, JobRecord, JobStatus, MAX_IN_FLIGHT_PROGRESS,
};
use cantor_core::dto::stats::StoreStats;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::JobError;

/// Repository trait for job state
///
/// Every mutation bumps `updated_at`. Calls against an unknown id are logged
/// and reported as `JobError::NotFound`; they never panic.
pub trait JobRepository: Send + Sync {
    /// Inserts a fresh `Pending` record with progress 0
    fn create(&self, kind: JobKind, input: &str) -> JobRecord;

    /// Returns a snapshot of the record
    fn get(&self, id: Uuid) -> Result<JobRecord, JobError>;

    /// Moves the job to a non-terminal status, optionally raising its progress.
    ///
    /// `Completed` and `Failed` are only reachable through `set_output` and
    /// `set_error`.
    fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: Option<f64>,
    ) -> Result<(), JobError>;

    /// Raises the job's progress. Lower values, unknown ids and terminal jobs
    /// are ignored.
    fn update_progress(&self, id: Uuid, progress: f64);

    /// Records where the job's input now lives on disk
    fn set_input_artifact(
        &self,
        id: Uuid,
        path: PathBuf,
        name: Option<String>,
    ) -> Result<(), JobError>;

    /// Completes the job with its final artifact
    fn set_output(&self, id: Uuid, path: PathBuf, name: String) -> Result<(), JobError>;

    /// Fails the job. The first error recorded is kept for good.
    fn set_error(&self, id: Uuid, message: String, details: Option<String>)
    -> Result<(), JobError>;

    /// Deletes a terminal record
    fn remove(&self, id: Uuid) -> Result<JobRecord, JobError>;

    /// Snapshots of all records
    fn list(&self) -> Vec<JobRecord>;

    fn stats(&self) -> StoreStats;
}

/// In-memory implementation of JobRepository
///
/// Records live for the lifetime of the process only.
#[derive(Default)]
pub struct InMemoryJobRepository {
    records: RwLock<HashMap<Uuid, JobRecord>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the record under the write lock and bumps `updated_at`
    /// when it succeeds.
    fn mutate<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut JobRecord) -> Result<T, JobError>,
    ) -> Result<T, JobError> {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(&id) else {
            warn!("Job {} not found in store", id);
            return Err(JobError::NotFound(id));
        };

        let value = f(record)?;
        record.updated_at = Utc::now();
        Ok(value)
    }
}

fn clamp_in_flight(progress: f64) -> f64 {
    if progress.is_nan() {
        return 0.0;
    }
    progress.clamp(0.0, MAX_IN_FLIGHT_PROGRESS)
}

impl JobRepository for InMemoryJobRepository {
    fn create(&self, kind: JobKind, input: &str) -> JobRecord {
        let record = JobRecord::new(kind, input);
        self.records.write().insert(record.id, record.clone());

        debug!("Created {} job {} for {}", kind, record.id, input);
        record
    }

    fn get(&self, id: Uuid) -> Result<JobRecord, JobError> {
        self.records
            .read()
            .get(&id)
            .cloned()
            .ok_or(JobError::NotFound(id))
    }

    fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: Option<f64>,
    ) -> Result<(), JobError> {
        self.mutate(id, |record| {
            if record.is_terminal() {
                return Err(JobError::AlreadyTerminal {
                    id,
                    status: record.status,
                });
            }

            let same = record.status == status;
            if status.is_terminal() || !(same || record.status.can_transition_to(status, record.kind))
            {
                return Err(JobError::InvalidTransition {
                    id,
                    from: record.status,
                    to: status,
                });
            }

            if !same {
                debug!("Job {} {} -> {}", id, record.status, status);
            }
            record.status = status;
            if let Some(progress) = progress {
                record.progress = record.progress.max(clamp_in_flight(progress));
            }
            Ok(())
        })
    }

    fn update_progress(&self, id: Uuid, progress: f64) {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(&id) else {
            debug!("Ignoring progress for unknown job {}", id);
            return;
        };

        let progress = clamp_in_flight(progress);
        if record.is_terminal() || progress <= record.progress {
            return;
        }

        record.progress = progress;
        record.updated_at = Utc::now();
    }

    fn set_input_artifact(
        &self,
        id: Uuid,
        path: PathBuf,
        name: Option<String>,
    ) -> Result<(), JobError> {
        self.mutate(id, |record| {
            record.input_artifact_path = Some(path);
            if name.is_some() {
                record.input_name = name;
            }
            Ok(())
        })
    }

    fn set_output(&self, id: Uuid, path: PathBuf, name: String) -> Result<(), JobError> {
        self.mutate(id, |record| {
            if record.is_terminal() {
                return Err(JobError::AlreadyTerminal {
                    id,
                    status: record.status,
                });
            }
            if !record.status.can_transition_to(JobStatus::Completed, record.kind) {
                return Err(JobError::InvalidTransition {
                    id,
                    from: record.status,
                    to: JobStatus::Completed,
                });
            }

            let now = Utc::now();
            record.status = JobStatus::Completed;
            record.progress = 100.0;
            record.output = Some(JobOutput { path, name });
            record.completed_at = Some(now);
            record.processing_duration = Some(record.elapsed_secs(now));
            Ok(())
        })
    }

    fn set_error(
        &self,
        id: Uuid,
        message: String,
        details: Option<String>,
    ) -> Result<(), JobError> {
        self.mutate(id, |record| {
            if record.is_terminal() {
                return Err(JobError::AlreadyTerminal {
                    id,
                    status: record.status,
                });
            }

            record.status = JobStatus::Failed;
            record.output = None;
            record.error = Some(JobFailure { message, details });
            record.processing_duration = Some(record.elapsed_secs(Utc::now()));
            Ok(())
        })
    }

    fn remove(&self, id: Uuid) -> Result<JobRecord, JobError> {
        let mut records = self.records.write();
        let status = records
            .get(&id)
            .map(|record| record.status)
            .ok_or(JobError::NotFound(id))?;

        if !status.is_terminal() {
            return Err(JobError::Active { id, status });
        }

        records.remove(&id).ok_or(JobError::NotFound(id))
    }

    fn list(&self) -> Vec<JobRecord> {
        self.records.read().values().cloned().collect()
    }

    fn stats(&self) -> StoreStats {
        let records = self.records.read();
        let mut by_status = BTreeMap::new();
        for record in records.values() {
            *by_status.entry(record.status).or_insert(0) += 1;
        }

        StoreStats {
            total: records.len(),
            active: records.values().filter(|r| !r.is_terminal()).count(),
            by_status,
        }
    }
}
