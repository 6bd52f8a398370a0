//! Engine statistics DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::job::JobStatus;

/// Snapshot of the job store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Records currently held
    pub total: usize,
    /// Records not yet in a terminal status
    pub active: usize,
    pub by_status: BTreeMap<JobStatus, usize>,
}

/// Snapshot of the admission controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Pipelines currently holding an execution slot
    pub active: usize,
    /// Admitted jobs waiting for a slot
    pub queued: usize,
    pub max_concurrent: usize,
    pub max_queued: usize,
}

/// Combined statistics for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub store: StoreStats,
    pub scheduler: SchedulerStats,
}

/// Outcome of one expiry sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Expired entries deleted under the upload root
    pub upload_deleted: usize,
    /// Expired entries deleted under the output root
    pub output_deleted: usize,
    /// Terminal job records dropped from the store
    pub records_removed: usize,
    /// Expired entries left alone because their job is still running
    pub skipped_active: usize,
    /// Entries that could not be deleted; retried next sweep
    pub errors: usize,
    pub finished_at: DateTime<Utc>,
}

impl SweepReport {
    pub fn empty(finished_at: DateTime<Utc>) -> Self {
        Self {
            upload_deleted: 0,
            output_deleted: 0,
            records_removed: 0,
            skipped_active: 0,
            errors: 0,
            finished_at,
        }
    }

    /// Whether the sweep changed anything on disk or in the store
    pub fn is_noop(&self) -> bool {
        self.upload_deleted == 0 && self.output_deleted == 0 && self.records_removed == 0
    }

    /// Nothing changed and nothing failed
    pub fn is_quiet(&self) -> bool {
        self.is_noop() && self.errors == 0
    }
}

/// Size of one artifact root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirUsage {
    pub size_bytes: u64,
    pub file_count: usize,
}

impl DirUsage {
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

impl std::ops::Add for DirUsage {
    type Output = DirUsage;

    fn add(self, rhs: DirUsage) -> DirUsage {
        DirUsage {
            size_bytes: self.size_bytes + rhs.size_bytes,
            file_count: self.file_count + rhs.file_count,
        }
    }
}

/// Disk usage of the artifact roots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub upload: DirUsage,
    pub output: DirUsage,
    pub total: DirUsage,
    /// Retention window applied by the reaper
    pub expiry_hours: f64,
}
