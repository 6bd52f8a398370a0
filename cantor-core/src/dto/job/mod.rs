//! Job status DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{JobKind, JobRecord, JobStatus};

/// Point-in-time status of one job, as shown to a polling client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: f64,
    pub message: String,
    pub input_name: Option<String>,
    pub output_name: Option<String>,
    pub error: Option<String>,
    pub error_details: Option<String>,
    pub processing_duration: Option<f64>,

    /// 1-based position in the admission queue while waiting for a slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,

    /// Rough wait estimate derived from the queue position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_wait_secs: Option<u64>,
}

impl JobStatusReport {
    /// Attaches queue information to a report of a pending job
    pub fn with_queue(mut self, position: Option<usize>, estimated_wait_secs: Option<u64>) -> Self {
        self.queue_position = position;
        self.estimated_wait_secs = estimated_wait_secs;
        if let Some(position) = position {
            self.message = format!("Waiting in queue (position {})", position);
        }
        self
    }
}

impl From<&JobRecord> for JobStatusReport {
    fn from(record: &JobRecord) -> Self {
        let message = match record.status {
            JobStatus::Pending => "Waiting to process".to_string(),
            JobStatus::Downloading => "Downloading source media".to_string(),
            JobStatus::Processing => "Extracting vocals".to_string(),
            JobStatus::Completed => "Processing complete".to_string(),
            JobStatus::Failed => "Processing failed".to_string(),
        };

        Self {
            job_id: record.id,
            kind: record.kind,
            status: record.status,
            progress: record.progress,
            message,
            input_name: record
                .input_name
                .clone()
                .or_else(|| Some(record.input.clone())),
            output_name: record.output.as_ref().map(|o| o.name.clone()),
            error: record.error.as_ref().map(|e| e.message.clone()),
            error_details: record.error.as_ref().and_then(|e| e.details.clone()),
            processing_duration: record.processing_duration,
            queue_position: None,
            estimated_wait_secs: None,
        }
    }
}
