//! Stage weighting
//!
//! A job runs an ordered list of stages. Each stage reports its own progress
//! in [0, 100]; the job's global progress is composed from those values using
//! a fixed weight per stage. For stage `i` with weight `w_i`, local progress
//! `p` maps to `offset_i + p * w_i / 100` where `offset_i` is the sum of the
//! weights before it.

use serde::{Deserialize, Serialize};

use super::job::{JobKind, JobStatus};

/// Default share of global progress given to the download stage of a remote job
pub const DEFAULT_DOWNLOAD_WEIGHT: f64 = 40.0;

/// One externally executed processing step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Fetch remote media into the upload root
    Download,
    /// Separate the vocal track into the output root
    Extraction,
}

impl StageKind {
    /// Status a job shows while this stage runs
    pub fn status(self) -> JobStatus {
        match self {
            StageKind::Download => JobStatus::Downloading,
            StageKind::Extraction => JobStatus::Processing,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Download => write!(f, "download"),
            StageKind::Extraction => write!(f, "extraction"),
        }
    }
}

/// A stage together with its share of global progress
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedStage {
    pub stage: StageKind,
    pub weight: f64,
}

/// Ordered stages whose weights sum to 100
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePlan {
    stages: Vec<WeightedStage>,
}

impl StagePlan {
    /// Builds a plan, or `None` if it is empty, has a non-positive weight,
    /// or its weights do not sum to 100.
    pub fn new(stages: Vec<WeightedStage>) -> Option<Self> {
        if stages.is_empty() || stages.iter().any(|s| s.weight <= 0.0) {
            return None;
        }

        let total: f64 = stages.iter().map(|s| s.weight).sum();
        if (total - 100.0).abs() > 1e-6 {
            return None;
        }

        Some(Self { stages })
    }

    pub fn stages(&self) -> &[WeightedStage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Global progress at which stage `index` starts
    pub fn offset(&self, index: usize) -> f64 {
        self.stages.iter().take(index).map(|s| s.weight).sum()
    }

    /// Maps stage-local progress of stage `index` onto global progress
    pub fn global_progress(&self, index: usize, local: f64) -> f64 {
        let Some(stage) = self.stages.get(index) else {
            return 100.0;
        };
        let local = if local.is_nan() { 0.0 } else { local.clamp(0.0, 100.0) };

        self.offset(index) + local * stage.weight / 100.0
    }
}

/// Stage plan per job kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageWeights {
    local_upload: StagePlan,
    remote_fetch: StagePlan,
}

impl StageWeights {
    /// Weights for a remote job with the given download share; extraction gets
    /// the rest. Local uploads always spend 100 on extraction.
    pub fn with_download_weight(download: f64) -> Option<Self> {
        if !(download > 0.0 && download < 100.0) {
            return None;
        }

        let local_upload = StagePlan::new(vec![WeightedStage {
            stage: StageKind::Extraction,
            weight: 100.0,
        }])?;
        let remote_fetch = StagePlan::new(vec![
            WeightedStage {
                stage: StageKind::Download,
                weight: download,
            },
            WeightedStage {
                stage: StageKind::Extraction,
                weight: 100.0 - download,
            },
        ])?;

        Some(Self {
            local_upload,
            remote_fetch,
        })
    }

    pub fn plan_for(&self, kind: JobKind) -> &StagePlan {
        match kind {
            JobKind::LocalUpload => &self.local_upload,
            JobKind::RemoteFetch => &self.remote_fetch,
        }
    }
}

impl Default for StageWeights {
    fn default() -> Self {
        let local_upload = StagePlan {
            stages: vec![WeightedStage {
                stage: StageKind::Extraction,
                weight: 100.0,
            }],
        };
        let remote_fetch = StagePlan {
            stages: vec![
                WeightedStage {
                    stage: StageKind::Download,
                    weight: DEFAULT_DOWNLOAD_WEIGHT,
                },
                WeightedStage {
                    stage: StageKind::Extraction,
                    weight: 100.0 - DEFAULT_DOWNLOAD_WEIGHT,
                },
            ],
        };

        Self {
            local_upload,
            remote_fetch,
        }
    }
}
