//! Vocal separation backed by demucs

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::command::{CommandEvent, run_command};
use super::{ProgressSink, StageExecutor, StageInput, StageOutput, StageRequest, tool_failure};
use crate::error::StageError;

/// How often the progress estimate advances while demucs runs
const ESTIMATE_TICK: Duration = Duration::from_secs(2);

const STARTED: f64 = 10.0;
const LAUNCHED: f64 = 20.0;
/// The running estimate never passes this value
const ESTIMATE_CEILING: f64 = 85.0;
const SEPARATED: f64 = 90.0;
/// Ticks it takes the estimate to sweep from LAUNCHED towards SEPARATED
const ESTIMATE_STEPS: f64 = 30.0;

/// Separates the vocal stem of a local file into
/// `<output>/<job id>/<job id>_vocals.wav`.
#[derive(Debug, Clone)]
pub struct DemucsExtractor {
    python: String,
    model: String,
    output_dir: PathBuf,
    tick: Duration,
}

impl DemucsExtractor {
    pub fn new(
        python: impl Into<String>,
        model: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            python: python.into(),
            model: model.into(),
            output_dir: output_dir.into(),
            tick: ESTIMATE_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    fn command(&self, input: &Path, job_dir: &Path) -> Command {
        let mut command = Command::new(&self.python);
        command
            .args(["-m", "demucs", "--two-stems", "vocals"])
            .arg("-n")
            .arg(&self.model)
            .arg("-o")
            .arg(job_dir)
            .arg(input);
        command
    }
}

#[async_trait]
impl StageExecutor for DemucsExtractor {
    fn name(&self) -> &'static str {
        "demucs"
    }

    async fn run(
        &self,
        request: StageRequest,
        progress: ProgressSink,
    ) -> Result<StageOutput, StageError> {
        let StageInput::File(input) = &request.input else {
            return Err(StageError::new("Extraction stage requires a local file"));
        };

        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(StageError::new(format!(
                "Input file not found: {}",
                input.display()
            )));
        }

        let job_dir = self.output_dir.join(request.job_id.to_string());
        tokio::fs::create_dir_all(&job_dir).await.map_err(|e| {
            StageError::new("Failed to prepare output directory").with_details(e.to_string())
        })?;

        info!(
            "Starting vocal extraction for job {} with {}: {}",
            request.job_id,
            self.model,
            input.display()
        );
        progress.report(STARTED);

        let mut command = self.command(input, &job_dir);
        progress.report(LAUNCHED);

        let step = (SEPARATED - LAUNCHED) / ESTIMATE_STEPS;
        let mut estimate = LAUNCHED;
        let outcome = run_command(&mut command, Some(self.tick), |event| {
            if let CommandEvent::Tick = event {
                estimate = (estimate + step).min(ESTIMATE_CEILING);
                progress.report(estimate);
            }
        })
        .await
        .map_err(|e| {
            StageError::new(format!("Failed to start {}", self.python)).with_details(e.to_string())
        })?;

        if !outcome.status.success() {
            warn!(
                "Demucs for job {} exited with {}",
                request.job_id, outcome.status
            );
            return Err(tool_failure("Demucs failed", &outcome.stderr));
        }
        progress.report(SEPARATED);

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let vocals = find_vocals(&job_dir, &self.model, &stem)
            .await
            .ok_or_else(|| StageError::new("Vocal file not found in output"))?;

        let final_path = job_dir.join(format!("{}_vocals.wav", request.job_id));
        tokio::fs::rename(&vocals, &final_path).await.map_err(|e| {
            StageError::new("Failed to move extracted vocals").with_details(e.to_string())
        })?;

        let model_dir = job_dir.join(&self.model);
        if let Err(e) = tokio::fs::remove_dir_all(&model_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", model_dir.display(), e);
            }
        }

        progress.report(100.0);
        debug!(
            "Vocal extraction for job {} written to {}",
            request.job_id,
            final_path.display()
        );

        Ok(StageOutput::new(final_path))
    }
}

/// Demucs writes `<job dir>/<model>/<input stem>/vocals.wav`; fall back to
/// the first `vocals.wav` anywhere under the job directory.
async fn find_vocals(job_dir: &Path, model: &str, stem: &str) -> Option<PathBuf> {
    let expected = job_dir.join(model).join(stem).join("vocals.wav");
    if tokio::fs::try_exists(&expected).await.unwrap_or(false) {
        return Some(expected);
    }

    let root = job_dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .find(|entry| entry.file_type().is_file() && entry.file_name() == "vocals.wav")
            .map(|entry| entry.into_path())
    })
    .await
    .ok()
    .flatten()
}
