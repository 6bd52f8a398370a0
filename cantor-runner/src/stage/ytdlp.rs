//! Remote media fetch backed by yt-dlp

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::command::{CommandEvent, run_command};
use super::{ProgressSink, StageExecutor, StageInput, StageOutput, StageRequest, tool_failure};
use crate::error::StageError;

/// Downloads the best audio track of a URL into the upload root as
/// `<job id>.<ext>`, converted to mp3.
#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    bin: String,
    upload_dir: PathBuf,
}

impl YtDlpDownloader {
    pub fn new(bin: impl Into<String>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            upload_dir: upload_dir.into(),
        }
    }

    fn command(&self, job_id: Uuid, url: &str) -> Command {
        let template = self.upload_dir.join(format!("{}.%(ext)s", job_id));

        let mut command = Command::new(&self.bin);
        command
            .args(["-f", "bestaudio/best", "-x"])
            .args(["--audio-format", "mp3", "--audio-quality", "192K"])
            .args(["--newline", "--progress", "--no-warnings", "--no-playlist"])
            .args(["--print", "after_move:title"])
            .arg("-o")
            .arg(template)
            .arg(url);
        command
    }
}

#[async_trait]
impl StageExecutor for YtDlpDownloader {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn run(
        &self,
        request: StageRequest,
        progress: ProgressSink,
    ) -> Result<StageOutput, StageError> {
        let StageInput::Url(url) = &request.input else {
            return Err(StageError::new("Download stage requires a URL"));
        };

        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|e| {
                StageError::new("Failed to prepare upload directory").with_details(e.to_string())
            })?;

        info!("Starting download for job {}: {}", request.job_id, url);

        let mut title = None;
        let mut command = self.command(request.job_id, url);
        let outcome = run_command(&mut command, None, |event| {
            if let CommandEvent::Stdout(line) = event {
                match parse_progress(line) {
                    Some(pct) => progress.report(pct),
                    None if !line.trim_start().starts_with('[') && !line.trim().is_empty() => {
                        title = Some(line.trim().to_string());
                    }
                    None => {}
                }
            }
        })
        .await
        .map_err(|e| {
            StageError::new(format!("Failed to start {}", self.bin)).with_details(e.to_string())
        })?;

        if !outcome.status.success() {
            warn!(
                "Download for job {} failed with {}",
                request.job_id, outcome.status
            );
            return Err(tool_failure(describe_failure(&outcome.stderr), &outcome.stderr));
        }

        let path = locate_download(&self.upload_dir, request.job_id)
            .await
            .ok_or_else(|| StageError::new("Downloaded file not found"))?;

        progress.report(100.0);
        debug!("Downloaded job {} to {}", request.job_id, path.display());

        let output = StageOutput::new(path);
        Ok(match title {
            Some(title) => output.with_display_name(title),
            None => output,
        })
    }
}

/// Parses `[download]  42.5% of ...` into 42.5
fn parse_progress(line: &str) -> Option<f64> {
    let rest = line.trim_start().strip_prefix("[download]")?.trim_start();
    let (pct, _) = rest.split_once('%')?;
    pct.trim().parse().ok()
}

/// Turns yt-dlp's error output into a message fit for the job record
fn describe_failure(stderr: &str) -> String {
    let lower = stderr.to_lowercase();

    if stderr.contains("Video unavailable") || lower.contains("private video") {
        "Video is unavailable or private".to_string()
    } else if lower.contains("age-restricted") || lower.contains("confirm your age") {
        "Video is age-restricted".to_string()
    } else if lower.contains("copyright") {
        "Video is blocked due to copyright".to_string()
    } else if lower.contains("too many requests") || lower.contains("http error 429") {
        "Too many requests. Please try again later.".to_string()
    } else {
        let reason = stderr
            .lines()
            .rev()
            .find_map(|line| line.split_once("ERROR:").map(|(_, msg)| msg.trim()))
            .filter(|msg| !msg.is_empty())
            .unwrap_or("yt-dlp exited with an error");
        format!("Download failed: {}", reason)
    }
}

/// Finds `<id>.mp3`, or any `<id>.*` the post-processor left behind
async fn locate_download(upload_dir: &Path, job_id: Uuid) -> Option<PathBuf> {
    let expected = upload_dir.join(format!("{}.mp3", job_id));
    if tokio::fs::try_exists(&expected).await.unwrap_or(false) {
        return Some(expected);
    }

    let prefix = format!("{}.", job_id);
    let mut entries = tokio::fs::read_dir(upload_dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && !name.ends_with(".part") {
            return Some(entry.path());
        }
    }
    None
}
