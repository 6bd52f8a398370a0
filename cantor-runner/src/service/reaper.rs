//! Expiry reaper
//!
//! Periodically reclaims disk space from jobs that finished more than a
//! retention window ago, and drops their records from the store.
//!
//! Everything directly under the upload and output roots is named after the
//! job that owns it (`<job id>.<ext>` or `<job id>/`). An entry is deleted
//! once its mtime falls outside the window, unless its owner is still
//! running. A terminal record past the window is removed once every artifact
//! it owns is gone. Running jobs are never touched.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cantor_core::dto::stats::{DirUsage, StorageUsage, SweepReport};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::StorageError;
use crate::repository::JobRepository;

/// Configuration for the expiry reaper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Age past which terminal jobs and their artifacts are deleted
    pub retention: Duration,
    /// Time between sweeps
    pub interval: Duration,
}

impl ReaperConfig {
    pub fn new(upload_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
            retention: Duration::from_secs(24 * 3600),
            interval: Duration::from_secs(3600),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Upload,
    Output,
}

/// A non-expired entry belonging to a terminal or unknown job
struct OwnedEntry {
    root: Root,
    path: PathBuf,
    is_dir: bool,
}

struct Sweeper {
    config: ReaperConfig,
    jobs: Arc<dyn JobRepository>,
}

impl Sweeper {
    fn retention(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.retention).unwrap_or(chrono::Duration::MAX)
    }

    fn count(report: &mut SweepReport, root: Root) {
        match root {
            Root::Upload => report.upload_deleted += 1,
            Root::Output => report.output_deleted += 1,
        }
    }

    /// Whether the owning job is known and still running
    fn owner_is_active(&self, owner: Uuid) -> bool {
        self.jobs
            .get(owner)
            .map(|job| !job.is_terminal())
            .unwrap_or(false)
    }

    async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let threshold = now.checked_sub_signed(self.retention());
        let mut report = SweepReport::empty(now);
        let mut failed_owners = Vec::new();
        let mut remaining: HashMap<Uuid, Vec<OwnedEntry>> = HashMap::new();

        let roots = [
            (Root::Upload, self.config.upload_dir.clone()),
            (Root::Output, self.config.output_dir.clone()),
        ];

        for (root, dir) in roots {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("Cannot scan {}: {}", dir.display(), e);
                    report.errors += 1;
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Cannot scan {}: {}", dir.display(), e);
                        report.errors += 1;
                        break;
                    }
                };

                let path = entry.path();
                let owner = owner_of(&entry.file_name());
                let metadata = match tokio::fs::symlink_metadata(&path).await {
                    Ok(metadata) => metadata,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => {
                        warn!("Cannot check {}: {}", path.display(), e);
                        report.errors += 1;
                        continue;
                    }
                };
                let is_dir = metadata.is_dir();

                let expired = match (metadata.modified(), threshold) {
                    (Ok(modified), Some(threshold)) => DateTime::<Utc>::from(modified) < threshold,
                    _ => false,
                };

                if !expired {
                    if let Some(owner) = owner {
                        remaining
                            .entry(owner)
                            .or_default()
                            .push(OwnedEntry { root, path, is_dir });
                    }
                    continue;
                }

                if let Some(owner) = owner
                    && self.owner_is_active(owner)
                {
                    debug!("Keeping {} of running job {}", path.display(), owner);
                    report.skipped_active += 1;
                    continue;
                }

                match remove_entry(&path, is_dir).await {
                    Ok(true) => {
                        info!("Deleted expired {}", path.display());
                        Self::count(&mut report, root);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("{}", e);
                        report.errors += 1;
                        if let Some(owner) = owner {
                            failed_owners.push(owner);
                        }
                    }
                }
            }
        }

        let retention = self.retention();
        for record in self.jobs.list() {
            if !record.is_terminal() || record.idle_for(now) <= retention {
                continue;
            }
            if failed_owners.contains(&record.id) {
                debug!("Keeping record {} until its artifacts are deleted", record.id);
                continue;
            }

            let mut clean = true;
            for owned in remaining.remove(&record.id).unwrap_or_default() {
                match remove_entry(&owned.path, owned.is_dir).await {
                    Ok(true) => Self::count(&mut report, owned.root),
                    Ok(false) => {}
                    Err(e) => {
                        warn!("{}", e);
                        report.errors += 1;
                        clean = false;
                    }
                }
            }
            if !clean {
                continue;
            }

            match self.jobs.remove(record.id) {
                Ok(_) => {
                    debug!("Removed expired job record {}", record.id);
                    report.records_removed += 1;
                }
                Err(e) => debug!("Job record {} not removed: {}", record.id, e),
            }
        }

        report.finished_at = Utc::now();
        report
    }
}

/// Job id an upload or output entry belongs to
fn owner_of(name: &OsStr) -> Option<Uuid> {
    let name = name.to_str()?;
    let id = name.split(['.', '_']).next()?;
    Uuid::parse_str(id).ok()
}

/// Deletes a file or a directory tree. `Ok(false)` if it was already gone.
async fn remove_entry(path: &Path, is_dir: bool) -> Result<bool, StorageError> {
    let result = if is_dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::new(path, e)),
    }
}

fn log_sweep(report: &SweepReport) {
    if report.is_quiet() {
        debug!("Sweep found nothing to delete");
        return;
    }

    if report.errors > 0 {
        warn!(
            "Sweep deleted {} upload and {} output entries, removed {} records, {} deletions failed",
            report.upload_deleted, report.output_deleted, report.records_removed, report.errors
        );
    } else {
        info!(
            "Sweep deleted {} upload and {} output entries, removed {} records",
            report.upload_deleted, report.output_deleted, report.records_removed
        );
    }
}

fn dir_usage(dir: &Path) -> DirUsage {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .fold(DirUsage::default(), |usage, metadata| DirUsage {
            size_bytes: usage.size_bytes + metadata.len(),
            file_count: usage.file_count + 1,
        })
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background sweep with explicit start/stop
pub struct ExpiryReaper {
    sweeper: Arc<Sweeper>,
    task: Mutex<Option<RunningTask>>,
}

impl ExpiryReaper {
    pub fn new(config: ReaperConfig, jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            sweeper: Arc::new(Sweeper { config, jobs }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.sweeper.config
    }

    /// Spawns the recurring sweep. The first sweep runs one interval from now.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("Expiry reaper already running");
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let sweeper = Arc::clone(&self.sweeper);

        let handle = tokio::spawn(async move {
            let period = sweeper.config.interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                "Expiry reaper started (retention: {:?}, interval: {:?})",
                sweeper.config.retention, period
            );

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = sweeper.sweep_at(Utc::now()).await;
                        log_sweep(&report);
                    }
                }
            }

            info!("Expiry reaper stopped");
        });

        *task = Some(RunningTask { cancel, handle });
    }

    /// Cancels the recurring sweep and waits for it to wind down. A sweep in
    /// progress finishes first.
    pub async fn stop(&self) {
        let running = self.task.lock().take();
        let Some(running) = running else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            warn!("Expiry reaper task ended abnormally: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Runs one sweep now
    pub async fn sweep(&self) -> SweepReport {
        self.sweeper.sweep_at(Utc::now()).await
    }

    /// Runs one sweep as if the current time were `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        self.sweeper.sweep_at(now).await
    }

    /// Size and file count of the upload and output roots
    pub async fn storage_usage(&self) -> StorageUsage {
        let upload_dir = self.sweeper.config.upload_dir.clone();
        let output_dir = self.sweeper.config.output_dir.clone();

        let (upload, output) =
            tokio::task::spawn_blocking(move || (dir_usage(&upload_dir), dir_usage(&output_dir)))
                .await
                .unwrap_or_else(|e| {
                    warn!("Storage usage scan failed: {}", e);
                    (DirUsage::default(), DirUsage::default())
                });

        StorageUsage {
            upload,
            output,
            total: upload + output,
            expiry_hours: self.sweeper.config.retention.as_secs_f64() / 3600.0,
        }
    }
}

impl Drop for ExpiryReaper {
    fn drop(&mut self) {
        if let Some(running) = self.task.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryJobRepository;
    use cantor_core::domain::job::{JobKind, JobStatus};

    struct Fixture {
        _dir: tempfile::TempDir,
        uploads: PathBuf,
        outputs: PathBuf,
        jobs: Arc<InMemoryJobRepository>,
        reaper: ExpiryReaper,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let outputs = dir.path().join("outputs");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::create_dir_all(&outputs).unwrap();

        let jobs = Arc::new(InMemoryJobRepository::new());
        let reaper = ExpiryReaper::new(ReaperConfig::new(&uploads, &outputs), jobs.clone());

        Fixture {
            _dir: dir,
            uploads,
            outputs,
            jobs,
            reaper,
        }
    }

    /// Creates a job with an upload and an output directory on disk
    fn job_with_artifacts(f: &Fixture, finish: bool) -> Uuid {
        let job = f.jobs.create(JobKind::LocalUpload, "song.mp3");
        std::fs::write(f.uploads.join(format!("{}.mp3", job.id)), b"audio").unwrap();

        let out = f.outputs.join(job.id.to_string());
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join(format!("{}_vocals.wav", job.id)), b"wav").unwrap();

        f.jobs
            .update_status(job.id, JobStatus::Processing, Some(10.0))
            .unwrap();
        if finish {
            f.jobs
                .set_output(job.id, out.clone(), "vocals".to_string())
                .unwrap();
        }
        job.id
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::hours(25)
    }

    #[test]
    fn test_owner_of() {
        let id = Uuid::new_v4();
        assert_eq!(owner_of(OsStr::new(&format!("{}.mp3", id))), Some(id));
        assert_eq!(owner_of(OsStr::new(&id.to_string())), Some(id));
        assert_eq!(owner_of(OsStr::new(&format!("{}_vocals.wav", id))), Some(id));
        assert_eq!(owner_of(OsStr::new("notes.txt")), None);
    }

    #[tokio::test]
    async fn test_fresh_entries_are_kept() {
        let f = fixture();
        let id = job_with_artifacts(&f, true);

        let report = f.reaper.sweep().await;

        assert!(report.is_noop());
        assert!(f.jobs.get(id).is_ok());
        assert!(f.uploads.join(format!("{}.mp3", id)).exists());
    }

    #[tokio::test]
    async fn test_expired_terminal_job_is_reaped() {
        let f = fixture();
        let id = job_with_artifacts(&f, true);

        let report = f.reaper.sweep_at(later()).await;

        assert_eq!(report.upload_deleted, 1);
        assert_eq!(report.output_deleted, 1);
        assert_eq!(report.records_removed, 1);
        assert_eq!(report.errors, 0);
        assert!(f.jobs.get(id).is_err());
        assert!(!f.outputs.join(id.to_string()).exists());
    }

    #[tokio::test]
    async fn test_running_job_is_never_reaped() {
        let f = fixture();
        let id = job_with_artifacts(&f, false);

        let report = f.reaper.sweep_at(later()).await;

        assert_eq!(report.skipped_active, 2);
        assert!(report.is_noop());
        assert_eq!(f.jobs.get(id).unwrap().status, JobStatus::Processing);
        assert!(f.uploads.join(format!("{}.mp3", id)).exists());
        assert!(f.outputs.join(id.to_string()).exists());
    }

    #[tokio::test]
    async fn test_orphans_are_deleted() {
        let f = fixture();
        let orphan = f.uploads.join(format!("{}.wav", Uuid::new_v4()));
        std::fs::write(&orphan, b"audio").unwrap();
        std::fs::write(f.outputs.join("stray.txt"), b"x").unwrap();

        let report = f.reaper.sweep_at(later()).await;

        assert_eq!(report.upload_deleted, 1);
        assert_eq!(report.output_deleted, 1);
        assert!(!orphan.exists());
    }

    #[tokio::test]
    async fn test_missing_roots_are_not_errors() {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let reaper = ExpiryReaper::new(
            ReaperConfig::new("/nonexistent/cantor/uploads", "/nonexistent/cantor/outputs"),
            jobs,
        );

        let report = reaper.sweep_at(later()).await;
        assert_eq!(report.errors, 0);
        assert!(report.is_noop());
    }

    #[tokio::test]
    async fn test_unreadable_root_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("uploads");
        std::fs::write(&not_a_dir, b"file").unwrap();

        let jobs = Arc::new(InMemoryJobRepository::new());
        let reaper = ExpiryReaper::new(
            ReaperConfig::new(&not_a_dir, dir.path().join("outputs")),
            jobs,
        );

        let report = reaper.sweep_at(later()).await;
        assert_eq!(report.errors, 1);
        assert!(report.is_noop());
        assert!(!report.is_quiet());
    }

    #[tokio::test]
    async fn test_storage_usage() {
        let f = fixture();
        job_with_artifacts(&f, true);

        let usage = f.reaper.storage_usage().await;
        assert_eq!(usage.upload.file_count, 1);
        assert_eq!(usage.upload.size_bytes, 5);
        assert_eq!(usage.output.file_count, 1);
        assert_eq!(usage.total.size_bytes, 8);
        assert_eq!(usage.expiry_hours, 24.0);
    }

    #[tokio::test]
    async fn test_background_sweep_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = Arc::new(InMemoryJobRepository::new());
        let job = jobs.create(JobKind::LocalUpload, "song.mp3");
        jobs.set_error(job.id, "boom".to_string(), None).unwrap();

        let config = ReaperConfig::new(dir.path().join("uploads"), dir.path().join("outputs"))
            .with_retention(Duration::ZERO)
            .with_interval(Duration::from_millis(20));
        let reaper = ExpiryReaper::new(config, jobs.clone());

        reaper.start();
        reaper.start();
        assert!(reaper.is_running());

        tokio::time::sleep(Duration::from_millis(200)).await;
        reaper.stop().await;

        assert!(!reaper.is_running());
        assert!(jobs.get(job.id).is_err());

        reaper.stop().await;
    }
}
