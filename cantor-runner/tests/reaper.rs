// Expiry sweeps against a store populated by real pipeline runs.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cantor_core::domain::job::JobStatus;
use cantor_runner::repository::JobRepository;
use cantor_runner::service::{ExpiryReaper, ReaperConfig};
use chrono::Utc;
use common::{GatedStage, ScriptedStage, harness, wait_terminal};

fn reaper_for(h: &common::Harness, outputs: &std::path::Path) -> ExpiryReaper {
    let uploads = h.uploads.path();
    ExpiryReaper::new(
        ReaperConfig::new(uploads, outputs),
        Arc::clone(&h.jobs) as Arc<dyn JobRepository>,
    )
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let h = harness(
        ScriptedStage::succeeding(&[100.0], "/downloads/a.mp3"),
        ScriptedStage::succeeding(&[100.0], "X"),
        1,
        5,
        Duration::from_secs(60),
    );
    let outputs = tempfile::tempdir().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let song = dir.path().join("song.mp3");
    std::fs::write(&song, b"audio").unwrap();

    let done = h.service.submit_upload(&song).await.unwrap();
    let fetched = h.service.submit_remote("https://example.com/v").unwrap();
    wait_terminal(&h.jobs, done.id).await;
    wait_terminal(&h.jobs, fetched.id).await;
    std::fs::create_dir_all(outputs.path().join(done.id.to_string())).unwrap();

    let reaper = reaper_for(&h, outputs.path());
    let later = Utc::now() + chrono::Duration::hours(25);

    let first = reaper.sweep_at(later).await;
    assert_eq!(first.errors, 0);
    assert_eq!(first.records_removed, 2);
    assert_eq!(first.upload_deleted, 1);
    assert_eq!(first.output_deleted, 1);

    let second = reaper.sweep_at(later).await;
    assert_eq!(second.errors, 0);
    assert!(second.is_noop());
    assert_eq!(h.jobs.stats().total, 0);
    assert_eq!(std::fs::read_dir(h.uploads.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn sweep_never_touches_running_jobs() {
    let stage = GatedStage::new();
    let h = harness(
        stage.clone(),
        ScriptedStage::succeeding(&[100.0], "X"),
        1,
        5,
        Duration::from_secs(60),
    );
    let outputs = tempfile::tempdir().unwrap();

    let job = h.service.submit_remote("https://example.com/v").unwrap();
    while h.jobs.get(job.id).unwrap().status != JobStatus::Downloading {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let partial = h.uploads.path().join(format!("{}.webm.part", job.id));
    std::fs::write(&partial, b"partial").unwrap();

    let reaper = reaper_for(&h, outputs.path());
    let report = reaper
        .sweep_at(Utc::now() + chrono::Duration::hours(48))
        .await;

    assert_eq!(report.skipped_active, 1);
    assert_eq!(report.records_removed, 0);
    assert!(partial.exists());
    assert_eq!(h.jobs.get(job.id).unwrap().status, JobStatus::Downloading);

    stage.gate.add_permits(1);
    assert_eq!(wait_terminal(&h.jobs, job.id).await.status, JobStatus::Completed);
}
