// End-to-end job scenarios driven through the job service with stub stages.

mod common;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use cantor_core::domain::job::{JobKind, JobStatus};
use cantor_runner::repository::JobRepository;
use common::{HangingStage, ScriptedStage, harness, wait_terminal};

#[tokio::test]
async fn local_upload_completes_with_output() {
    let h = harness(
        ScriptedStage::failing(&[], "download must not run"),
        ScriptedStage::succeeding(&[0.0, 50.0, 100.0], "X"),
        1,
        1,
        Duration::from_secs(60),
    );

    let dir = tempfile::tempdir().unwrap();
    let song = dir.path().join("song.mp3");
    std::fs::write(&song, b"audio").unwrap();

    let job = h.service.submit_upload(&song).await.unwrap();
    assert_eq!(job.kind, JobKind::LocalUpload);
    assert_eq!(job.input, "song.mp3");

    let job = wait_terminal(&h.jobs, job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100.0);

    let output = job.output.unwrap();
    assert_eq!(output.path, PathBuf::from("X"));
    assert_eq!(output.name, "X");
    assert!(job.error.is_none());
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn remote_fetch_failure_freezes_progress() {
    let h = harness(
        ScriptedStage::failing(&[50.0], "unavailable"),
        ScriptedStage::succeeding(&[100.0], "X"),
        1,
        1,
        Duration::from_secs(60),
    );

    let job = h
        .service
        .submit_remote("https://www.youtube.com/watch?v=abc")
        .unwrap();
    let job = wait_terminal(&h.jobs, job.id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_ref().unwrap().message, "unavailable");
    assert!(job.output.is_none());
    assert_eq!(job.progress, 20.0);
    assert!(job.completed_at.is_none());
    assert!(job.processing_duration.is_some());

    // Frozen: nothing moves a failed job afterwards
    h.jobs.update_progress(job.id, 90.0);
    let again = h.jobs.get(job.id).unwrap();
    assert_eq!(again.progress, 20.0);
    assert_eq!(again.error, job.error);
}

#[tokio::test(start_paused = true)]
async fn stage_timeout_kills_executor() {
    let hanging = HangingStage::new();
    let h = harness(
        ScriptedStage::succeeding(&[100.0], "/downloads/a.mp3"),
        hanging.clone(),
        1,
        1,
        Duration::from_secs(600),
    );

    let job = h.service.submit_remote("https://example.com/v").unwrap();
    tokio::time::sleep(Duration::from_secs(601)).await;
    let job = wait_terminal(&h.jobs, job.id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error.unwrap().message,
        "Processing timed out after 600 seconds"
    );
    assert!(job.output.is_none());
    // 40 for the download plus 30% of the 60 extraction points
    assert_eq!(job.progress, 58.0);

    h.service.shutdown().await;
    assert!(hanging.killed.load(Ordering::SeqCst));
    assert_eq!(h.service.stats().scheduler.active, 0);
}

#[tokio::test(start_paused = true)]
async fn progress_never_decreases() {
    let h = harness(
        ScriptedStage::succeeding(&[10.0, 30.0, 30.0, 60.0, 100.0], "/downloads/a.mp3"),
        ScriptedStage::succeeding(&[5.0, 20.0, 55.0, 90.0, 100.0], "X"),
        1,
        1,
        Duration::from_secs(60),
    );

    let job = h.service.submit_remote("https://example.com/v").unwrap();

    let mut observed = Vec::new();
    loop {
        let current = h.jobs.get(job.id).unwrap();
        observed.push((current.status, current.progress));
        if current.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(
        observed.windows(2).all(|w| w[0].1 <= w[1].1),
        "progress went backwards: {:?}",
        observed
    );
    assert!(
        observed.windows(2).all(|w| w[0].0 <= w[1].0),
        "status went backwards: {:?}",
        observed
    );
    assert_eq!(observed.last(), Some(&(JobStatus::Completed, 100.0)));
    assert!(observed.iter().any(|(s, _)| *s == JobStatus::Downloading));
}
