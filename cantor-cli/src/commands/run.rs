//! Run command handler
//!
//! Submits every input, follows the jobs until they finish, and prints
//! the results.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use cantor_core::domain::job::JobStatus;
use cantor_core::dto::job::JobStatusReport;
use cantor_runner::Config;
use cantor_runner::service::JobService;
use colored::*;
use tracing::warn;
use uuid::Uuid;

use crate::engine::Engine;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub async fn handle_run(
    files: Vec<PathBuf>,
    urls: Vec<String>,
    json: bool,
    config: &Config,
) -> Result<()> {
    if files.is_empty() && urls.is_empty() {
        anyhow::bail!("Nothing to do: pass audio files or --url");
    }

    let mut console = Console::new(io::stdout(), io::stderr(), json);
    let engine = Engine::build(config)?;
    engine.start();

    let mut submitted = Vec::new();
    for file in &files {
        let input = file.display().to_string();
        match engine.service.submit_upload(file).await {
            Ok(job) => {
                console.submitted(job.id, &input)?;
                submitted.push(job.id);
            }
            Err(e) => console.rejected(&input, &e)?,
        }
    }
    for url in &urls {
        match engine.service.submit_remote(url) {
            Ok(job) => {
                console.submitted(job.id, url)?;
                submitted.push(job.id);
            }
            Err(e) => console.rejected(url, &e)?,
        }
    }

    if submitted.is_empty() {
        engine.shutdown().await;
        anyhow::bail!("No job was accepted");
    }

    tokio::select! {
        followed = follow(&engine.service, &submitted, &mut console) => followed?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            warn!("Interrupted, abandoning running jobs");
            engine.reaper.stop().await;
            anyhow::bail!("Interrupted");
        }
    }

    let reports: Vec<JobStatusReport> = submitted
        .iter()
        .filter_map(|id| engine.service.status(*id).ok())
        .collect();

    engine.shutdown().await;

    console.results(&reports)?;

    let failed = reports
        .iter()
        .filter(|r| r.status == JobStatus::Failed)
        .count();
    if failed > 0 {
        anyhow::bail!("{} job(s) failed", failed);
    }

    Ok(())
}

/// Polls the jobs until all are terminal, printing every change
async fn follow<O: Write, E: Write>(
    service: &JobService,
    ids: &[Uuid],
    console: &mut Console<O, E>,
) -> io::Result<()> {
    let mut last: HashMap<Uuid, (JobStatus, u32)> = HashMap::new();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        ticker.tick().await;

        let mut pending = 0;
        for id in ids {
            let Ok(report) = service.status(*id) else {
                continue;
            };
            if !report.status.is_terminal() {
                pending += 1;
            }

            // Whole percent is enough to tell the user something moved
            let seen = (report.status, report.progress as u32);
            if last.get(id) == Some(&seen) {
                continue;
            }
            last.insert(*id, seen);
            console.progress(&report)?;
        }

        if pending == 0 {
            return Ok(());
        }
    }
}

/// Output of a run
///
/// With `json` set, `out` carries nothing but the final JSON array and all
/// running commentary goes to `err`.
struct Console<O, E> {
    out: O,
    err: E,
    json: bool,
}

impl<O: Write, E: Write> Console<O, E> {
    fn new(out: O, err: E, json: bool) -> Self {
        Self { out, err, json }
    }

    fn notes(&mut self) -> &mut dyn Write {
        if self.json { &mut self.err } else { &mut self.out }
    }

    fn submitted(&mut self, id: Uuid, input: &str) -> io::Result<()> {
        writeln!(self.notes(), "{} {} {}", "▸".cyan(), short_id(id).dimmed(), input)
    }

    fn rejected(&mut self, input: &str, error: &dyn std::fmt::Display) -> io::Result<()> {
        writeln!(self.err, "{} {}: {}", "✗".red(), input, error)
    }

    fn progress(&mut self, report: &JobStatusReport) -> io::Result<()> {
        writeln!(
            self.notes(),
            "  {} {:<12} {:>5.1}%  {}",
            short_id(report.job_id).dimmed(),
            colorize_status(report.status),
            report.progress,
            report.message.dimmed()
        )
    }

    fn results(&mut self, reports: &[JobStatusReport]) -> Result<()> {
        if self.json {
            serde_json::to_writer_pretty(&mut self.out, reports)?;
            writeln!(self.out)?;
            return Ok(());
        }

        let out = &mut self.out;
        writeln!(out)?;
        writeln!(out, "{}", "Results:".bold())?;
        for report in reports {
            let input = report.input_name.as_deref().unwrap_or("-");
            match report.status {
                JobStatus::Completed => {
                    let duration = report
                        .processing_duration
                        .map(|d| format!(" ({:.1}s)", d))
                        .unwrap_or_default();
                    writeln!(
                        out,
                        "  {} {} → {}{}",
                        "✓".green(),
                        input,
                        report.output_name.as_deref().unwrap_or("-").cyan(),
                        duration.dimmed()
                    )?;
                }
                _ => {
                    writeln!(
                        out,
                        "  {} {}: {}",
                        "✗".red(),
                        input,
                        report.error.as_deref().unwrap_or("unknown error").red()
                    )?;
                    if let Some(details) = &report.error_details {
                        writeln!(out, "    {}", details.dimmed())?;
                    }
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn into_parts(self) -> (O, E) {
        (self.out, self.err)
    }
}

fn short_id(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

fn colorize_status(status: JobStatus) -> ColoredString {
    let text = format!("{:<12}", status.to_string());
    match status {
        JobStatus::Pending => text.yellow(),
        JobStatus::Downloading | JobStatus::Processing => text.blue(),
        JobStatus::Completed => text.green(),
        JobStatus::Failed => text.red(),
    }
}
