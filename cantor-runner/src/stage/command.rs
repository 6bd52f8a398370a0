//! Subprocess plumbing shared by the tool-backed executors

use std::collections::VecDeque;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::Command;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Number of stderr lines kept for error details
const STDERR_TAIL_LINES: usize = 20;

/// Something observed while a command runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEvent<'a> {
    Stdout(&'a str),
    Stderr(&'a str),
    /// The optional tick period elapsed
    Tick,
}

/// How a command finished
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub status: ExitStatus,
    /// Last lines written to stderr
    pub stderr: String,
}

/// Runs `command` to completion, feeding every output line and tick to
/// `on_event`.
///
/// The child is spawned with `kill_on_drop`, so dropping the returned future
/// terminates the process.
pub async fn run_command(
    command: &mut Command,
    tick: Option<Duration>,
    mut on_event: impl FnMut(CommandEvent<'_>) + Send,
) -> io::Result<CommandOutcome> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

    let mut ticker = tick.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            line = next_line(&mut stdout) => match line {
                Ok(Some(line)) => on_event(CommandEvent::Stdout(&line)),
                _ => stdout = None,
            },
            line = next_line(&mut stderr) => match line {
                Ok(Some(line)) => {
                    debug!("stderr: {}", line);
                    on_event(CommandEvent::Stderr(&line));
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                _ => stderr = None,
            },
            _ = next_tick(&mut ticker) => on_event(CommandEvent::Tick),
        }
    }

    let status = child.wait().await?;

    Ok(CommandOutcome {
        status,
        stderr: Vec::from(tail).join("\n"),
    })
}

async fn next_line<R>(lines: &mut Option<Lines<R>>) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
