//! Running external tools under a deadline.

use std::fs;
use std::io;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Output of a child that exited on its own.
#[derive(Debug)]
pub(crate) struct Finished {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug)]
pub(crate) enum Waited {
    Finished(Finished),
    /// The deadline passed; the child was killed and reaped.
    TimedOut,
}

#[derive(Debug, Error)]
pub(crate) enum RunError {
    #[error("{0}")]
    Spawn(io::Error),

    #[error("capturing child output: {0}")]
    Capture(io::Error),
}

/// Spawn `command` and wait at most `timeout` for it to exit.
///
/// Output goes to temporary files rather than pipes, so a chatty child cannot
/// block on a full pipe while we poll.
pub(crate) fn run_with_deadline(
    command: &mut Command,
    timeout: Duration,
) -> Result<Waited, RunError> {
    let stdout = NamedTempFile::new().map_err(RunError::Capture)?;
    let stderr = NamedTempFile::new().map_err(RunError::Capture)?;
    let mut child = command
        .stdin(Stdio::null())
        .stdout(stdout.reopen().map_err(RunError::Capture)?)
        .stderr(stderr.reopen().map_err(RunError::Capture)?)
        .spawn()
        .map_err(RunError::Spawn)?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait().map_err(RunError::Capture)? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                warn!(pid = child.id(), ?timeout, "child exceeded its deadline; killed");
                return Ok(Waited::TimedOut);
            }
            None => std::thread::sleep(POLL_INTERVAL),
        }
    };

    Ok(Waited::Finished(Finished {
        status,
        stdout: read_capture(&stdout)?,
        stderr: read_capture(&stderr)?,
    }))
}

fn read_capture(file: &NamedTempFile) -> Result<String, RunError> {
    fs::read(file.path())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(RunError::Capture)
}

/// Last `count` lines of `text`.
pub(crate) fn tail(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}
