//! Streaming, cancellable execution of the conversion process.
//!
//! [`ProcessRunner::start`] spawns the child and returns at once. A background
//! task reads stderr, hands each raw chunk to the caller's callback, keeps a
//! bounded tail of the output for error reporting, and resolves the
//! [`RunHandle`] once the stream has been drained and the child reaped.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use audioforge_core::{Error, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Read buffer size for the stderr pipe.
const READ_CHUNK: usize = 4096;

/// Diagnostics kept for error reporting.
const DIAGNOSTIC_TAIL_BYTES: usize = 64 * 1024;

/// How long to keep draining stderr after a kill before giving up on EOF.
const KILL_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Exit code; `None` when terminated by a signal.
    pub exit_code: Option<i32>,
    /// Whether the process exited with status 0.
    pub success: bool,
    /// Tail of the stderr output.
    pub diagnostics: String,
    /// Whether a kill was issued for this run.
    pub cancelled: bool,
}

impl RunOutcome {
    /// Last `max_lines` diagnostic lines that are not progress meter updates.
    pub fn error_excerpt(&self, max_lines: usize) -> String {
        let lines: Vec<&str> = self
            .diagnostics
            .split(['\r', '\n'])
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.contains("time="))
            .collect();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }
}

/// Spawns a process with piped stderr.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Spawn the process and start streaming its stderr.
    ///
    /// `on_chunk` receives raw stderr data as it arrives; chunks are not line
    /// aligned. An empty chunk marks the end of the stream. Cancelling `cancel` kills the child; the returned handle still
    /// resolves only after the stream is drained.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::ProcessStartFailed`] if the process cannot be spawned.
    pub fn start<F>(&self, cancel: CancellationToken, on_chunk: F) -> Result<RunHandle>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::ProcessStartFailed { source })?;

        tracing::debug!(pid = ?child.id(), program = %self.program.display(), "Process started");

        let stderr = child.stderr.take();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move { drive(child, stderr, task_cancel, on_chunk).await });

        Ok(RunHandle { cancel, task })
    }
}

/// Handle to a running process.
#[derive(Debug)]
pub struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    /// Request termination. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the process to exit and its output to be drained.
    pub async fn wait(self) -> RunOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Process runner task failed: {e}");
                RunOutcome {
                    exit_code: None,
                    success: false,
                    diagnostics: format!("runner task failed: {e}"),
                    cancelled: self.cancel.is_cancelled(),
                }
            }
        }
    }
}

async fn drive<F>(
    mut child: tokio::process::Child,
    stderr: Option<tokio::process::ChildStderr>,
    cancel: CancellationToken,
    mut on_chunk: F,
) -> RunOutcome
where
    F: FnMut(&[u8]) + Send + 'static,
{
    let mut tail: Vec<u8> = Vec::new();
    let mut killed = false;

    if let Some(mut stderr) = stderr {
        let mut buf = vec![0u8; READ_CHUNK];
        let grace = tokio::time::sleep(KILL_DRAIN_GRACE);
        tokio::pin!(grace);

        loop {
            tokio::select! {
                read = stderr.read(&mut buf) => match read {
                    Ok(0) => {
                        on_chunk(&[]);
                        break;
                    }
                    Ok(n) => {
                        on_chunk(&buf[..n]);
                        tail.extend_from_slice(&buf[..n]);
                        if tail.len() > DIAGNOSTIC_TAIL_BYTES {
                            let excess = tail.len() - DIAGNOSTIC_TAIL_BYTES;
                            tail.drain(..excess);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Error reading process stderr: {e}");
                        break;
                    }
                },
                _ = cancel.cancelled(), if !killed => {
                    killed = true;
                    kill(&mut child);
                    grace.as_mut().reset(tokio::time::Instant::now() + KILL_DRAIN_GRACE);
                }
                _ = &mut grace, if killed => {
                    tracing::warn!("stderr still open {KILL_DRAIN_GRACE:?} after kill; abandoning drain");
                    break;
                }
            }
        }
    }

    // stderr may close long before the child exits.
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            _ = cancel.cancelled(), if !killed => {
                killed = true;
                kill(&mut child);
            }
        }
    };

    let (exit_code, success) = match status {
        Ok(status) => (status.code(), status.success()),
        Err(e) => {
            tracing::warn!("Failed to wait for process: {e}");
            (None, false)
        }
    };

    tracing::debug!(?exit_code, cancelled = killed, "Process exited");

    RunOutcome {
        exit_code,
        success,
        diagnostics: String::from_utf8_lossy(&tail).into_owned(),
        cancelled: killed,
    }
}

fn kill(child: &mut tokio::process::Child) {
    if let Err(e) = child.start_kill() {
        // Already exited.
        tracing::debug!("start_kill failed: {e}");
    }
}
