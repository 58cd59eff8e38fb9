//! Per-job conversion pipeline.
//!
//! Runs on its own task for each admitted job: resolve ffmpeg, check the
//! input and output locations, probe, convert, verify. Progress and the final
//! result are sent back to the scheduler actor, which owns all job state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use audioforge_av::{
    build_conversion_args, parse_progress, probe_duration, probe_embedded_image, ChunkSplitter,
    ConversionArgs, ProcessRunner, RunOutcome, ToolRegistry,
};
use audioforge_core::{output_path_for, AudioQuality, Error, JobId, OutputFormat, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lines of ffmpeg output kept in a failure message.
const ERROR_EXCERPT_LINES: usize = 5;

/// Messages from an executor to the scheduler actor.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Progress { id: JobId, fraction: f64 },
    Finished { id: JobId, result: Result<PathBuf> },
}

/// Snapshot of scheduler settings taken at admission.
pub(crate) struct ExecutionContext {
    pub tools: Arc<ToolRegistry>,
    pub output_directory: Option<PathBuf>,
    pub probe_timeout: Duration,
}

/// Immutable job fields needed to run the conversion.
#[derive(Debug, Clone)]
pub(crate) struct JobRequest {
    pub id: JobId,
    pub source_path: PathBuf,
    pub format: OutputFormat,
    pub quality: AudioQuality,
}

/// Run one job to completion and report the result.
pub(crate) async fn execute(
    ctx: ExecutionContext,
    job: JobRequest,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let id = job.id;
    let result = convert(&ctx, &job, &cancel, &events).await;

    if let Err(ref e) = result {
        if cancel.is_cancelled() {
            tracing::debug!(job_id = %id, "Conversion stopped after cancel: {e}");
        } else {
            tracing::debug!(job_id = %id, "Conversion failed: {e}");
        }
    }

    // The actor is gone only during shutdown, when nobody is listening.
    let _ = events.send(WorkerEvent::Finished { id, result });
}

async fn convert(
    ctx: &ExecutionContext,
    job: &JobRequest,
    cancel: &CancellationToken,
    events: &mpsc::UnboundedSender<WorkerEvent>,
) -> Result<PathBuf> {
    let ffmpeg = ctx.tools.require_ffmpeg()?.to_path_buf();

    check_input(&job.source_path).await?;

    let output_dir = ctx
        .output_directory
        .clone()
        .unwrap_or_else(default_output_directory);
    let output = output_path_for(&job.source_path, &output_dir, job.format);
    ensure_output_dir(&output_dir).await?;

    let duration = tokio::select! {
        d = probe_duration(&ffmpeg, &job.source_path, ctx.probe_timeout) => d?,
        _ = cancel.cancelled() => return Err(cancelled()),
    };
    let embedded_image = tokio::select! {
        img = probe_embedded_image(&ffmpeg, &job.source_path, ctx.probe_timeout) => img,
        _ = cancel.cancelled() => return Err(cancelled()),
    };

    let args = build_conversion_args(&ConversionArgs {
        input: &job.source_path,
        output: &output,
        format: job.format,
        quality: job.quality,
        embedded_image,
    });
    tracing::debug!(
        job_id = %job.id,
        duration,
        embedded_image,
        "ffmpeg {}",
        args.join(" ")
    );

    let before = OutputState::read(&output).await;
    let on_chunk = progress_forwarder(job.id, duration, events.clone());
    let handle = ProcessRunner::new(ffmpeg, args).start(cancel.clone(), on_chunk)?;
    let outcome = handle.wait().await;

    let result = check_outcome(&outcome, &output).await;
    if result.is_err() || cancel.is_cancelled() {
        if OutputState::read(&output).await.written_since(&before) {
            remove_partial_output(&output).await;
        } else {
            tracing::debug!(job_id = %job.id, "Leaving untouched output {}", output.display());
        }
    }
    result
}

/// What sat at the output path at some point in time.
#[derive(Debug, Clone, PartialEq)]
enum OutputState {
    Missing,
    File { len: u64, modified: Option<SystemTime> },
}

impl OutputState {
    async fn read(path: &Path) -> Self {
        match tokio::fs::metadata(path).await {
            Ok(meta) => OutputState::File {
                len: meta.len(),
                modified: meta.modified().ok(),
            },
            Err(_) => OutputState::Missing,
        }
    }

    /// Whether a file is present now that was created or changed after
    /// `before` was taken.
    fn written_since(&self, before: &OutputState) -> bool {
        matches!(self, OutputState::File { .. }) && self != before
    }
}

/// Build the stderr callback: reassemble fragments, parse, forward increases.
/// The empty chunk at end of stream flushes an unterminated last fragment.
fn progress_forwarder(
    id: JobId,
    duration: f64,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> impl FnMut(&[u8]) + Send + 'static {
    let mut splitter = ChunkSplitter::new();
    let mut last = 0.0_f64;

    move |chunk: &[u8]| {
        let fragments: Vec<String> = if chunk.is_empty() {
            splitter.finish().into_iter().collect()
        } else {
            splitter.push(chunk)
        };
        let latest = fragments
            .iter()
            .rev()
            .find_map(|frag| parse_progress(frag, duration));

        if let Some(fraction) = latest {
            if fraction > last {
                last = fraction;
                let _ = events.send(WorkerEvent::Progress { id, fraction });
            }
        }
    }
}

async fn check_outcome(outcome: &RunOutcome, output: &Path) -> Result<PathBuf> {
    if !outcome.success {
        let excerpt = outcome.error_excerpt(ERROR_EXCERPT_LINES);
        let detail = if excerpt.is_empty() {
            "no diagnostic output".to_string()
        } else {
            excerpt
        };
        return Err(Error::process_failed(outcome.exit_code, detail));
    }

    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.is_file() => Ok(output.to_path_buf()),
        _ => Err(Error::process_failed(
            outcome.exit_code,
            "output file was not created",
        )),
    }
}

async fn check_input(path: &Path) -> Result<()> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::InputNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(Error::InputUnreadable {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if !meta.is_file() {
        return Err(Error::InputUnreadable {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        });
    }

    tokio::fs::File::open(path)
        .await
        .map(drop)
        .map_err(|source| Error::InputUnreadable {
            path: path.to_path_buf(),
            source,
        })
}

/// Documents directory, else home, else the working directory.
pub fn default_output_directory() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Make sure `dir` exists and is writable, creating missing parents.
async fn ensure_output_dir(dir: &Path) -> Result<()> {
    if let Some(existing) = dir.ancestors().find(|p| p.exists()) {
        if existing.is_dir() && !is_writable(existing) {
            return Err(Error::OutputDirectoryNotAccessible {
                path: existing.to_path_buf(),
            });
        }
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| Error::OutputDirectoryCreationFailed {
            path: dir.to_path_buf(),
            source,
        })?;

    if !is_writable(dir) {
        return Err(Error::OutputDirectoryNotAccessible {
            path: dir.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn is_writable(path: &Path) -> bool {
    use nix::unistd::{access, AccessFlags};
    access(path, AccessFlags::W_OK).is_ok()
}

#[cfg(not(unix))]
fn is_writable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

async fn remove_partial_output(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => tracing::debug!("Removed partial output {}", output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove partial output {}: {e}", output.display()),
    }
}

fn cancelled() -> Error {
    Error::process_failed(None, "cancelled before ffmpeg started")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(exit_code: Option<i32>, diagnostics: &str) -> RunOutcome {
        RunOutcome {
            exit_code,
            success: exit_code == Some(0),
            diagnostics: diagnostics.to_string(),
            cancelled: false,
        }
    }

    #[tokio::test]
    async fn success_without_output_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_outcome(&outcome(Some(0), ""), &dir.path().join("a.m4a"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "ffmpeg failed (exit code 0): output file was not created"
        );
    }

    #[tokio::test]
    async fn nonzero_exit_carries_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("a.m4a");
        std::fs::write(&output, b"partial").unwrap();

        let err = check_outcome(
            &outcome(Some(1), "size=1kB time=00:00:01.00\r/in/a.flac: Invalid data found\n"),
            &output,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ProcessFailed { exit_code: Some(1), .. }));
        assert!(err.to_string().ends_with("/in/a.flac: Invalid data found"));
    }

    #[tokio::test]
    async fn success_with_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("a.m4a");
        std::fs::write(&output, b"m4a").unwrap();
        assert_eq!(check_outcome(&outcome(Some(0), ""), &output).await.unwrap(), output);
    }

    #[tokio::test]
    async fn missing_input() {
        let err = check_input(Path::new("/nonexistent/a.flac")).await.unwrap_err();
        assert!(matches!(err, Error::InputNotFound { .. }));
    }

    #[tokio::test]
    async fn directory_input_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_input(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::InputUnreadable { .. }));
    }

    #[tokio::test]
    async fn creates_nested_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_output_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn output_dir_below_file_fails_creation() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"").unwrap();
        let err = ensure_output_dir(&file.join("out")).await.unwrap_err();
        assert!(matches!(err, Error::OutputDirectoryCreationFailed { .. }));
    }

    #[tokio::test]
    async fn forwarder_sends_only_increases() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = JobId::new();
        let mut forward = progress_forwarder(id, 10.0, tx);

        forward(b"time=00:00:05.00 bitrate=1\r");
        forward(b"time=00:00:04.00 bitrate=1\rtime=00:00:0");
        forward(b"8.00 bitrate=1\r");

        let mut seen = Vec::new();
        while let Ok(WorkerEvent::Progress { fraction, .. }) = rx.try_recv() {
            seen.push(fraction);
        }
        assert_eq!(seen, vec![0.5, 0.8]);
    }

    #[tokio::test]
    async fn forwarder_flushes_last_fragment_at_end_of_stream() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut forward = progress_forwarder(JobId::new(), 10.0, tx);

        forward(b"time=00:00:02.00 bitrate=1\rtime=00:00:09.00 bitrate=1");
        forward(b"");

        let mut seen = Vec::new();
        while let Ok(WorkerEvent::Progress { fraction, .. }) = rx.try_recv() {
            seen.push(fraction);
        }
        assert_eq!(seen, vec![0.2, 0.9]);
    }

    #[tokio::test]
    async fn output_state_tracks_writes() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("a.m4a");

        let missing = OutputState::read(&output).await;
        assert_eq!(missing, OutputState::Missing);
        assert!(!missing.written_since(&OutputState::Missing));

        std::fs::write(&output, b"m4a").unwrap();
        let existing = OutputState::read(&output).await;
        assert!(existing.written_since(&missing));
        assert!(!existing.written_since(&existing.clone()));

        std::fs::write(&output, b"").unwrap();
        assert!(OutputState::read(&output).await.written_since(&existing));
    }
}
