//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which writes a fake `ffmpeg` shell script into a
//! temporary directory and wires a [`Scheduler`] to it together with a
//! [`Recorder`] notifier. The script picks its behaviour from the input file
//! name and the name of its parent directory:
//!
//! | name contains | behaviour                                              |
//! |---------------|--------------------------------------------------------|
//! | `slow`        | progress over ~1.5 s, then writes the output           |
//! | `hang`        | one progress line, then sleeps until killed            |
//! | `fail`        | writes a partial output, prints an error, exits 1      |
//! | `broken`      | prints an error, exits 1 without touching the output   |
//! | `noout`       | progress, exits 0 without writing the output           |
//! | `badprobe`    | the probe prints no `Duration:` line                   |
//! | `stuckprobe`  | the probe never returns                                |
//! | anything else | quick progress, writes the output, exits 0             |

#![allow(dead_code)]

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use audioforge::{Scheduler, SchedulerSettings};
use audioforge_av::tools::{ToolRegistry, ToolSource};
use audioforge_core::{ConversionJob, JobId, JobStatus, Notifier};
use tempfile::TempDir;

const FAKE_FFMPEG: &str = r#"#!/bin/sh
input=""
prev=""
for arg; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  prev="$arg"
  last="$arg"
done
parent="${input%/*}"
name="${parent##*/}/${input##*/}"

progress() {
  printf 'size=       1kB time=%s bitrate=  64.0kbits/s speed=1.0x\r' "$1" >&2
}

case "$last" in
  *.m4a)
    case "$name" in
      *hang*)
        progress 00:00:01.00
        exec sleep 30
        ;;
      *fail*)
        : > "$last"
        progress 00:00:01.00
        echo "$name: Invalid data found when processing input" >&2
        exit 1
        ;;
      *broken*)
        echo "$name: Invalid data found when processing input" >&2
        exit 1
        ;;
      *noout*)
        progress 00:00:10.00
        exit 0
        ;;
      *slow*)
        progress 00:00:02.50; sleep 0.5
        progress 00:00:05.00; sleep 0.5
        progress 00:00:10.00; sleep 0.5
        printf 'm4a' > "$last"
        exit 0
        ;;
      *)
        progress 00:00:02.50
        progress 00:00:05.00; sleep 0.1
        progress 00:00:10.00
        printf 'm4a' > "$last"
        exit 0
        ;;
    esac
    ;;
  *)
    case "$name" in
      *stuckprobe*) exec sleep 30 ;;
    esac
    echo "Input #0, flac, from '$input':" >&2
    case "$name" in
      *badprobe*) ;;
      *) echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 900 kb/s" >&2 ;;
    esac
    echo "  Stream #0:0: Audio: flac, 44100 Hz, stereo, s16" >&2
    echo "At least one output file must be specified" >&2
    exit 1
    ;;
esac
"#;

/// Timeout for a whole batch to drain.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecorderState {
    converting: usize,
    max_converting: usize,
    started: Vec<String>,
    finished: HashMap<JobId, usize>,
    progress: HashMap<JobId, Vec<f64>>,
    removed: Vec<JobId>,
}

/// Notifier that records everything it is told.
#[derive(Default)]
pub struct Recorder {
    state: Mutex<RecorderState>,
}

impl Recorder {
    /// Highest number of jobs seen converting at once.
    pub fn max_converting(&self) -> usize {
        self.state.lock().unwrap().max_converting
    }

    /// File names in the order their jobs were started.
    pub fn started(&self) -> Vec<String> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn finished_count(&self, id: JobId) -> usize {
        self.state
            .lock()
            .unwrap()
            .finished
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    pub fn progress(&self, id: JobId) -> Vec<f64> {
        self.state
            .lock()
            .unwrap()
            .progress
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn removed(&self) -> Vec<JobId> {
        self.state.lock().unwrap().removed.clone()
    }
}

impl Notifier for Recorder {
    fn job_started(&self, job: &ConversionJob) {
        assert_eq!(job.status, JobStatus::Converting);
        let mut state = self.state.lock().unwrap();
        state.converting += 1;
        state.max_converting = state.max_converting.max(state.converting);
        state.started.push(job.file_name.clone());
    }

    fn job_progress(&self, job_id: JobId, progress: f64) {
        let mut state = self.state.lock().unwrap();
        state.progress.entry(job_id).or_default().push(progress);
    }

    fn job_finished(&self, job: &ConversionJob) {
        assert!(job.status.is_terminal());
        assert_eq!(job.progress, 0.0);
        let mut state = self.state.lock().unwrap();
        state.converting -= 1;
        *state.finished.entry(job.id).or_default() += 1;
    }

    fn job_removed(&self, job_id: JobId) {
        self.state.lock().unwrap().removed.push(job_id);
    }
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

/// Temporary input/output directories, a fake ffmpeg, and a scheduler.
///
/// Must be created inside a tokio runtime.
pub struct TestHarness {
    pub dir: TempDir,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub ffmpeg: PathBuf,
    pub recorder: Arc<Recorder>,
    pub scheduler: Scheduler,
}

impl TestHarness {
    /// Harness allowing `max_concurrent_tasks` simultaneous conversions.
    pub fn new(max_concurrent_tasks: usize) -> Self {
        Self::build(max_concurrent_tasks, true, |_| {})
    }

    /// Harness whose tool registry has no ffmpeg at all.
    pub fn without_ffmpeg() -> Self {
        Self::build(1, false, |_| {})
    }

    /// Harness with further adjusted scheduler settings.
    pub fn with_settings(
        max_concurrent_tasks: usize,
        adjust: impl FnOnce(&mut SchedulerSettings),
    ) -> Self {
        Self::build(max_concurrent_tasks, true, adjust)
    }

    fn build(
        max_concurrent_tasks: usize,
        with_ffmpeg: bool,
        adjust: impl FnOnce(&mut SchedulerSettings),
    ) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let input_dir = dir.path().join("in");
        let output_dir = dir.path().join("out");
        std::fs::create_dir_all(&input_dir).unwrap();

        let ffmpeg = dir.path().join("ffmpeg");
        std::fs::write(&ffmpeg, FAKE_FFMPEG).unwrap();
        std::fs::set_permissions(&ffmpeg, std::fs::Permissions::from_mode(0o755)).unwrap();

        let tools = if with_ffmpeg {
            ToolRegistry::with_path(ffmpeg.clone(), ToolSource::Config)
        } else {
            ToolRegistry::default()
        };

        let mut settings = SchedulerSettings {
            max_concurrent_tasks,
            output_directory: Some(output_dir.clone()),
            probe_timeout: Duration::from_secs(10),
            ..SchedulerSettings::default()
        };
        adjust(&mut settings);

        let recorder = Arc::new(Recorder::default());
        let scheduler = Scheduler::new(settings, tools, recorder.clone());

        Self {
            dir,
            input_dir,
            output_dir,
            ffmpeg,
            recorder,
            scheduler,
        }
    }

    /// Create an input file and return its path.
    pub fn input(&self, name: &str) -> PathBuf {
        let path = self.input_dir.join(name);
        std::fs::write(&path, b"fLaC").unwrap();
        path
    }

    /// Create an input file in a subdirectory of the input directory.
    pub fn input_in(&self, subdir: &str, name: &str) -> PathBuf {
        let dir = self.input_dir.join(subdir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, b"fLaC").unwrap();
        path
    }

    /// Create an input file and submit it.
    pub async fn submit(&self, name: &str) -> JobId {
        let path = self.input(name);
        self.scheduler
            .submit(path)
            .await
            .expect("submission should be accepted")
    }

    /// Expected output location for an input file name.
    pub fn output_for(&self, name: &str) -> PathBuf {
        let stem = Path::new(name).file_stem().unwrap().to_string_lossy();
        self.output_dir.join(format!("{stem}.m4a"))
    }

    pub async fn status_of(&self, id: JobId) -> JobStatus {
        self.scheduler
            .job(id)
            .await
            .expect("job should exist")
            .status
    }

    pub async fn wait_idle(&self) {
        tokio::time::timeout(IDLE_TIMEOUT, self.scheduler.wait_idle())
            .await
            .expect("scheduler did not become idle");
    }

    /// Poll until the recorder has seen progress for `id`.
    pub async fn wait_for_progress(&self, id: JobId) {
        tokio::time::timeout(IDLE_TIMEOUT, async {
            while self.recorder.progress(id).is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job reported no progress");
    }

    /// Poll until `id` has reached `status`.
    pub async fn wait_for_status(&self, id: JobId, status: JobStatus) {
        tokio::time::timeout(IDLE_TIMEOUT, async {
            loop {
                if self.scheduler.job(id).await.map(|j| j.status) == Some(status) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job did not reach the expected status");
    }
}
