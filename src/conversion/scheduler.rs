//! Bounded-parallelism conversion scheduler.
//!
//! All mutable state lives in a single actor task. [`Scheduler`] is a cheap,
//! cloneable handle that sends commands over an unbounded channel and awaits
//! the reply, so every mutation is serialized and observers never see a torn
//! update. Per-job executors report back on a second channel.
//!
//! Invariants held by the actor:
//! - a job becomes `Converting` in the same step its cancel token is inserted
//!   into the handle table;
//! - the token is removed in the step that applies the terminal transition
//!   (or, for a job deleted while converting, when its process has exited);
//! - the number of live tokens never exceeds the concurrency limit in force
//!   when the last job was admitted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use audioforge_av::ToolRegistry;
use audioforge_core::config::{Config, MAX_CONCURRENT_TASKS, MIN_CONCURRENT_TASKS};
use audioforge_core::{
    is_supported_input, AudioQuality, ConversionJob, JobId, JobStatus, Notifier, OutputFormat,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::executor::{self, ExecutionContext, JobRequest, WorkerEvent};

// ---------------------------------------------------------------------------
// Settings and status
// ---------------------------------------------------------------------------

/// Runtime settings. Changes apply to jobs submitted or admitted afterwards.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub default_format: OutputFormat,
    pub default_quality: AudioQuality,
    pub max_concurrent_tasks: usize,
    /// `None` means the platform documents directory.
    pub output_directory: Option<PathBuf>,
    pub probe_timeout: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_format: config.conversion.default_output_format,
            default_quality: config.conversion.audio_quality,
            max_concurrent_tasks: config.conversion.max_concurrent_tasks,
            output_directory: config.conversion.output_directory.clone(),
            probe_timeout: config.tools.probe_timeout(),
        }
    }

    fn concurrency_limit(&self) -> usize {
        self.max_concurrent_tasks
            .clamp(MIN_CONCURRENT_TASKS, MAX_CONCURRENT_TASKS)
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Point-in-time counters published after every actor step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    /// Processes still running, including ones whose job has been removed.
    pub active: usize,
    pub pending: usize,
    pub running: bool,
}

impl SchedulerStatus {
    pub fn is_idle(&self) -> bool {
        self.active == 0 && !self.running
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

enum Command {
    Submit {
        path: PathBuf,
        format: Option<OutputFormat>,
        quality: Option<AudioQuality>,
        reply: oneshot::Sender<Option<JobId>>,
    },
    Remove {
        id: JobId,
        reply: oneshot::Sender<bool>,
    },
    RemoveAll {
        reply: oneshot::Sender<()>,
    },
    ConvertAll {
        reply: oneshot::Sender<()>,
    },
    Cancel {
        id: JobId,
        reply: oneshot::Sender<bool>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    Jobs {
        reply: oneshot::Sender<Vec<ConversionJob>>,
    },
    Job {
        id: JobId,
        reply: oneshot::Sender<Option<ConversionJob>>,
    },
    UpdateSettings {
        settings: SchedulerSettings,
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the scheduler actor.
///
/// Notifier callbacks run on the actor task. A notifier that wants to drive
/// the scheduler (for example `cancel_all` on the first failure) must spawn
/// the call rather than block on it.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SchedulerStatus>,
}

impl Scheduler {
    /// Spawn the actor. Must be called from within a tokio runtime.
    ///
    /// The actor stops once every handle has been dropped; jobs still running
    /// at that point are cancelled and drained first.
    pub fn new(
        settings: SchedulerSettings,
        tools: ToolRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (tx, commands) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SchedulerStatus::default());

        let actor = Actor {
            settings,
            tools: Arc::new(tools),
            notifier,
            jobs: Vec::new(),
            handles: HashMap::new(),
            running: false,
            worker_tx,
            status_tx,
        };
        tokio::spawn(actor.run(commands, worker_rx));

        Self { tx, status }
    }

    /// Queue `path` with the current default format and quality.
    ///
    /// Returns `None` if the path is already in the job set, is still being
    /// torn down after a removal, or is not a `.flac` file.
    pub async fn submit(&self, path: impl Into<PathBuf>) -> Option<JobId> {
        self.submit_inner(path.into(), None, None).await
    }

    /// Queue `path` with an explicit format and quality.
    pub async fn submit_with(
        &self,
        path: impl Into<PathBuf>,
        format: OutputFormat,
        quality: AudioQuality,
    ) -> Option<JobId> {
        self.submit_inner(path.into(), Some(format), Some(quality))
            .await
    }

    async fn submit_inner(
        &self,
        path: PathBuf,
        format: Option<OutputFormat>,
        quality: Option<AudioQuality>,
    ) -> Option<JobId> {
        self.request(|reply| Command::Submit {
            path,
            format,
            quality,
            reply,
        })
        .await
        .flatten()
    }

    /// Delete a job, cancelling it first if it is converting. The slot is
    /// released once the process has exited.
    pub async fn remove(&self, id: JobId) -> bool {
        self.request(|reply| Command::Remove { id, reply })
            .await
            .unwrap_or(false)
    }

    /// Delete every job, cancelling the converting ones.
    pub async fn remove_all(&self) {
        self.request(|reply| Command::RemoveAll { reply }).await;
    }

    /// Start admitting pending jobs. No-op while already running.
    pub async fn convert_all(&self) {
        self.request(|reply| Command::ConvertAll { reply }).await;
    }

    /// Cancel a converting job. Returns `false` (and does nothing) for any
    /// other status.
    pub async fn cancel(&self, id: JobId) -> bool {
        self.request(|reply| Command::Cancel { id, reply })
            .await
            .unwrap_or(false)
    }

    /// Cancel every converting job and stop admitting. Returns the number of
    /// jobs signalled.
    pub async fn cancel_all(&self) -> usize {
        self.request(|reply| Command::CancelAll { reply })
            .await
            .unwrap_or(0)
    }

    /// Snapshot of all jobs, in submission order.
    pub async fn jobs(&self) -> Vec<ConversionJob> {
        self.request(|reply| Command::Jobs { reply })
            .await
            .unwrap_or_default()
    }

    pub async fn job(&self, id: JobId) -> Option<ConversionJob> {
        self.request(|reply| Command::Job { id, reply })
            .await
            .flatten()
    }

    pub async fn update_settings(&self, settings: SchedulerSettings) {
        self.request(|reply| Command::UpdateSettings { settings, reply })
            .await;
    }

    /// Latest published counters.
    pub fn status(&self) -> SchedulerStatus {
        *self.status.borrow()
    }

    /// Subscribe to counter updates.
    pub fn watch_status(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.clone()
    }

    /// Resolve once nothing is converting and the running flag is clear.
    pub async fn wait_idle(&self) {
        let mut rx = self.status.clone();
        // Err only if the actor is gone, which also means idle.
        let _ = rx.wait_for(SchedulerStatus::is_idle).await;
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(make(reply)).is_err() {
            tracing::error!("Scheduler actor is not running");
            return None;
        }
        rx.await.ok()
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Running {
    token: CancellationToken,
    source_path: PathBuf,
}

struct Actor {
    settings: SchedulerSettings,
    tools: Arc<ToolRegistry>,
    notifier: Arc<dyn Notifier>,
    /// Submission order.
    jobs: Vec<ConversionJob>,
    /// One entry per live process, keyed by job.
    handles: HashMap<JobId, Running>,
    running: bool,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
    status_tx: watch::Sender<SchedulerStatus>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        tracing::debug!("Scheduler started");

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(event) = worker_rx.recv() => self.handle_worker_event(event),
            }
            self.publish();
        }

        // Every handle is gone; stop what is still running.
        self.running = false;
        for running in self.handles.values() {
            running.token.cancel();
        }
        while !self.handles.is_empty() {
            match worker_rx.recv().await {
                Some(event) => self.handle_worker_event(event),
                None => break,
            }
        }
        self.publish();
        tracing::debug!("Scheduler stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit {
                path,
                format,
                quality,
                reply,
            } => {
                let id = self.submit(path, format, quality);
                self.admit();
                self.reply(reply, id);
            }
            Command::Remove { id, reply } => {
                let removed = self.remove(id);
                self.reply(reply, removed);
            }
            Command::RemoveAll { reply } => {
                self.remove_all();
                self.reply(reply, ());
            }
            Command::ConvertAll { reply } => {
                if !self.running {
                    tracing::info!(pending = self.pending_count(), "Starting conversions");
                    self.running = true;
                    self.admit();
                }
                self.reply(reply, ());
            }
            Command::Cancel { id, reply } => {
                let cancelled = self.cancel(id);
                self.reply(reply, cancelled);
            }
            Command::CancelAll { reply } => {
                let count = self.cancel_all();
                self.reply(reply, count);
            }
            Command::Jobs { reply } => {
                let jobs = self.jobs.clone();
                self.reply(reply, jobs);
            }
            Command::Job { id, reply } => {
                let job = self.jobs.iter().find(|j| j.id == id).cloned();
                self.reply(reply, job);
            }
            Command::UpdateSettings { settings, reply } => {
                tracing::debug!(?settings, "Scheduler settings updated");
                self.settings = settings;
                self.admit();
                self.reply(reply, ());
            }
        }
    }

    /// Publish the counters before answering, so a caller that awaited a
    /// command sees its effect in `status()`.
    fn reply<T>(&self, reply: oneshot::Sender<T>, value: T) {
        self.publish();
        let _ = reply.send(value);
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Progress { id, fraction } => {
                if let Some(job) = self.jobs.iter_mut().find(|j| j.id == id) {
                    if job.update_progress(fraction) {
                        self.notifier.job_progress(id, job.progress);
                    }
                }
            }
            WorkerEvent::Finished { id, result } => self.finish(id, result),
        }
    }

    fn submit(
        &mut self,
        path: PathBuf,
        format: Option<OutputFormat>,
        quality: Option<AudioQuality>,
    ) -> Option<JobId> {
        if !is_supported_input(&path) {
            tracing::debug!("Ignoring unsupported file {}", path.display());
            return None;
        }
        let duplicate = self.jobs.iter().any(|j| j.source_path == path)
            || self.handles.values().any(|r| r.source_path == path);
        if duplicate {
            tracing::debug!("Ignoring duplicate file {}", path.display());
            return None;
        }

        let job = ConversionJob::new(
            path,
            format.unwrap_or(self.settings.default_format),
            quality.unwrap_or(self.settings.default_quality),
        );
        let id = job.id;
        self.notifier.job_queued(&job);
        self.jobs.push(job);
        Some(id)
    }

    /// Start pending jobs, oldest first, until the limit is reached. Clears
    /// the running flag once the queue has fully drained.
    fn admit(&mut self) {
        if !self.running {
            return;
        }

        let limit = self.settings.concurrency_limit();
        while self.handles.len() < limit {
            let Some(job) = self
                .jobs
                .iter_mut()
                .find(|j| j.status == JobStatus::Pending)
            else {
                break;
            };

            let token = CancellationToken::new();
            self.handles.insert(
                job.id,
                Running {
                    token: token.clone(),
                    source_path: job.source_path.clone(),
                },
            );
            job.start();
            self.notifier.job_started(job);

            let request = JobRequest {
                id: job.id,
                source_path: job.source_path.clone(),
                format: job.output_format,
                quality: job.quality,
            };
            let ctx = ExecutionContext {
                tools: Arc::clone(&self.tools),
                output_directory: self.settings.output_directory.clone(),
                probe_timeout: self.settings.probe_timeout,
            };
            tokio::spawn(executor::execute(
                ctx,
                request,
                token,
                self.worker_tx.clone(),
            ));
        }

        if self.handles.is_empty() && self.pending_count() == 0 {
            tracing::info!("All conversions finished");
            self.running = false;
        }
    }

    fn finish(&mut self, id: JobId, result: audioforge_core::Result<PathBuf>) {
        let Some(running) = self.handles.remove(&id) else {
            tracing::warn!(job_id = %id, "Completion for unknown job");
            return;
        };

        if let Some(job) = self.jobs.iter_mut().find(|j| j.id == id) {
            if job.status == JobStatus::Converting {
                if running.token.is_cancelled() {
                    job.cancel();
                } else {
                    match result {
                        Ok(output) => job.complete(output),
                        Err(e) => job.fail(&e.to_string()),
                    }
                }
                self.notifier.job_finished(job);
            }
        }

        self.admit();
    }

    fn remove(&mut self, id: JobId) -> bool {
        let Some(index) = self.jobs.iter().position(|j| j.id == id) else {
            return false;
        };
        if let Some(running) = self.handles.get(&id) {
            running.token.cancel();
        }
        self.jobs.remove(index);
        self.notifier.job_removed(id);
        self.admit();
        true
    }

    fn remove_all(&mut self) {
        for running in self.handles.values() {
            running.token.cancel();
        }
        for job in std::mem::take(&mut self.jobs) {
            self.notifier.job_removed(job.id);
        }
        self.admit();
    }

    fn cancel(&mut self, id: JobId) -> bool {
        let converting = self
            .jobs
            .iter()
            .any(|j| j.id == id && j.status == JobStatus::Converting);
        if !converting {
            return false;
        }
        match self.handles.get(&id) {
            Some(running) => {
                tracing::debug!(job_id = %id, "Cancelling conversion");
                running.token.cancel();
                true
            }
            None => false,
        }
    }

    fn cancel_all(&mut self) -> usize {
        self.running = false;
        let mut count = 0;
        for job in &self.jobs {
            if job.status != JobStatus::Converting {
                continue;
            }
            if let Some(running) = self.handles.get(&job.id) {
                running.token.cancel();
                count += 1;
            }
        }
        tracing::info!(count, "Cancelled all conversions");
        count
    }

    fn pending_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .count()
    }

    fn publish(&self) {
        self.status_tx.send_replace(SchedulerStatus {
            active: self.handles.len(),
            pending: self.pending_count(),
            running: self.running,
        });
    }
}
