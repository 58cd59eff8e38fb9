//! Job observation: the [`Notifier`] seam and the broadcast [`EventBus`].
//!
//! The scheduler calls a [`Notifier`] after every state change it makes.
//! [`EventBus`] turns those calls into timestamped [`Event`]s on a
//! `tokio::sync::broadcast` channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::JobId;
use crate::job::{ConversionJob, JobStatus};

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Observer of job state changes.
///
/// Methods are invoked from the scheduler's state owner after the change has
/// been applied. Implementations must not block; they may call back into the
/// scheduler, since scheduler commands are queued rather than executed inline.
///
/// `job_finished` is called at most once per job per execution attempt, with
/// the job already in a terminal state.
pub trait Notifier: Send + Sync {
    fn job_queued(&self, _job: &ConversionJob) {}

    fn job_started(&self, _job: &ConversionJob) {}

    fn job_progress(&self, _job_id: JobId, _progress: f64) {}

    fn job_finished(&self, _job: &ConversionJob) {}

    fn job_removed(&self, _job_id: JobId) {}
}

/// Notifier that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {}

/// Notifier that logs transitions through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn job_queued(&self, job: &ConversionJob) {
        tracing::debug!(job_id = %job.id, file = %job.file_name, "Job queued");
    }

    fn job_started(&self, job: &ConversionJob) {
        tracing::info!(job_id = %job.id, file = %job.file_name, format = %job.output_format, "Conversion started");
    }

    fn job_progress(&self, job_id: JobId, progress: f64) {
        tracing::trace!(job_id = %job_id, progress, "Conversion progress");
    }

    fn job_finished(&self, job: &ConversionJob) {
        match job.status {
            JobStatus::Completed => {
                tracing::info!(job_id = %job.id, file = %job.file_name, "Conversion completed")
            }
            JobStatus::Cancelled => {
                tracing::info!(job_id = %job.id, file = %job.file_name, "Conversion cancelled")
            }
            _ => tracing::warn!(
                job_id = %job.id,
                file = %job.file_name,
                error = job.error_detail.as_deref().unwrap_or_default(),
                "Conversion failed"
            ),
        }
    }

    fn job_removed(&self, job_id: JobId) {
        tracing::debug!(job_id = %job_id, "Job removed");
    }
}

/// Forwards every call to each inner notifier, in order.
#[derive(Default, Clone)]
pub struct FanoutNotifier {
    inner: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(inner: Vec<Arc<dyn Notifier>>) -> Self {
        Self { inner }
    }
}

impl Notifier for FanoutNotifier {
    fn job_queued(&self, job: &ConversionJob) {
        self.inner.iter().for_each(|n| n.job_queued(job));
    }

    fn job_started(&self, job: &ConversionJob) {
        self.inner.iter().for_each(|n| n.job_started(job));
    }

    fn job_progress(&self, job_id: JobId, progress: f64) {
        self.inner.iter().for_each(|n| n.job_progress(job_id, progress));
    }

    fn job_finished(&self, job: &ConversionJob) {
        self.inner.iter().for_each(|n| n.job_finished(job));
    }

    fn job_removed(&self, job_id: JobId) {
        self.inner.iter().for_each(|n| n.job_removed(job_id));
    }
}

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    JobQueued {
        job_id: JobId,
        source_path: PathBuf,
    },
    JobStarted {
        job_id: JobId,
    },
    JobProgress {
        job_id: JobId,
        progress: f64,
    },
    JobCompleted {
        job_id: JobId,
        output_path: Option<PathBuf>,
    },
    JobFailed {
        job_id: JobId,
        error: String,
    },
    JobCancelled {
        job_id: JobId,
    },
    JobRemoved {
        job_id: JobId,
    },
}

impl EventPayload {
    /// The job this event is about.
    pub fn job_id(&self) -> JobId {
        match self {
            EventPayload::JobQueued { job_id, .. }
            | EventPayload::JobStarted { job_id }
            | EventPayload::JobProgress { job_id, .. }
            | EventPayload::JobCompleted { job_id, .. }
            | EventPayload::JobFailed { job_id, .. }
            | EventPayload::JobCancelled { job_id }
            | EventPayload::JobRemoved { job_id } => *job_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel of job events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus whose channel buffers `capacity` events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers.
    pub fn broadcast(&self, payload: EventPayload) {
        // No subscribers is fine.
        let _ = self.tx.send(Event::new(payload));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Notifier for EventBus {
    fn job_queued(&self, job: &ConversionJob) {
        self.broadcast(EventPayload::JobQueued {
            job_id: job.id,
            source_path: job.source_path.clone(),
        });
    }

    fn job_started(&self, job: &ConversionJob) {
        self.broadcast(EventPayload::JobStarted { job_id: job.id });
    }

    fn job_progress(&self, job_id: JobId, progress: f64) {
        self.broadcast(EventPayload::JobProgress { job_id, progress });
    }

    fn job_finished(&self, job: &ConversionJob) {
        let payload = match job.status {
            JobStatus::Completed => EventPayload::JobCompleted {
                job_id: job.id,
                output_path: job.output_path.clone(),
            },
            JobStatus::Cancelled => EventPayload::JobCancelled { job_id: job.id },
            _ => EventPayload::JobFailed {
                job_id: job.id,
                error: job.error_detail.clone().unwrap_or_default(),
            },
        };
        self.broadcast(payload);
    }

    fn job_removed(&self, job_id: JobId) {
        self.broadcast(EventPayload::JobRemoved { job_id });
    }
}
