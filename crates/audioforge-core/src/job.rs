//! The conversion job value object and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ids::JobId;
use crate::media::{AudioQuality, OutputFormat};

/// Lifecycle state of a conversion job.
///
/// `Pending -> Converting -> {Completed | Failed | Cancelled}`. Terminal
/// states are only left by removing the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Converting,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether the status is one of the three end states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One requested file conversion and its tracked lifecycle.
///
/// The cancel handle for a running job is kept by the scheduler, not here, so
/// a `ConversionJob` is a plain snapshot that can be cloned to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    pub id: JobId,
    pub source_path: PathBuf,
    pub file_name: String,
    pub output_format: OutputFormat,
    pub quality: AudioQuality,
    pub status: JobStatus,
    /// Fraction in `[0, 1]`; only meaningful while converting.
    pub progress: f64,
    /// Present only when `status == Failed`.
    pub error_detail: Option<String>,
    /// Set once the job completes.
    pub output_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ConversionJob {
    pub fn new(source_path: PathBuf, output_format: OutputFormat, quality: AudioQuality) -> Self {
        let file_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            id: JobId::new(),
            source_path,
            file_name,
            output_format,
            quality,
            status: JobStatus::Pending,
            progress: 0.0,
            error_detail: None,
            output_path: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Converting;
        self.progress = 0.0;
        self.error_detail = None;
        self.started_at = Some(Utc::now());
    }

    /// Record a progress sample. Samples outside a converting episode and
    /// samples lower than the current value are ignored.
    ///
    /// Returns `true` if the stored progress changed.
    pub fn update_progress(&mut self, fraction: f64) -> bool {
        if self.status != JobStatus::Converting || !fraction.is_finite() {
            return false;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction <= self.progress {
            return false;
        }
        self.progress = fraction;
        true
    }

    pub fn complete(&mut self, output_path: PathBuf) {
        self.status = JobStatus::Completed;
        self.output_path = Some(output_path);
        self.finish();
    }

    pub fn fail(&mut self, error: &str) {
        self.status = JobStatus::Failed;
        self.error_detail = Some(error.to_string());
        self.finish();
    }

    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.finish();
    }

    fn finish(&mut self) {
        self.progress = 0.0;
        self.finished_at = Some(Utc::now());
    }
}
