//! Conversion orchestration.
//!
//! - [`Scheduler`]: job set, FIFO admission under a concurrency limit,
//!   per-job and global cancellation
//! - `executor`: the per-job pipeline (checks, probes, ffmpeg, verification)

mod executor;
mod scheduler;

pub use executor::default_output_directory;
pub use scheduler::{Scheduler, SchedulerSettings, SchedulerStatus};
