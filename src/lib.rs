//! audioforge - batch FLAC to M4A conversion driven by ffmpeg
//!
//! This library crate exposes the scheduler for the binary and for
//! integration testing.

pub mod conversion;

pub use conversion::{Scheduler, SchedulerSettings, SchedulerStatus};
