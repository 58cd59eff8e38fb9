//! audioforge-core: shared types, IDs, errors, configuration, and events.
//!
//! This crate is the foundational dependency for the other audioforge
//! crates, providing the job identifier, a unified error type, the audio
//! format/quality enums, the [`ConversionJob`] value object, configuration
//! loading, and the [`Notifier`] seam with its broadcast implementation.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod job;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use events::{EventBus, FanoutNotifier, LogNotifier, Notifier};
pub use ids::JobId;
pub use job::{ConversionJob, JobStatus};
pub use media::*;
