//! # audioforge-av
//!
//! Everything that touches the ffmpeg executable.
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- locate ffmpeg from a config
//!   override, next to the running binary, or on `PATH`.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for short-lived probe invocations.
//! - **Streaming execution** ([`ProcessRunner`]) -- spawn a long-running
//!   conversion, deliver stderr chunks as they arrive, and cancel on demand.
//! - **Progress parsing** ([`progress`]) -- extract the input duration and the
//!   current `time=` position from ffmpeg diagnostics.
//! - **Probes** ([`probe`]) -- duration and embedded cover-art detection.
//! - **Argument construction** ([`args`]) -- the conversion command line.

pub mod args;
pub mod command;
pub mod probe;
pub mod progress;
pub mod runner;
pub mod tools;

// ---- Re-exports for convenience ----

pub use args::{build_conversion_args, ConversionArgs};
pub use command::{ToolCommand, ToolOutput};
pub use probe::{probe_duration, probe_embedded_image};
pub use progress::{parse_duration, parse_progress, ChunkSplitter};
pub use runner::{ProcessRunner, RunHandle, RunOutcome};
pub use tools::{ToolInfo, ToolRegistry};
