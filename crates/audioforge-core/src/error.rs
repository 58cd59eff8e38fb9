//! Unified error type for audioforge.
//!
//! Every failure that can end a conversion job is a variant of [`Error`]; its
//! `Display` text is what ends up in [`crate::ConversionJob::error_detail`].

use std::path::PathBuf;

/// Unified error type covering all failure modes in audioforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// ffmpeg could not be located.
    #[error("ffmpeg not found; is it bundled or installed in PATH?")]
    FfmpegNotFound,

    /// ffmpeg was located but cannot be executed.
    #[error("ffmpeg at {} is not executable", path.display())]
    FfmpegNotExecutable {
        /// Path of the offending file.
        path: PathBuf,
    },

    /// The input file does not exist.
    #[error("input file not found: {}", path.display())]
    InputNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The input file exists but cannot be opened for reading.
    #[error("input file {} is not readable: {source}", path.display())]
    InputUnreadable {
        /// Path of the input file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The output directory could not be created.
    #[error("failed to create output directory {}: {source}", path.display())]
    OutputDirectoryCreationFailed {
        /// Directory that was being created.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The output directory (or its nearest existing ancestor) is not writable.
    #[error("output directory {} is not accessible", path.display())]
    OutputDirectoryNotAccessible {
        /// Directory that failed the write check.
        path: PathBuf,
    },

    /// The conversion process could not be launched.
    #[error("failed to start ffmpeg: {source}")]
    ProcessStartFailed {
        /// The underlying spawn error.
        source: std::io::Error,
    },

    /// The conversion process exited unsuccessfully.
    #[error("ffmpeg failed ({}): {detail}", describe_exit(exit_code))]
    ProcessFailed {
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Captured diagnostic output, or a synthetic explanation.
        detail: String,
    },

    /// The duration probe produced no usable `Duration:` line.
    #[error("could not determine input duration")]
    DurationParsingFailed,

    /// An external tool other than the conversion itself failed.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Configuration could not be read or parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::ProcessFailed`].
    pub fn process_failed(exit_code: Option<i32>, detail: impl Into<String>) -> Self {
        Error::ProcessFailed {
            exit_code,
            detail: detail.into(),
        }
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
