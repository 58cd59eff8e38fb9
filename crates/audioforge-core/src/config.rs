//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML. Every section
//! defaults sensibly so a completely empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::media::{AudioQuality, OutputFormat};
use crate::Error;

/// Lower bound for `max_concurrent_tasks`.
pub const MIN_CONCURRENT_TASKS: usize = 1;
/// Upper bound for `max_concurrent_tasks`.
pub const MAX_CONCURRENT_TASKS: usize = 16;

/// Locations searched by [`load_config_or_default`] when no path is given.
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "./audioforge.toml",
    "~/.config/audioforge/config.toml",
];

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub conversion: ConversionConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("parse error: {e}")))
    }

    /// Check the values that have a hard range.
    pub fn validate(&self) -> Result<()> {
        let tasks = self.conversion.max_concurrent_tasks;
        if !(MIN_CONCURRENT_TASKS..=MAX_CONCURRENT_TASKS).contains(&tasks) {
            return Err(Error::Validation(format!(
                "conversion.max_concurrent_tasks must be between {MIN_CONCURRENT_TASKS} and {MAX_CONCURRENT_TASKS}, got {tasks}"
            )));
        }

        if self.tools.probe_timeout_secs == 0 {
            return Err(Error::Validation(
                "tools.probe_timeout_secs must be greater than 0".into(),
            ));
        }

        if let Some(ref dir) = self.conversion.output_directory {
            if dir.exists() && !dir.is_dir() {
                return Err(Error::Validation(format!(
                    "conversion.output_directory {} is not a directory",
                    dir.display()
                )));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Conversion defaults and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub default_output_format: OutputFormat,
    pub audio_quality: AudioQuality,
    pub max_concurrent_tasks: usize,
    /// Falls back to the platform documents directory when unset.
    pub output_directory: Option<PathBuf>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            default_output_format: OutputFormat::Alac,
            audio_quality: AudioQuality::High,
            max_concurrent_tasks: 2,
            output_directory: None,
        }
    }
}

/// External tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Explicit ffmpeg location; bundled/PATH discovery is used otherwise.
    pub ffmpeg_path: Option<PathBuf>,
    /// Timeout for the duration and embedded-image probes.
    pub probe_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            probe_timeout_secs: 30,
        }
    }
}

impl ToolsConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let mut config = Config::from_toml(&content)?;

    if let Some(dir) = config.conversion.output_directory.take() {
        config.conversion.output_directory = Some(expand_path(&dir));
    }
    if let Some(ffmpeg) = config.tools.ffmpeg_path.take() {
        config.tools.ffmpeg_path = Some(expand_path(&ffmpeg));
    }

    config.validate()?;
    Ok(config)
}

/// Load config from `custom_path`, else from the default locations, else
/// return the defaults.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            return load_config(path);
        }
    }

    tracing::debug!("No config file found; using defaults");
    Ok(Config::default())
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
}
