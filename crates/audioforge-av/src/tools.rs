//! ffmpeg detection.
//!
//! The [`ToolRegistry`] resolves the ffmpeg executable once and hands out its
//! path to the probes and the conversion runner. Lookup order is the
//! configured override, a binary shipped next to the running executable, then
//! `PATH`.

use std::path::{Path, PathBuf};

use audioforge_core::config::ToolsConfig;
use audioforge_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Executable name searched for.
pub const FFMPEG: &str = "ffmpeg";

/// Where the executable was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    Config,
    Bundled,
    Path,
}

/// Availability information for ffmpeg, returned by [`ToolRegistry::check`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found and is executable.
    pub available: bool,
    /// Version string (first line of `-version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
    /// How the path was resolved.
    pub source: Option<ToolSource>,
}

/// Registry holding the discovered ffmpeg location.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    ffmpeg: Option<(PathBuf, ToolSource)>,
}

impl ToolRegistry {
    /// Discover ffmpeg using the override from config, the directory of the
    /// current executable, and finally [`which::which`].
    ///
    /// A configured path that does not exist is logged and skipped.
    pub fn discover(tools_config: &ToolsConfig) -> Self {
        let bundled_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        Self::discover_in(tools_config, bundled_dir.as_deref())
    }

    /// Same as [`discover`](Self::discover) with an explicit bundle directory.
    pub fn discover_in(tools_config: &ToolsConfig, bundled_dir: Option<&Path>) -> Self {
        if let Some(ref custom) = tools_config.ffmpeg_path {
            if custom.exists() {
                tracing::debug!("Using configured ffmpeg at {}", custom.display());
                return Self::with_path(custom.clone(), ToolSource::Config);
            }
            tracing::warn!(
                "Configured ffmpeg path {} does not exist; falling back to discovery",
                custom.display()
            );
        }

        if let Some(dir) = bundled_dir {
            let candidate = dir.join(executable_name());
            if candidate.is_file() {
                tracing::debug!("Using bundled ffmpeg at {}", candidate.display());
                return Self::with_path(candidate, ToolSource::Bundled);
            }
        }

        match which::which(FFMPEG) {
            Ok(path) => {
                tracing::debug!("Using ffmpeg from PATH at {}", path.display());
                Self::with_path(path, ToolSource::Path)
            }
            Err(_) => Self::default(),
        }
    }

    /// Build a registry around a known path.
    pub fn with_path(path: PathBuf, source: ToolSource) -> Self {
        Self {
            ffmpeg: Some((path, source)),
        }
    }

    /// Return the ffmpeg path, or the reason it cannot be used.
    ///
    /// # Errors
    ///
    /// - [`Error::FfmpegNotFound`] if discovery found nothing.
    /// - [`Error::FfmpegNotExecutable`] if the path is a directory, has
    ///   vanished, or lacks execute permission.
    pub fn require_ffmpeg(&self) -> Result<&Path> {
        let (path, _) = self.ffmpeg.as_ref().ok_or(Error::FfmpegNotFound)?;
        if !is_executable(path) {
            return Err(Error::FfmpegNotExecutable { path: path.clone() });
        }
        Ok(path)
    }

    /// Resolved path, without the executability check.
    pub fn ffmpeg_path(&self) -> Option<&Path> {
        self.ffmpeg.as_ref().map(|(p, _)| p.as_path())
    }

    /// Check ffmpeg and return availability information.
    pub fn check(&self) -> ToolInfo {
        match self.ffmpeg {
            Some((ref path, source)) => {
                let available = is_executable(path);
                ToolInfo {
                    name: FFMPEG.to_string(),
                    available,
                    version: if available { detect_version(path) } else { None },
                    path: Some(path.clone()),
                    source: Some(source),
                }
            }
            None => ToolInfo {
                name: FFMPEG.to_string(),
                available: false,
                version: None,
                path: None,
                source: None,
            },
        }
    }
}

fn executable_name() -> String {
    format!("{FFMPEG}{}", std::env::consts::EXE_SUFFIX)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Run `ffmpeg -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}
