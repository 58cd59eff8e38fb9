//! Audio-domain enums and file type helpers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::Error;

/// Extension of the only supported input type.
pub const INPUT_EXTENSION: &str = "flac";

/// Container extension shared by every output format.
///
/// ALAC and AAC are both carried in an MPEG-4 audio container, so the output
/// path does not depend on the chosen format.
pub const CONTAINER_EXTENSION: &str = "m4a";

// ---------------------------------------------------------------------------
// OutputFormat
// ---------------------------------------------------------------------------

/// Target audio codec of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Apple Lossless.
    #[default]
    Alac,
    /// Advanced Audio Coding.
    Aac,
}

impl OutputFormat {
    /// All formats, in display order.
    pub const ALL: [OutputFormat; 2] = [OutputFormat::Alac, OutputFormat::Aac];

    /// ffmpeg encoder name for this format.
    pub fn encoder(&self) -> &'static str {
        match self {
            OutputFormat::Alac => "alac",
            OutputFormat::Aac => "aac",
        }
    }

    /// Whether the format is lossless (and therefore ignores bitrate).
    pub fn is_lossless(&self) -> bool {
        matches!(self, OutputFormat::Alac)
    }

    /// File extension of the produced file.
    pub fn container_extension(&self) -> &'static str {
        CONTAINER_EXTENSION
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encoder())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alac" => Ok(OutputFormat::Alac),
            "aac" => Ok(OutputFormat::Aac),
            other => Err(Error::Validation(format!(
                "unknown output format '{other}' (valid: alac, aac)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// AudioQuality
// ---------------------------------------------------------------------------

/// Ordered quality tiers, lowest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AudioQuality {
    Low,
    Medium,
    #[default]
    High,
    VeryHigh,
    Lossless,
}

impl AudioQuality {
    /// All tiers, lowest to highest.
    pub const ALL: [AudioQuality; 5] = [
        AudioQuality::Low,
        AudioQuality::Medium,
        AudioQuality::High,
        AudioQuality::VeryHigh,
        AudioQuality::Lossless,
    ];

    /// Target bitrate in kbit/s. `0` means no bitrate cap.
    pub fn bitrate_kbps(&self) -> u32 {
        match self {
            AudioQuality::Low => 128,
            AudioQuality::Medium => 192,
            AudioQuality::High => 256,
            AudioQuality::VeryHigh => 320,
            AudioQuality::Lossless => 0,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            AudioQuality::Low => "low",
            AudioQuality::Medium => "medium",
            AudioQuality::High => "high",
            AudioQuality::VeryHigh => "very_high",
            AudioQuality::Lossless => "lossless",
        }
    }
}

impl fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        AudioQuality::ALL
            .into_iter()
            .find(|q| q.as_str() == normalized)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "unknown audio quality '{s}' (valid: low, medium, high, very_high, lossless)"
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Check if a path has the supported input extension (case-insensitive).
pub fn is_supported_input(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(INPUT_EXTENSION))
        .unwrap_or(false)
}

/// Compute `{output_dir}/{input stem}.{container}` for an input file.
pub fn output_path_for(input: &Path, output_dir: &Path, format: OutputFormat) -> std::path::PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    output_dir.join(format!("{stem}.{}", format.container_extension()))
}
