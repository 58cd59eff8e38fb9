//! Pre-conversion probes.
//!
//! Both probes run `ffmpeg -hide_banner -i <input>` with no output file. ffmpeg
//! exits non-zero in that mode ("At least one output file must be specified")
//! but still prints the input description to stderr, which is all we need.

use std::path::Path;
use std::time::Duration;

use audioforge_core::{Error, Result};

use crate::command::{ToolCommand, ToolOutput};
use crate::progress::parse_duration;

async fn describe_input(ffmpeg: &Path, input: &Path, timeout: Duration) -> Result<ToolOutput> {
    ToolCommand::new(ffmpeg.to_path_buf())
        .args(["-hide_banner", "-nostdin", "-i"])
        .arg(input.to_string_lossy())
        .timeout(timeout)
        .execute()
        .await
}

/// Total duration of `input` in seconds.
///
/// # Errors
///
/// [`Error::DurationParsingFailed`] when the probe cannot be spawned, times
/// out, or prints no usable `Duration:` line.
pub async fn probe_duration(ffmpeg: &Path, input: &Path, timeout: Duration) -> Result<f64> {
    let output = describe_input(ffmpeg, input, timeout)
        .await
        .map_err(|e| {
            tracing::debug!(input = %input.display(), "Duration probe failed: {e}");
            Error::DurationParsingFailed
        })?;
    let duration = parse_duration(&output.stderr)?;
    tracing::debug!(input = %input.display(), duration, "Probed duration");
    Ok(duration)
}

/// Whether `input` carries an embedded picture (cover art shows up as a
/// video stream).
///
/// Never fails: any probe error means "no embedded image".
pub async fn probe_embedded_image(ffmpeg: &Path, input: &Path, timeout: Duration) -> bool {
    match describe_input(ffmpeg, input, timeout).await {
        Ok(output) => has_video_stream(&output.stderr),
        Err(e) => {
            tracing::debug!(input = %input.display(), "Embedded image probe failed: {e}");
            false
        }
    }
}

fn has_video_stream(probe_output: &str) -> bool {
    probe_output
        .lines()
        .any(|line| line.trim_start().starts_with("Stream #") && line.contains("Video:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WITH_COVER: &str = "Input #0, flac, from 'a.flac':\n  Duration: 00:03:12.40, start: 0.000000, bitrate: 1012 kb/s\n  Stream #0:0: Audio: flac, 44100 Hz, stereo, s16\n  Stream #0:1: Video: mjpeg (Baseline), yuvj420p, 500x500, 90k tbn (attached pic)\n";
    const AUDIO_ONLY: &str = "Input #0, flac, from 'a.flac':\n  Duration: 00:03:12.40, start: 0.000000, bitrate: 1012 kb/s\n  Stream #0:0: Audio: flac, 44100 Hz, stereo, s16\n";

    #[test]
    fn detects_attached_picture() {
        assert!(has_video_stream(WITH_COVER));
        assert!(!has_video_stream(AUDIO_ONLY));
    }

    #[test]
    fn metadata_mentioning_video_is_ignored() {
        let output = format!("{AUDIO_ONLY}    comment         : Video: none\n");
        assert!(!has_video_stream(&output));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probes_against_script() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ffmpeg");
        std::fs::write(
            &script,
            format!("#!/bin/sh\ncat >&2 <<'EOF'\n{WITH_COVER}EOF\nexit 1\n"),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let input = dir.path().join("a.flac");
        let timeout = Duration::from_secs(5);
        let duration = probe_duration(&script, &input, timeout).await.unwrap();
        assert!((duration - 192.4).abs() < 1e-9);
        assert!(probe_embedded_image(&script, &input, timeout).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stuck_probe_is_duration_failure() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ffmpeg");
        std::fs::write(&script, "#!/bin/sh
exec sleep 30
").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let err = probe_duration(&script, &dir.path().join("a.flac"), Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DurationParsingFailed));
    }

    #[tokio::test]
    async fn missing_tool_is_duration_failure() {
        let err = probe_duration(
            Path::new("/nonexistent/ffmpeg"),
            Path::new("/music/a.flac"),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::DurationParsingFailed));
    }

    #[tokio::test]
    async fn missing_tool_means_no_image() {
        let input = Path::new("/music/a.flac");
        assert!(
            !probe_embedded_image(Path::new("/nonexistent/ffmpeg"), input, Duration::from_secs(1))
                .await
        );
    }
}
