//! Parsing of ffmpeg's diagnostic stream.
//!
//! ffmpeg reports the input length once, as `Duration: HH:MM:SS.ff, ...`, and
//! then rewrites a status line containing `time=HH:MM:SS.ff` as the encode
//! advances. Status updates are usually separated by `\r` rather than `\n`,
//! and a pipe read may split one in half, so [`ChunkSplitter`] reassembles
//! fragments before they reach [`parse_progress`].

use audioforge_core::{Error, Result};

const DURATION_MARKER: &str = "Duration:";
const TIME_MARKER: &str = "time=";

/// Extract the total duration in seconds from probe output.
///
/// # Errors
///
/// [`Error::DurationParsingFailed`] if no line carries a parseable
/// `Duration:` timestamp (ffmpeg prints `Duration: N/A` for streams of
/// unknown length).
pub fn parse_duration(probe_output: &str) -> Result<f64> {
    probe_output
        .lines()
        .filter_map(|line| {
            let start = line.find(DURATION_MARKER)? + DURATION_MARKER.len();
            let value = line[start..].trim_start();
            let end = value
                .find(|c: char| c == ',' || c.is_whitespace())
                .unwrap_or(value.len());
            parse_time_str(&value[..end])
        })
        .next()
        .ok_or(Error::DurationParsingFailed)
}

/// Compute the progress fraction from a chunk of status output.
///
/// The chunk may contain several `\r`-separated status updates; the last
/// `time=` value that parses wins. Returns `None` when there is no usable
/// timestamp or when `total_secs` is not a positive number. The result is
/// clamped to `[0, 1]`.
pub fn parse_progress(chunk: &str, total_secs: f64) -> Option<f64> {
    if !(total_secs.is_finite() && total_secs > 0.0) {
        return None;
    }

    chunk
        .rmatch_indices(TIME_MARKER)
        .find_map(|(idx, _)| {
            let value = extract_value(&chunk[idx + TIME_MARKER.len()..])?;
            parse_time_str(value)
        })
        .map(|secs| (secs / total_secs).clamp(0.0, 1.0))
}

/// Take the token after a `key=` marker, skipping ffmpeg's column padding.
fn extract_value(rest: &str) -> Option<&str> {
    let trimmed = rest.trim_start_matches(' ');
    let end = trimmed
        .find(|c: char| c.is_whitespace())
        .unwrap_or(trimmed.len());
    let val = &trimmed[..end];
    if val.is_empty() {
        None
    } else {
        Some(val)
    }
}

/// Parse `HH:MM:SS` or `HH:MM:SS.ff` into seconds.
fn parse_time_str(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let mins: f64 = parts[1].parse().ok()?;
    let secs: f64 = parts[2].parse().ok()?;
    let total = hours * 3600.0 + mins * 60.0 + secs;
    total.is_finite().then_some(total)
}

// ---------------------------------------------------------------------------
// ChunkSplitter
// ---------------------------------------------------------------------------

/// Reassembles `\r`/`\n`-terminated fragments from arbitrary pipe reads.
///
/// Bytes after the last terminator are held back until the next chunk (or
/// [`finish`](Self::finish)), so neither a status line nor a multi-byte UTF-8
/// sequence is cut in half.
#[derive(Debug, Default)]
pub struct ChunkSplitter {
    pending: Vec<u8>,
}

impl ChunkSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the fragments it completed. Empty fragments
    /// (from `\r\n` pairs) are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last) = self.pending.iter().rposition(|b| *b == b'\r' || *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete
            .split(|b| *b == b'\r' || *b == b'\n')
            .filter(|frag| !frag.is_empty())
            .map(|frag| String::from_utf8_lossy(frag).into_owned())
            .collect()
    }

    /// Return whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_from_probe_output() {
        let output = "Input #0, flac, from 'a.flac':\n  Duration: 00:01:30.50, start: 0.000000, bitrate: 900 kb/s\n";
        assert_eq!(parse_duration(output).unwrap(), 90.5);
    }

    #[test]
    fn parse_duration_without_marker_fails() {
        assert!(matches!(
            parse_duration("Input #0, flac\nStream #0:0: Audio: flac"),
            Err(Error::DurationParsingFailed)
        ));
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_duration_na_fails() {
        assert!(parse_duration("  Duration: N/A, start: 0.000000, bitrate: N/A").is_err());
    }

    #[test]
    fn parse_duration_without_fraction() {
        assert_eq!(parse_duration("Duration: 01:00:00, start: 0").unwrap(), 3600.0);
    }

    #[test]
    fn parse_progress_halfway() {
        let chunk = "frame=10 time=00:00:45.00 bitrate=128.0kbits/s";
        assert_eq!(parse_progress(chunk, 90.0), Some(0.5));
    }

    #[test]
    fn parse_progress_zero_duration_is_none() {
        assert_eq!(parse_progress("time=00:00:45.00", 0.0), None);
        assert_eq!(parse_progress("time=00:00:45.00", -1.0), None);
        assert_eq!(parse_progress("time=00:00:45.00", f64::NAN), None);
    }

    #[test]
    fn parse_progress_clamps_past_end() {
        assert_eq!(parse_progress("time=00:02:00.00", 90.0), Some(1.0));
    }

    #[test]
    fn parse_progress_uses_last_timestamp() {
        let chunk = "size=  1kB time=00:00:09.00 bitrate=1\rsize=  2kB time=00:00:18.00 bitrate=1\r";
        let p = parse_progress(chunk, 90.0).unwrap();
        assert!((p - 0.2).abs() < 1e-9);
    }

    #[test]
    fn parse_progress_skips_unparseable_tail() {
        let chunk = "time=00:00:30.00 bitrate=1\rtime=N/A bitrate=N/A";
        let p = parse_progress(chunk, 60.0).unwrap();
        assert!((p - 0.5).abs() < 1e-9);
    }

    #[test]
    fn parse_progress_no_timestamp() {
        assert_eq!(parse_progress("Stream #0:0: Audio: flac", 10.0), None);
        assert_eq!(parse_progress("", 10.0), None);
    }

    #[test]
    fn parse_time_str_valid_and_invalid() {
        assert!((parse_time_str("00:01:02.05").unwrap() - 62.05).abs() < 0.001);
        assert!(parse_time_str("00:00").is_none());
        assert!(parse_time_str("invalid").is_none());
    }

    #[test]
    fn splitter_reassembles_split_fragment() {
        let mut splitter = ChunkSplitter::new();
        assert!(splitter.push(b"size=1kB ti").is_empty());
        let frags = splitter.push(b"me=00:00:05.00 bitrate=1\rsize=2kB");
        assert_eq!(frags, vec!["size=1kB time=00:00:05.00 bitrate=1".to_string()]);
        assert_eq!(splitter.finish().as_deref(), Some("size=2kB"));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn splitter_drops_empty_fragments() {
        let mut splitter = ChunkSplitter::new();
        let frags = splitter.push(b"line one\r\nline two\n");
        assert_eq!(frags, vec!["line one".to_string(), "line two".to_string()]);
    }

    #[test]
    fn splitter_keeps_multibyte_sequence_intact() {
        let mut splitter = ChunkSplitter::new();
        let text = "Input #0, from 'caf\u{e9}.flac':\n";
        let bytes = text.as_bytes();
        let cut = bytes.len() - 9;
        assert!(splitter.push(&bytes[..cut]).is_empty());
        let frags = splitter.push(&bytes[cut..]);
        assert_eq!(frags, vec![text.trim_end().to_string()]);
    }
}
