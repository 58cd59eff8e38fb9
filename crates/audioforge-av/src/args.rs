//! ffmpeg command line for a single conversion.

use std::path::Path;

use audioforge_core::{AudioQuality, OutputFormat};

/// Inputs to [`build_conversion_args`].
#[derive(Debug, Clone, Copy)]
pub struct ConversionArgs<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub format: OutputFormat,
    pub quality: AudioQuality,
    /// Copy the embedded picture stream as cover art.
    pub embedded_image: bool,
}

/// Build the argument vector (without the program name).
///
/// The layout is `-hide_banner -nostdin -y -i <in>`, the stream mapping, the
/// audio codec, `-map_metadata 0`, then the output path. AAC gets `-b:a` unless
/// the quality tier is uncapped; ALAC never takes a bitrate.
pub fn build_conversion_args(request: &ConversionArgs<'_>) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(request.input.to_string_lossy().into_owned());

    if request.embedded_image {
        args.extend(
            ["-map", "0:a", "-map", "0:v", "-c:v", "copy", "-disposition:v", "attached_pic"]
                .iter()
                .map(|s| s.to_string()),
        );
    } else {
        args.extend(["-map", "0:a", "-vn"].iter().map(|s| s.to_string()));
    }

    args.push("-c:a".into());
    args.push(request.format.encoder().into());

    let kbps = request.quality.bitrate_kbps();
    if !request.format.is_lossless() && kbps > 0 {
        args.push("-b:a".into());
        args.push(format!("{kbps}k"));
    }

    args.push("-map_metadata".into());
    args.push("0".into());
    args.push(request.output.to_string_lossy().into_owned());
    args
}
