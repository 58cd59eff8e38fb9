use audioforge_core::{AudioQuality, OutputFormat};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "audioforge")]
#[command(author, version, about = "Batch FLAC to M4A converter driven by ffmpeg")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert FLAC files (or every FLAC file in the given directories)
    Convert {
        /// Files or directories to convert
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output format: alac or aac
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Quality tier: low, medium, high, very_high or lossless
        #[arg(short, long)]
        quality: Option<AudioQuality>,

        /// Maximum number of simultaneous conversions (1-16)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Directory for converted files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Check that ffmpeg is available
    CheckTools {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_convert_flags() {
        let cli = Cli::parse_from([
            "audioforge",
            "convert",
            "a.flac",
            "albums/",
            "--format",
            "aac",
            "--quality",
            "very-high",
            "-j",
            "4",
        ]);
        match cli.command {
            Commands::Convert {
                inputs,
                format,
                quality,
                jobs,
                output_dir,
            } => {
                assert_eq!(inputs.len(), 2);
                assert_eq!(format, Some(OutputFormat::Aac));
                assert_eq!(quality, Some(AudioQuality::VeryHigh));
                assert_eq!(jobs, Some(4));
                assert!(output_dir.is_none());
            }
            _ => panic!("expected convert"),
        }
    }

    #[test]
    fn parses_check_tools_json() {
        let cli = Cli::parse_from(["audioforge", "check-tools", "--json"]);
        assert!(matches!(cli.command, Commands::CheckTools { json: true }));
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(Cli::try_parse_from(["audioforge", "convert", "a.flac", "-f", "mp3"]).is_err());
    }
}
