use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediarun")]
#[command(author, version, about = "Run ffmpeg jobs with live progress")]
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
    /// Check that ffmpeg is installed and runnable
    Check,

    /// Run a preset as a job and stream its events
    Run {
        /// transcode, remux, extract_aac or snapshot
        preset: String,

        /// Input file or URL
        input: String,

        /// Where to write the result
        output: PathBuf,

        /// H.264 quality (transcode; 0 = default 23)
        #[arg(long, default_value_t = 0)]
        crf: u32,

        /// x264 preset (transcode; default medium)
        #[arg(long = "preset", default_value = "")]
        x264_preset: String,

        /// Audio bitrate (extract_aac; default 128k)
        #[arg(long, default_value = "")]
        bitrate: String,

        /// Seek position in seconds (snapshot)
        #[arg(long, default_value_t = 0.0)]
        at: f64,

        /// Print event-stream frames instead of readable lines
        #[arg(long)]
        sse: bool,
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
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_parses_options() {
        let cli = Cli::try_parse_from([
            "mediarun", "run", "snapshot", "in.mkv", "shot.jpg", "--at", "12.5", "--sse",
            "--preset", "fast",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                preset,
                x264_preset,
                at,
                sse,
                crf,
                ..
            } => {
                assert_eq!(preset, "snapshot");
                assert_eq!(x264_preset, "fast");
                assert_eq!(at, 12.5);
                assert!(sse);
                assert_eq!(crf, 0);
            }
            _ => panic!("expected run"),
        }
    }
}
