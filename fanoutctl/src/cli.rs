use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};
use fanout_core::Accel;

#[derive(Parser, Debug)]
#[command(name = "fanoutctl", version)]
#[command(about = "Decode once, encode many: drive fanout transcoding sessions")]
pub struct Cli {
    /// Configuration file (overrides FANOUT_CONFIG and the default locations)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Env file applied before reading the environment
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Transcode one input into several renditions in a single pass
    Transcode(TranscodeArgs),
    /// List the built-in rendition names
    Renditions {
        /// Print the resolved profiles as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the dimensions, duration and framerate of an input
    Probe {
        input: PathBuf,
    },
    /// Compare two `<output>.bin` fingerprints; exits 1 when they differ
    Compare {
        first: PathBuf,
        second: PathBuf,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TranscodeArgs {
    /// Input file or named pipe
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output path; repeat once per rendition, in rendition order
    #[arg(short, long = "output", required = true)]
    pub outputs: Vec<PathBuf>,

    /// Comma separated built-in rendition names
    #[arg(long, conflicts_with = "profiles_json")]
    pub profiles: Option<String>,

    /// JSON file with rendition profiles
    #[arg(long)]
    pub profiles_json: Option<PathBuf>,

    /// Decode acceleration: sw, nvidia, amd or vaapi
    #[arg(long, default_value = "sw", value_parser = parse_accel)]
    pub hwaccel: Accel,

    /// Decode device (empty for the default device)
    #[arg(long, default_value = "")]
    pub device: String,

    /// Encode acceleration for every output (defaults to the decode side)
    #[arg(long, value_parser = parse_accel)]
    pub encode_hwaccel: Option<Accel>,

    /// Encode device for every output
    #[arg(long)]
    pub encode_device: Option<String>,

    /// Remux without re-encoding video or audio
    #[arg(long)]
    pub transmux: bool,

    /// Input dimensions as WxH; skips probing for aspect fit
    #[arg(long, value_parser = parse_size)]
    pub input_size: Option<(u32, u32)>,

    /// Container format for every output (inferred from the path otherwise)
    #[arg(long)]
    pub muxer: Option<String>,

    /// Override the video encoder (`copy`, `drop` or an encoder name)
    #[arg(long)]
    pub video_encoder: Option<String>,

    /// Override the audio encoder (`copy`, `drop` or an encoder name)
    #[arg(long)]
    pub audio_encoder: Option<String>,

    /// Write a `<output>.bin` fingerprint next to every output
    #[arg(long)]
    pub signature: bool,

    /// Clip start in seconds
    #[arg(long)]
    pub from: Option<f64>,

    /// Clip end in seconds
    #[arg(long)]
    pub to: Option<f64>,

    /// Attempts before giving up on retryable failures
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Per-attempt time limit, e.g. `90s` or `10m`
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,
}

fn parse_accel(value: &str) -> Result<Accel, String> {
    value.parse::<Accel>().map_err(|err| err.description().to_string())
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{value}'"))?;
    let dim = |part: &str| {
        part.trim()
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| format!("invalid dimension '{part}'"))
    };
    Ok((dim(w)?, dim(h)?))
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value.trim()).map_err(|err| err.to_string())
}
