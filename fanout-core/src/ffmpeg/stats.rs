//! Parsing of ffmpeg's stderr: final statistics and failure reasons.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::engine::EngineStatus;
use crate::error::codes;

static INPUT_VIDEO_FRAMES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Input stream #0:\d+ \(video\):.*?(\d+) frames decoded")
        .expect("input stats regex should compile")
});

static OUTPUT_VIDEO_FRAMES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Output stream #(\d+):\d+ \(video\): (?:(\d+) frames encoded; )?(\d+) packets muxed")
        .expect("output stats regex should compile")
});

static INPUT_VIDEO_SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Stream #0:\d+.*?: Video: .*?(\d{2,5})x(\d{2,5})")
        .expect("video size regex should compile")
});

static PROGRESS_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"time=\s*(-?\d+):(\d{2}):(\d{2}(?:\.\d+)?)")
        .expect("progress time regex should compile")
});

/// Counters recovered from one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub decoded_frames: Option<u64>,
    pub input_size: Option<(u32, u32)>,
    /// Video frames per output file index.
    pub encoded_frames: BTreeMap<usize, u64>,
    /// Last reported output position in seconds.
    pub last_time: Option<f64>,
}

pub fn parse_stats<'a>(lines: impl IntoIterator<Item = &'a str>) -> RunStats {
    let mut stats = RunStats::default();
    for line in lines {
        if stats.input_size.is_none()
            && !line.contains("Output #")
            && let Some(caps) = INPUT_VIDEO_SIZE.captures(line)
        {
            let width = caps[1].parse().ok();
            let height = caps[2].parse().ok();
            stats.input_size = width.zip(height);
        }
        if stats.decoded_frames.is_none()
            && let Some(caps) = INPUT_VIDEO_FRAMES.captures(line)
        {
            stats.decoded_frames = caps[1].parse().ok();
        }
        if let Some(caps) = OUTPUT_VIDEO_FRAMES.captures(line) {
            let file = caps[1].parse::<usize>().ok();
            // Stream copies report muxed packets only.
            let frames = caps
                .get(2)
                .or_else(|| caps.get(3))
                .and_then(|m| m.as_str().parse::<u64>().ok());
            if let (Some(file), Some(frames)) = (file, frames) {
                stats.encoded_frames.insert(file, frames);
            }
        }
        if let Some(caps) = PROGRESS_TIME.captures_iter(line).last() {
            stats.last_time = parse_clock(&caps[1], &caps[2], &caps[3]);
        }
    }
    stats
}

fn parse_clock(hours: &str, minutes: &str, seconds: &str) -> Option<f64> {
    let hours = hours.parse::<f64>().ok()?;
    let minutes = minutes.parse::<f64>().ok()?;
    let seconds = seconds.parse::<f64>().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Reason text to native code, most specific first.
const FAILURE_PATTERNS: &[(&str, i32)] = &[
    ("Unknown encoder", codes::AVERROR_ENCODER_NOT_FOUND),
    ("Encoder not found", codes::AVERROR_ENCODER_NOT_FOUND),
    ("Unknown decoder", codes::AVERROR_DECODER_NOT_FOUND),
    ("Decoder not found", codes::AVERROR_DECODER_NOT_FOUND),
    ("no decoder found", codes::AVERROR_DECODER_NOT_FOUND),
    ("is not a suitable output format", codes::AVERROR_MUXER_NOT_FOUND),
    ("Unable to choose an output format", codes::AVERROR_MUXER_NOT_FOUND),
    ("Muxer not found", codes::AVERROR_MUXER_NOT_FOUND),
    ("Unknown input format", codes::AVERROR_DEMUXER_NOT_FOUND),
    ("Unrecognized option", codes::AVERROR_OPTION_NOT_FOUND),
    ("Option not found", codes::AVERROR_OPTION_NOT_FOUND),
    ("No such filter", codes::AVERROR_FILTER_NOT_FOUND),
    ("Impossible to convert between the formats", codes::UNSUPPORTED_PIXEL_FORMAT),
    ("Incompatible pixel format", codes::UNSUPPORTED_PIXEL_FORMAT),
    ("Unsupported pixel format", codes::UNSUPPORTED_PIXEL_FORMAT),
    ("Error reinitializing filters", codes::FILTER_GRAPH_INIT),
    ("Error initializing filter", codes::FILTER_GRAPH_INIT),
    ("Error configuring filter", codes::FILTER_GRAPH_INIT),
    ("No such file or directory", codes::ENOENT),
    ("Permission denied", codes::EACCES),
    ("Invalid data found when processing input", codes::AVERROR_INVALIDDATA),
    ("Broken pipe", codes::EPIPE),
    ("Cannot allocate memory", codes::ENOMEM),
    ("Invalid argument", codes::EINVAL),
];

/// Map a failed run's stderr to a native status.
pub fn classify_failure(lines: &[String]) -> EngineStatus {
    for (pattern, code) in FAILURE_PATTERNS {
        if let Some(line) = lines.iter().find(|line| line.contains(pattern)) {
            return EngineStatus::new(*code, strip_context(line));
        }
    }
    let last = lines
        .iter()
        .rev()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())
        .map(strip_context)
        .unwrap_or_else(|| "ffmpeg exited with an error".to_string());
    EngineStatus::new(codes::AVERROR_EXTERNAL, last)
}

/// Drop the `[component @ 0x...]` prefix ffmpeg puts on log lines.
fn strip_context(line: &str) -> String {
    let trimmed = line.trim();
    match trimmed.strip_prefix('[').and_then(|rest| rest.split_once("] ")) {
        Some((_, message)) => message.trim().to_string(),
        None => trimmed.to_string(),
    }
}
