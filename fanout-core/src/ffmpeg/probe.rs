use std::process::{Command, Stdio};

use serde::Deserialize;
use tracing::debug;

use crate::engine::{EngineStatus, InputInfo};
use crate::error::codes;
use crate::types::Locator;

use super::{FfmpegConfig, stats};

/// Media file information from ffprobe
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

pub(crate) fn probe(config: &FfmpegConfig, locator: &Locator) -> Result<InputInfo, EngineStatus> {
    let output = Command::new(&config.ffprobe_path)
        .args(["-v", "error"])
        .args(["-print_format", "json"])
        .args(["-select_streams", "v:0"])
        .args(["-show_format", "-show_streams"])
        .arg(locator.path())
        .stdin(Stdio::null())
        .output()
        .map_err(|err| {
            EngineStatus::new(
                codes::AVERROR_EXTERNAL,
                format!("failed to run {}: {err}", config.ffprobe_path.display()),
            )
        })?;

    if !output.status.success() {
        let lines: Vec<String> = String::from_utf8_lossy(&output.stderr)
            .lines()
            .map(str::to_string)
            .collect();
        return Err(stats::classify_failure(&lines));
    }

    let info = parse_probe_json(&output.stdout)?;
    debug!(input = %locator, width = info.width, height = info.height, duration = info.duration, "probed input");
    Ok(info)
}

pub(crate) fn parse_probe_json(json: &[u8]) -> Result<InputInfo, EngineStatus> {
    let parsed: ProbeOutput = serde_json::from_slice(json).map_err(|err| {
        EngineStatus::new(codes::AVERROR_INVALIDDATA, format!("unreadable ffprobe output: {err}"))
    })?;
    let stream = parsed
        .streams
        .into_iter()
        .find(|s| s.width.is_some() && s.height.is_some())
        .ok_or_else(|| EngineStatus::new(codes::NO_INPUT_CONFIGURATION, "input has no video stream"))?;

    let duration = parsed
        .format
        .and_then(|f| f.duration)
        .or(stream.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);
    let framerate = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rational)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rational));

    Ok(InputInfo {
        width: stream.width.unwrap_or_default(),
        height: stream.height.unwrap_or_default(),
        duration,
        framerate,
    })
}

fn parse_rational(value: &str) -> Option<f64> {
    let (num, den) = value.split_once('/').unwrap_or((value, "1"));
    let num = num.trim().parse::<f64>().ok()?;
    let den = den.trim().parse::<f64>().ok()?;
    (den > 0.0 && num > 0.0).then(|| num / den)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffprobe_json() {
        let json = br#"{
            "streams": [{"index": 0, "codec_type": "video", "width": 1920, "height": 1080,
                         "avg_frame_rate": "30000/1001", "r_frame_rate": "30000/1001"}],
            "format": {"filename": "in.mp4", "duration": "10.010000"}
        }"#;
        let info = parse_probe_json(json).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.duration, Some(10.01));
        assert!((info.framerate.unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn audio_only_input_has_no_configuration() {
        let json = br#"{"streams": [], "format": {"duration": "3.0"}}"#;
        assert_eq!(parse_probe_json(json).unwrap_err().code, codes::NO_INPUT_CONFIGURATION);
    }

    #[test]
    fn zero_rates_are_ignored() {
        assert_eq!(parse_rational("0/0"), None);
        assert_eq!(parse_rational("25"), Some(25.0));
    }
}
