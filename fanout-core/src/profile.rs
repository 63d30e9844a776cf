//! Rendition profiles and the resolution resolver.
//!
//! A [`RenditionProfile`] describes one target encoding. Its resolution is a
//! descriptor string: `WxH` for fixed dimensions, or `Wxauto` / `autoxH` when
//! one dimension should follow the input's aspect ratio. Fitted dimensions are
//! aligned and bounds-checked against the encoder family that will consume
//! them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::accel::Accel;
use crate::detector::DetectorProfile;
use crate::error::{ErrorKind, Result, TranscodeError};

/// Encoder name that copies the stream instead of re-encoding it.
pub const ENCODER_COPY: &str = "copy";
/// Encoder name that removes the stream from the output.
pub const ENCODER_DROP: &str = "drop";

/// `copy` and `drop` bypass decoding-side parameter resolution entirely.
pub fn is_passthrough(encoder: &str) -> bool {
    encoder == ENCODER_COPY || encoder == ENCODER_DROP
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
    Vp8,
    Vp9,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
        }
    }

    pub fn software_encoder(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::H265 => "libx265",
            Self::Vp8 => "libvpx",
            Self::Vp9 => "libvpx-vp9",
        }
    }
}

impl FromStr for VideoCodec {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "h264" | "avc" => Ok(Self::H264),
            "h265" | "hevc" => Ok(Self::H265),
            "vp8" => Ok(Self::Vp8),
            "vp9" => Ok(Self::Vp9),
            other => Err(TranscodeError::new(
                ErrorKind::InvalidInput,
                format!("unknown video codec '{other}'"),
            )),
        }
    }
}

/// Codec profile passed to the encoder as `-profile:v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecProfile {
    Baseline,
    Main,
    High,
    ConstrainedHigh,
}

impl CodecProfile {
    pub fn encoder_value(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Main => "main",
            Self::High | Self::ConstrainedHigh => "high",
        }
    }
}

impl FromStr for CodecProfile {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "baseline" | "h264baseline" => Ok(Self::Baseline),
            "main" | "h264main" => Ok(Self::Main),
            "high" | "h264high" => Ok(Self::High),
            "constrainedhigh" | "h264constrainedhigh" => Ok(Self::ConstrainedHigh),
            other => Err(TranscodeError::new(
                ErrorKind::InvalidInput,
                format!("unknown codec profile '{other}'"),
            )),
        }
    }
}

/// Keyframe placement policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum GopPolicy {
    /// Leave keyframe placement to the encoder.
    #[default]
    Default,
    /// Every frame is a keyframe.
    IntraOnly,
    /// A keyframe every N seconds.
    Seconds(f64),
}

impl FromStr for GopPolicy {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "default" => return Ok(Self::Default),
            "intra" | "intra-only" | "intraonly" => return Ok(Self::IntraOnly),
            _ => {}
        }
        let seconds = trimmed
            .trim_end_matches('s')
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .ok_or_else(|| {
                TranscodeError::new(ErrorKind::InvalidInput, format!("invalid GOP '{trimmed}'"))
            })?;
        Ok(Self::Seconds(seconds))
    }
}

/// Parse bitrates such as `6000k`, `6M` or `6000000` into bits per second.
pub fn parse_bitrate(value: &str) -> Result<u64> {
    let trimmed = value.trim();
    let (digits, multiplier) = if let Some(rest) = trimmed.strip_suffix(['k', 'K']) {
        (rest, 1_000)
    } else if let Some(rest) = trimmed.strip_suffix(['m', 'M']) {
        (rest, 1_000_000)
    } else {
        (trimmed, 1)
    };
    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| {
            TranscodeError::new(ErrorKind::InvalidInput, format!("invalid bitrate '{value}'"))
        })
}

/// Target encoding for one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenditionProfile {
    pub name: String,
    /// Target bitrate in bits per second.
    pub bitrate: u64,
    /// Target framerate numerator; 0 keeps the input framerate.
    #[serde(default)]
    pub framerate: u32,
    #[serde(default = "default_framerate_den")]
    pub framerate_den: u32,
    /// `WxH`, `Wxauto` or `autoxH`.
    pub resolution: String,
    #[serde(default)]
    pub gop: GopPolicy,
    #[serde(default)]
    pub codec: VideoCodec,
    #[serde(default)]
    pub codec_profile: Option<CodecProfile>,
    #[serde(default)]
    pub detector: Option<DetectorProfile>,
}

fn default_framerate_den() -> u32 {
    1
}

impl RenditionProfile {
    pub fn new(name: impl Into<String>, resolution: impl Into<String>, bitrate: u64) -> Self {
        Self {
            name: name.into(),
            bitrate,
            framerate: 0,
            framerate_den: 1,
            resolution: resolution.into(),
            gop: GopPolicy::Default,
            codec: VideoCodec::H264,
            codec_profile: None,
            detector: None,
        }
    }

    pub fn with_framerate(mut self, num: u32, den: u32) -> Self {
        self.framerate = num;
        self.framerate_den = den;
        self
    }

    pub fn with_gop(mut self, gop: GopPolicy) -> Self {
        self.gop = gop;
        self
    }

    pub fn with_codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Output framerate as a float, `None` when the input rate passes through.
    pub fn target_fps(&self) -> Option<f64> {
        (self.framerate > 0).then(|| f64::from(self.framerate) / f64::from(self.framerate_den.max(1)))
    }

    /// Framerate conversion stage, skipped for passthrough.
    pub fn fps_filter(&self) -> Option<String> {
        match (self.framerate, self.framerate_den) {
            (0, _) => None,
            (num, 0 | 1) => Some(format!("fps={num}")),
            (num, den) => Some(format!("fps={num}/{den}")),
        }
    }
}

/// Parsed resolution descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Fixed { width: u32, height: u32 },
    /// Width is explicit, height follows the input aspect ratio.
    FitWidth(u32),
    /// Height is explicit, width follows the input aspect ratio.
    FitHeight(u32),
}

impl Resolution {
    pub fn needs_input_dimensions(&self) -> bool {
        !matches!(self, Self::Fixed { .. })
    }
}

impl FromStr for Resolution {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            TranscodeError::new(
                ErrorKind::InvalidResolution,
                format!("cannot decompose resolution '{s}'"),
            )
        };
        let lowered = s.trim().to_ascii_lowercase();
        let (w, h) = lowered.split_once('x').ok_or_else(invalid)?;
        let dim = |part: &str| {
            let part = part.trim();
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            part.parse::<u32>().ok().filter(|v| *v > 0)
        };
        match (w.trim(), h.trim()) {
            ("auto", "auto") => Err(invalid()),
            ("auto", h) => dim(h).map(Self::FitHeight).ok_or_else(invalid),
            (w, "auto") => dim(w).map(Self::FitWidth).ok_or_else(invalid),
            (w, h) => match (dim(w), dim(h)) {
                (Some(width), Some(height)) => Ok(Self::Fixed { width, height }),
                _ => Err(invalid()),
            },
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed { width, height } => write!(f, "{width}x{height}"),
            Self::FitWidth(width) => write!(f, "{width}xauto"),
            Self::FitHeight(height) => write!(f, "autox{height}"),
        }
    }
}

/// Alignment and bounding box an encoder family accepts.
///
/// Bounds are orientation agnostic: `long`/`short` refer to the larger and
/// smaller output dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderBounds {
    pub alignment: u32,
    pub min_long: u32,
    pub min_short: u32,
    pub max_long: u32,
    pub max_short: u32,
}

impl EncoderBounds {
    pub fn for_accel(accel: Accel) -> Self {
        match accel {
            Accel::Software => Self {
                alignment: 2,
                min_long: 2,
                min_short: 2,
                max_long: 16384,
                max_short: 16384,
            },
            Accel::Nvidia => Self {
                alignment: 2,
                min_long: 146,
                min_short: 50,
                max_long: 4096,
                max_short: 4096,
            },
            Accel::Amd => Self {
                alignment: 2,
                min_long: 64,
                min_short: 64,
                max_long: 4096,
                max_short: 2160,
            },
            Accel::Vaapi => Self {
                alignment: 2,
                min_long: 16,
                min_short: 16,
                max_long: 4096,
                max_short: 4096,
            },
        }
    }

    pub fn contains(&self, width: u32, height: u32) -> bool {
        let (long, short) = (width.max(height), width.min(height));
        (self.min_long..=self.max_long).contains(&long)
            && (self.min_short..=self.max_short).contains(&short)
    }

    /// `explicit * num / den` rounded to the nearest multiple of the alignment.
    fn fit(&self, explicit: u32, num: u32, den: u32) -> u32 {
        let align = u128::from(self.alignment.max(1));
        let numerator = u128::from(explicit) * u128::from(num);
        let denominator = u128::from(den) * align;
        let units = (2 * numerator + denominator) / (2 * denominator);
        let fitted = units.max(1) * align;
        u32::try_from(fitted).unwrap_or(u32::MAX)
    }
}

/// Resolve a resolution descriptor to concrete output dimensions.
///
/// Fixed dimensions are returned unchanged. Fitted dimensions need the input
/// size and must land inside the encoder family's bounding box.
pub fn resolve_resolution(
    descriptor: &str,
    input: Option<(u32, u32)>,
    family: Accel,
) -> Result<(u32, u32)> {
    let resolution: Resolution = descriptor.parse()?;
    let known_input = || {
        input.filter(|(w, h)| *w > 0 && *h > 0).ok_or_else(|| {
            TranscodeError::new(
                ErrorKind::InvalidResolution,
                format!("input dimensions unknown; cannot fit '{resolution}'"),
            )
        })
    };
    let bounds = EncoderBounds::for_accel(family);
    let (width, height) = match resolution {
        Resolution::Fixed { width, height } => return Ok((width, height)),
        Resolution::FitWidth(width) => {
            let (in_w, in_h) = known_input()?;
            (width, bounds.fit(width, in_h, in_w))
        }
        Resolution::FitHeight(height) => {
            let (in_w, in_h) = known_input()?;
            (bounds.fit(height, in_w, in_h), height)
        }
    };

    if !bounds.contains(width, height) {
        return Err(TranscodeError::new(
            ErrorKind::InvalidResolution,
            format!(
                "fitted resolution {width}x{height} is outside the {family} encoder bounds"
            ),
        ));
    }
    Ok((width, height))
}
