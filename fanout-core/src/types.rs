//! Caller-facing request and result records.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::accel::Acceleration;
use crate::detector::DetectionScores;
use crate::error::{ErrorKind, Result, TranscodeError};
use crate::profile::RenditionProfile;

/// Where media is read from or written to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum Locator {
    /// Seekable regular file.
    Path(PathBuf),
    /// Non-seekable named pipe.
    Pipe(PathBuf),
}

impl Locator {
    pub fn path(&self) -> &Path {
        match self {
            Self::Path(path) | Self::Pipe(path) => path,
        }
    }

    pub fn is_pipe(&self) -> bool {
        matches!(self, Self::Pipe(_))
    }

    pub fn is_empty(&self) -> bool {
        self.path().as_os_str().is_empty()
    }
}

impl From<&str> for Locator {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<PathBuf> for Locator {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Pipe(path) => write!(f, "pipe:{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub locator: Locator,
    #[serde(default)]
    pub acceleration: Acceleration,
    /// Repackage only; unset encoders default to `copy`.
    #[serde(default)]
    pub transmuxing: bool,
    /// Known `(width, height)`; required to aspect-fit a pipe input.
    #[serde(default)]
    pub dimensions: Option<(u32, u32)>,
}

impl InputSpec {
    pub fn new(locator: impl Into<Locator>) -> Self {
        Self {
            locator: locator.into(),
            acceleration: Acceleration::software(),
            transmuxing: false,
            dimensions: None,
        }
    }

    pub fn with_acceleration(mut self, acceleration: Acceleration) -> Self {
        self.acceleration = acceleration;
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Some((width, height));
        self
    }

    pub fn transmuxing(mut self) -> Self {
        self.transmuxing = true;
        self
    }
}

/// A named component (muxer or encoder) plus its options, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentOptions {
    pub name: String,
    #[serde(default)]
    pub options: Vec<(String, String)>,
}

impl ComponentOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Vec::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    pub(crate) fn explicit_name(component: Option<&Self>) -> Option<&str> {
        component
            .map(|c| c.name.trim())
            .filter(|name| !name.is_empty())
    }
}

/// Output trim window in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipRange {
    pub from: Option<f64>,
    pub to: Option<f64>,
}

impl ClipRange {
    pub fn validate(&self) -> Result<()> {
        let invalid = |detail: String| Err(TranscodeError::new(ErrorKind::InvalidInput, detail));
        for bound in [self.from, self.to].into_iter().flatten() {
            if !bound.is_finite() || bound < 0.0 {
                return invalid(format!("clip bound {bound} must be a non-negative time"));
            }
        }
        if let (Some(from), Some(to)) = (self.from, self.to)
            && from > to
        {
            return invalid(format!("clip starts at {from}s after it ends at {to}s"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub locator: Locator,
    pub profile: RenditionProfile,
    #[serde(default)]
    pub acceleration: Acceleration,
    #[serde(default)]
    pub muxer: Option<ComponentOptions>,
    #[serde(default)]
    pub video: Option<ComponentOptions>,
    #[serde(default)]
    pub audio: Option<ComponentOptions>,
    /// Ask the engine to write `<output>.bin` fingerprints.
    #[serde(default)]
    pub calc_signature: bool,
    #[serde(default)]
    pub clip: ClipRange,
}

impl OutputSpec {
    pub fn new(locator: impl Into<Locator>, profile: RenditionProfile) -> Self {
        Self {
            locator: locator.into(),
            profile,
            acceleration: Acceleration::software(),
            muxer: None,
            video: None,
            audio: None,
            calc_signature: false,
            clip: ClipRange::default(),
        }
    }

    pub fn with_acceleration(mut self, acceleration: Acceleration) -> Self {
        self.acceleration = acceleration;
        self
    }

    pub fn with_muxer(mut self, muxer: ComponentOptions) -> Self {
        self.muxer = Some(muxer);
        self
    }

    pub fn with_video_encoder(mut self, video: ComponentOptions) -> Self {
        self.video = Some(video);
        self
    }

    pub fn with_audio_encoder(mut self, audio: ComponentOptions) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_signature(mut self) -> Self {
        self.calc_signature = true;
        self
    }

    pub fn with_clip(mut self, from: Option<f64>, to: Option<f64>) -> Self {
        self.clip = ClipRange { from, to };
        self
    }

    /// Companion fingerprint artifact path.
    pub fn signature_path(&self) -> PathBuf {
        let mut path = self.locator.path().as_os_str().to_owned();
        path.push(".bin");
        PathBuf::from(path)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCounters {
    pub frames: u64,
    pub pixels: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodedOutput {
    pub counters: MediaCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionScores>,
}

/// Counters for one successful call; `encoded[i]` belongs to `outputs[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodeResult {
    pub decoded: MediaCounters,
    pub encoded: Vec<EncodedOutput>,
}
