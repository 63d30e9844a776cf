//! Media Engine boundary.
//!
//! The orchestrator never decodes, filters or encodes anything itself. It
//! builds parameter records and hands them to a [`MediaEngine`], which owns
//! the per-session state behind a [`HandleId`].

use std::fmt;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::accel::Accel;
use crate::detector::DetectorProfile;
use crate::error::{self, codes};
use crate::profile::{CodecProfile, GopPolicy};
use crate::types::{EncodedOutput, Locator, MediaCounters};

/// Outputs a single engine call accepts.
pub const MAX_OUTPUTS: usize = 10;

/// Opaque per-session slot allocated by [`MediaEngine::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// Non-zero native status reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub code: i32,
    pub message: String,
}

impl EngineStatus {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unrecoverable(message: impl Into<String>) -> Self {
        Self::new(codes::UNRECOVERABLE_STATE, message)
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInput {
    pub locator: Locator,
    pub hwaccel: Accel,
    pub device: String,
    pub transmuxing: bool,
}

/// Immutable per-output parameter record.
///
/// Everything except `muxer_options` is borrowed by the engine for the
/// duration of the call. Muxer options are taken by the engine when it writes
/// the container header; whatever is left afterwards is released by the
/// session.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    pub locator: Locator,
    /// Container format; `None` lets the engine infer it from the path.
    pub muxer: Option<String>,
    pub muxer_options: Option<Vec<(String, String)>>,
    pub video_encoder: String,
    pub video_options: Vec<(String, String)>,
    pub audio_encoder: String,
    pub audio_options: Vec<(String, String)>,
    /// Comma-separated filter chain; `None` for passthrough outputs.
    pub filters: Option<String>,
    pub width: u32,
    pub height: u32,
    pub bitrate: u64,
    /// Target framerate `(num, den)`; `None` keeps the input rate.
    pub framerate: Option<(u32, u32)>,
    pub gop: GopPolicy,
    pub codec_profile: Option<CodecProfile>,
    pub encode_accel: Accel,
    pub device: String,
    /// Video frames after which the engine stops the output.
    pub frame_cap: Option<u64>,
    pub clip_from: Option<f64>,
    pub clip_to: Option<f64>,
    pub calc_signature: bool,
    pub detector: Option<DetectorProfile>,
}

impl EngineOutput {
    /// Take the muxer options for writing the container header.
    pub fn take_muxer_options(&mut self) -> Option<Vec<(String, String)>> {
        self.muxer_options.take()
    }

    pub fn muxer_options_consumed(&self) -> bool {
        self.muxer_options.is_none()
    }

    pub fn is_video_dropped(&self) -> bool {
        self.video_encoder == crate::profile::ENCODER_DROP
    }
}

/// Raw counters returned by a successful engine call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineReport {
    pub decoded: MediaCounters,
    pub encoded: Vec<EncodedOutput>,
}

/// Facts about an input that the orchestrator needs for resolution fitting
/// and the size guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InputInfo {
    pub width: u32,
    pub height: u32,
    /// Seconds.
    pub duration: Option<f64>,
    pub framerate: Option<f64>,
}

#[cfg_attr(test, mockall::automock)]
pub trait MediaEngine: Send + Sync {
    /// Allocate a fresh session slot.
    fn open(&self) -> Result<HandleId, EngineStatus>;

    /// Release a slot. Unknown or already released handles are ignored.
    fn close(&self, handle: HandleId);

    /// Decode `input` once and encode every output in order.
    fn transcode(
        &self,
        handle: HandleId,
        input: &EngineInput,
        outputs: &mut [EngineOutput],
    ) -> Result<EngineReport, EngineStatus>;

    /// The next call on `handle` follows a timestamp discontinuity.
    fn discontinuity(&self, handle: HandleId) -> Result<(), EngineStatus>;

    fn probe(&self, locator: &Locator) -> Result<InputInfo, EngineStatus>;

    /// Approximate equality of two `<output>.bin` fingerprint buffers.
    fn compare_signatures(&self, a: &[u8], b: &[u8]) -> Result<bool, EngineStatus>;
}

/// Process-wide engine settings established by [`init`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// ffmpeg style level name (`quiet`, `error`, `warning`, `info`, `verbose`, `debug`).
    pub log_level: String,
    /// Classifier made available to outputs that reference it.
    pub detector: Option<DetectorProfile>,
}

static SETTINGS: Lazy<RwLock<Option<EngineSettings>>> = Lazy::new(|| RwLock::new(None));

/// Establish process-wide engine state. Call once before creating sessions.
pub fn init(settings: EngineSettings) {
    let table = error::install_error_table();
    let mut slot = SETTINGS.write();
    if slot.is_some() {
        warn!("engine initialised twice; replacing settings");
    }
    info!(
        log_level = %settings.log_level,
        detector = settings.detector.as_ref().map(|d| d.name.as_str()),
        error_codes = table.len(),
        "media engine initialised"
    );
    *slot = Some(settings);
}

/// Tear down process-wide engine state after every session has stopped.
pub fn deinit() {
    if SETTINGS.write().take().is_some() {
        info!("media engine deinitialised");
    }
}

pub fn settings() -> Option<EngineSettings> {
    SETTINGS.read().clone()
}
