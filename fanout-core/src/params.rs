//! Per-output parameter building.
//!
//! Turns one [`OutputSpec`] into the [`EngineOutput`] record the engine
//! consumes: acceleration lookup, resolution fitting, filter chain, component
//! defaults and the size guard cap. Building is side-effect free apart from an
//! optional probe of the input, made at most once per call.

use tracing::debug;

use crate::accel::{self, AccelPlan};
use crate::engine::{EngineInput, EngineOutput, EngineStatus, InputInfo, MediaEngine};
use crate::error::{ErrorKind, Result, TranscodeError};
use crate::guard::SizeGuard;
use crate::profile::{self, ENCODER_COPY, Resolution};
use crate::types::{ComponentOptions, InputSpec, OutputSpec};

pub const DEFAULT_AUDIO_ENCODER: &str = "aac";

/// Pixel format normalisation after hardware frames are downloaded.
pub const DOWNLOAD_FILTER: &str = "hwdownload,format=nv12";

/// Input facts shared by every output of one call.
pub(crate) struct InputFacts<'a> {
    engine: &'a dyn MediaEngine,
    input: &'a InputSpec,
    probed: Option<std::result::Result<InputInfo, EngineStatus>>,
}

impl<'a> InputFacts<'a> {
    pub(crate) fn new(engine: &'a dyn MediaEngine, input: &'a InputSpec) -> Self {
        Self {
            engine,
            input,
            probed: None,
        }
    }

    fn probe(&mut self) -> std::result::Result<&InputInfo, &EngineStatus> {
        let engine = self.engine;
        let input: &'a InputSpec = self.input;
        let locator = &input.locator;
        self.probed
            .get_or_insert_with(|| {
                debug!(input = %locator, "probing input");
                engine.probe(locator)
            })
            .as_ref()
    }

    fn dimensions(&mut self) -> Result<(u32, u32)> {
        if let Some(dims) = self.input.dimensions {
            return Ok(dims);
        }
        if self.input.locator.is_pipe() {
            return Err(TranscodeError::new(
                ErrorKind::InvalidResolution,
                "pipe inputs cannot be probed; pass the input dimensions to aspect-fit",
            ));
        }
        self.probe()
            .map(|info| (info.width, info.height))
            .map_err(TranscodeError::from_status)
    }

    /// Best effort; the guard falls back to its absolute cap without it.
    fn duration(&mut self) -> Option<f64> {
        if self.input.locator.is_pipe() {
            return None;
        }
        match self.probe() {
            Ok(info) => info.duration,
            Err(status) => {
                debug!(%status, "duration unavailable for size guard");
                None
            }
        }
    }
}

impl From<&InputSpec> for EngineInput {
    fn from(input: &InputSpec) -> Self {
        Self {
            locator: input.locator.clone(),
            hwaccel: input.acceleration.accel,
            device: input.acceleration.device.clone(),
            transmuxing: input.transmuxing,
        }
    }
}

/// Join filter stages in their fixed order: framerate, scale, download.
pub fn filter_chain(fps: Option<String>, scale: String, download: bool) -> String {
    let mut stages: Vec<String> = Vec::with_capacity(3);
    stages.extend(fps);
    stages.push(scale);
    if download {
        stages.push(DOWNLOAD_FILTER.to_string());
    }
    stages.join(",")
}

pub(crate) fn build_output(
    index: usize,
    input: &InputSpec,
    output: &OutputSpec,
    facts: &mut InputFacts<'_>,
    guard: &SizeGuard,
) -> Result<EngineOutput> {
    output.clip.validate()?;

    let muxer = match ComponentOptions::explicit_name(output.muxer.as_ref()) {
        Some(name) => Some(name.to_string()),
        None if output.locator.is_pipe() => {
            return Err(TranscodeError::new(
                ErrorKind::InvalidInput,
                format!("output {index}: pipe destinations need an explicit muxer"),
            ));
        }
        None => None,
    };

    let video_override = ComponentOptions::explicit_name(output.video.as_ref())
        .or(input.transmuxing.then_some(ENCODER_COPY));
    let audio_encoder = ComponentOptions::explicit_name(output.audio.as_ref())
        .unwrap_or(if input.transmuxing {
            ENCODER_COPY
        } else {
            DEFAULT_AUDIO_ENCODER
        })
        .to_string();

    let profile = &output.profile;
    let mut record = EngineOutput {
        locator: output.locator.clone(),
        muxer,
        muxer_options: output.muxer.as_ref().map(|m| m.options.clone()),
        video_encoder: String::new(),
        video_options: output
            .video
            .as_ref()
            .map(|v| v.options.clone())
            .unwrap_or_default(),
        audio_encoder,
        audio_options: output
            .audio
            .as_ref()
            .map(|a| a.options.clone())
            .unwrap_or_default(),
        filters: None,
        width: 0,
        height: 0,
        bitrate: profile.bitrate,
        framerate: None,
        gop: profile.gop,
        codec_profile: profile.codec_profile,
        encode_accel: output.acceleration.accel,
        device: output.acceleration.device.clone(),
        frame_cap: None,
        clip_from: output.clip.from,
        clip_to: output.clip.to,
        calc_signature: output.calc_signature,
        detector: profile.detector.clone(),
    };

    if let Some(encoder) = video_override.filter(|name| profile::is_passthrough(name)) {
        record.video_encoder = encoder.to_string();
        record.frame_cap = guard.frame_cap(None, None);
        debug!(output = index, encoder, "passthrough video");
        return Ok(record);
    }

    let plan: AccelPlan =
        accel::resolve(&input.acceleration, &output.acceleration, profile.codec)
            .map_err(|err| prefix(index, err))?;

    let resolution: Resolution = profile
        .resolution
        .parse()
        .map_err(|err| prefix(index, err))?;
    let input_dims = if resolution.needs_input_dimensions() {
        Some(facts.dimensions().map_err(|err| prefix(index, err))?)
    } else {
        None
    };
    let (width, height) =
        profile::resolve_resolution(&profile.resolution, input_dims, plan.encode_accel)
            .map_err(|err| prefix(index, err))?;

    let target_fps = profile.target_fps();
    let duration = if guard.wants_duration(target_fps) {
        facts.duration()
    } else {
        None
    };

    record.video_encoder = video_override.unwrap_or(plan.encoder).to_string();
    record.filters = Some(filter_chain(
        profile.fps_filter(),
        plan.scale.render(width, height),
        plan.needs_download,
    ));
    record.width = width;
    record.height = height;
    record.framerate = target_fps.map(|_| (profile.framerate, profile.framerate_den.max(1)));
    record.encode_accel = plan.encode_accel;
    record.device = plan.device;
    record.frame_cap = guard.frame_cap(target_fps, duration);

    debug!(
        output = index,
        encoder = %record.video_encoder,
        filters = record.filters.as_deref().unwrap_or_default(),
        frame_cap = record.frame_cap,
        "built output parameters"
    );
    Ok(record)
}

fn prefix(index: usize, err: TranscodeError) -> TranscodeError {
    TranscodeError::with_code(
        err.kind(),
        err.code(),
        format!("output {index}: {}", err.description()),
    )
}
