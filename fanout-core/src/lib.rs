//! Transcoding session orchestration.
//!
//! `fanout-core` takes one decode request and up to ten rendition requests,
//! negotiates hardware acceleration across the decode and encode stages, and
//! hands a single fan-out call to a [`MediaEngine`]. Engine failures come back
//! as typed [`TranscodeError`]s that say whether a retry can help.
//!
//! ```no_run
//! use std::sync::Arc;
//! use fanout_core::{FfmpegEngine, InputSpec, OutputSpec, Session, renditions};
//!
//! # fn main() -> Result<(), fanout_core::TranscodeError> {
//! let session = Session::new(Arc::new(FfmpegEngine::default()))?;
//! let profile = renditions::lookup("P720p30fps16x9").expect("known rendition");
//! let result = session.transcode(
//!     &InputSpec::new("in.mp4"),
//!     &[OutputSpec::new("out_720.mp4", profile)],
//! )?;
//! println!("decoded {} frames", result.decoded.frames);
//! session.stop();
//! # Ok(())
//! # }
//! ```

pub mod accel;
pub mod detector;
pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod guard;
pub mod params;
#[cfg(unix)]
pub mod piped;
pub mod profile;
pub mod renditions;
pub mod session;
pub mod signature;
pub mod types;

pub use accel::{Accel, AccelPlan, Acceleration};
pub use detector::{DetectionScores, DetectorProfile};
pub use engine::{
    EngineInput, EngineOutput, EngineReport, EngineSettings, EngineStatus, HandleId, InputInfo,
    MAX_OUTPUTS, MediaEngine,
};
pub use error::{ErrorKind, Result, TranscodeError};
pub use ffmpeg::{FfmpegConfig, FfmpegEngine};
pub use guard::SizeGuard;
#[cfg(unix)]
pub use piped::{PipeReader, PipeWriter, PipedTranscoder};
pub use profile::{CodecProfile, GopPolicy, RenditionProfile, Resolution, VideoCodec};
pub use session::Session;
pub use signature::{compare_signature_buffers, compare_signature_files};
pub use types::{
    ClipRange, ComponentOptions, EncodedOutput, InputSpec, Locator, MediaCounters, OutputSpec,
    TranscodeResult,
};
