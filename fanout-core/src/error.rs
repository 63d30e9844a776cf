//! Closed error taxonomy, native status codes and retryability rules.
//!
//! Every failure a [`Session`](crate::session::Session) reports is a
//! [`TranscodeError`]: a kind from the closed [`ErrorKind`] set, the native
//! code that produced it and a human readable description. Engine status codes
//! are translated through a process-wide [`ErrorTable`] that is built once and
//! never mutated afterwards.

use std::collections::{HashMap, HashSet};
use std::fmt;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineStatus;

/// Native status codes understood by the classifier.
///
/// Negative values are codec-library errors (errno values and four character
/// tags in the libav style). Positive values are orchestrator conditions.
pub mod codes {
    const fn fferrtag(a: u8, b: u8, c: u8, d: u8) -> i32 {
        -((a as i32) | ((b as i32) << 8) | ((c as i32) << 16) | ((d as i32) << 24))
    }

    pub const OK: i32 = 0;

    pub const ENOENT: i32 = -2;
    pub const EIO: i32 = -5;
    pub const ENOMEM: i32 = -12;
    pub const EACCES: i32 = -13;
    pub const EINVAL: i32 = -22;
    pub const EPIPE: i32 = -32;

    pub const AVERROR_BSF_NOT_FOUND: i32 = fferrtag(0xF8, b'B', b'S', b'F');
    pub const AVERROR_DECODER_NOT_FOUND: i32 = fferrtag(0xF8, b'D', b'E', b'C');
    pub const AVERROR_DEMUXER_NOT_FOUND: i32 = fferrtag(0xF8, b'D', b'E', b'M');
    pub const AVERROR_ENCODER_NOT_FOUND: i32 = fferrtag(0xF8, b'E', b'N', b'C');
    pub const AVERROR_EOF: i32 = fferrtag(b'E', b'O', b'F', b' ');
    pub const AVERROR_EXIT: i32 = fferrtag(b'E', b'X', b'I', b'T');
    pub const AVERROR_EXTERNAL: i32 = fferrtag(b'E', b'X', b'T', b' ');
    pub const AVERROR_FILTER_NOT_FOUND: i32 = fferrtag(0xF8, b'F', b'I', b'L');
    pub const AVERROR_INVALIDDATA: i32 = fferrtag(b'I', b'N', b'D', b'A');
    pub const AVERROR_MUXER_NOT_FOUND: i32 = fferrtag(0xF8, b'M', b'U', b'X');
    pub const AVERROR_OPTION_NOT_FOUND: i32 = fferrtag(0xF8, b'O', b'P', b'T');
    pub const AVERROR_UNKNOWN: i32 = fferrtag(b'U', b'N', b'K', b'N');

    pub const UNSUPPORTED_PIXEL_FORMAT: i32 = 1;
    pub const FILTER_GRAPH_INIT: i32 = 2;
    pub const TOO_MANY_OUTPUTS: i32 = 3;
    pub const NO_INPUT_CONFIGURATION: i32 = 4;
    pub const UNSUPPORTED_INPUT_CODEC: i32 = 5;
    pub const NO_KEYFRAME_IN_INPUT: i32 = 6;
    pub const UNRECOVERABLE_STATE: i32 = 7;
    pub const OUTPUT_SIZE_LIMIT: i32 = 8;
    pub const SESSION_STOPPED: i32 = 9;
    pub const INVALID_INPUT: i32 = 10;
    pub const INVALID_RESOLUTION: i32 = 11;
    pub const INVALID_HARDWARE: i32 = 12;
}

/// Textual codec-library reasons that make an engine failure non-retryable.
pub const NON_RETRYABLE_REASONS: &[&str] = &[
    "decoder not found",
    "demuxer not found",
    "encoder not found",
    "muxer not found",
    "option not found",
    "invalid argument",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    SessionStopped,
    InvalidInput,
    InvalidResolution,
    InvalidHardware,
    TooManyOutputs,
    NoInputConfiguration,
    UnsupportedInputCodec,
    UnsupportedInputPixelFormat,
    NoKeyframeInInput,
    FilterGraphInitFailure,
    UnrecoverableState,
    OutputSizeLimitExceeded,
    /// Anything the engine reports that has no dedicated kind.
    Engine,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStopped => "session_stopped",
            Self::InvalidInput => "invalid_input",
            Self::InvalidResolution => "invalid_resolution",
            Self::InvalidHardware => "invalid_hardware",
            Self::TooManyOutputs => "too_many_outputs",
            Self::NoInputConfiguration => "no_input_configuration",
            Self::UnsupportedInputCodec => "unsupported_input_codec",
            Self::UnsupportedInputPixelFormat => "unsupported_input_pixel_format",
            Self::NoKeyframeInInput => "no_keyframe_in_input",
            Self::FilterGraphInitFailure => "filter_graph_init_failure",
            Self::UnrecoverableState => "unrecoverable_state",
            Self::OutputSizeLimitExceeded => "output_size_limit_exceeded",
            Self::Engine => "engine_error",
        }
    }

    /// Native code used when the orchestrator raises this kind itself.
    pub fn native_code(&self) -> i32 {
        match self {
            Self::SessionStopped => codes::SESSION_STOPPED,
            Self::InvalidInput => codes::INVALID_INPUT,
            Self::InvalidResolution => codes::INVALID_RESOLUTION,
            Self::InvalidHardware => codes::INVALID_HARDWARE,
            Self::TooManyOutputs => codes::TOO_MANY_OUTPUTS,
            Self::NoInputConfiguration => codes::NO_INPUT_CONFIGURATION,
            Self::UnsupportedInputCodec => codes::UNSUPPORTED_INPUT_CODEC,
            Self::UnsupportedInputPixelFormat => codes::UNSUPPORTED_PIXEL_FORMAT,
            Self::NoKeyframeInInput => codes::NO_KEYFRAME_IN_INPUT,
            Self::FilterGraphInitFailure => codes::FILTER_GRAPH_INIT,
            Self::UnrecoverableState => codes::UNRECOVERABLE_STATE,
            Self::OutputSizeLimitExceeded => codes::OUTPUT_SIZE_LIMIT,
            Self::Engine => codes::AVERROR_UNKNOWN,
        }
    }

    /// Kinds that will fail again no matter how often they are retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidInput
                | Self::InvalidResolution
                | Self::InvalidHardware
                | Self::TooManyOutputs
                | Self::NoInputConfiguration
                | Self::UnsupportedInputCodec
                | Self::UnsupportedInputPixelFormat
                | Self::NoKeyframeInInput
                | Self::OutputSizeLimitExceeded
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable error record returned by every fallible orchestrator operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {description} (code {code})")]
pub struct TranscodeError {
    kind: ErrorKind,
    code: i32,
    description: String,
}

impl TranscodeError {
    /// Error raised by the orchestrator itself, carrying the kind's own code.
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.native_code(),
            description: description.into(),
        }
    }

    pub fn with_code(kind: ErrorKind, code: i32, description: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            description: description.into(),
        }
    }

    pub fn session_stopped() -> Self {
        Self::new(ErrorKind::SessionStopped, "transcoder stopped")
    }

    /// Classify a non-zero engine status through the process-wide table.
    pub fn from_status(status: &EngineStatus) -> Self {
        error_table().classify(status)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_retryable(&self) -> bool {
        error_table().is_retryable(self)
    }

    /// After this error no session in the process should be reused.
    pub fn is_process_fatal(&self) -> bool {
        self.kind == ErrorKind::UnrecoverableState
    }
}

pub type Result<T> = std::result::Result<T, TranscodeError>;

#[derive(Debug, Clone, Copy)]
struct TableEntry {
    kind: ErrorKind,
    description: &'static str,
}

/// Read-only mapping from native codes to taxonomy entries.
#[derive(Debug)]
pub struct ErrorTable {
    entries: HashMap<i32, TableEntry>,
    non_retryable_codes: HashSet<i32>,
}

static ERROR_TABLE: OnceCell<ErrorTable> = OnceCell::new();

/// The process-wide table, built on first use.
pub fn error_table() -> &'static ErrorTable {
    ERROR_TABLE.get_or_init(ErrorTable::build)
}

impl ErrorTable {
    fn build() -> Self {
        use codes::*;

        let rows: &[(i32, ErrorKind, &'static str)] = &[
            (ENOENT, ErrorKind::Engine, "No such file or directory"),
            (EIO, ErrorKind::Engine, "I/O error"),
            (ENOMEM, ErrorKind::Engine, "Cannot allocate memory"),
            (EACCES, ErrorKind::Engine, "Permission denied"),
            (EINVAL, ErrorKind::Engine, "Invalid argument"),
            (EPIPE, ErrorKind::Engine, "Broken pipe"),
            (AVERROR_BSF_NOT_FOUND, ErrorKind::Engine, "Bitstream filter not found"),
            (AVERROR_DECODER_NOT_FOUND, ErrorKind::Engine, "Decoder not found"),
            (AVERROR_DEMUXER_NOT_FOUND, ErrorKind::Engine, "Demuxer not found"),
            (AVERROR_ENCODER_NOT_FOUND, ErrorKind::Engine, "Encoder not found"),
            (AVERROR_EOF, ErrorKind::Engine, "End of file"),
            (AVERROR_EXIT, ErrorKind::Engine, "Immediate exit requested"),
            (AVERROR_EXTERNAL, ErrorKind::Engine, "Generic error in an external library"),
            (AVERROR_FILTER_NOT_FOUND, ErrorKind::Engine, "Filter not found"),
            (
                AVERROR_INVALIDDATA,
                ErrorKind::Engine,
                "Invalid data found when processing input",
            ),
            (AVERROR_MUXER_NOT_FOUND, ErrorKind::Engine, "Muxer not found"),
            (AVERROR_OPTION_NOT_FOUND, ErrorKind::Engine, "Option not found"),
            (AVERROR_UNKNOWN, ErrorKind::Engine, "Unknown error occurred"),
            (
                UNSUPPORTED_PIXEL_FORMAT,
                ErrorKind::UnsupportedInputPixelFormat,
                "Unsupported input pixel format",
            ),
            (
                FILTER_GRAPH_INIT,
                ErrorKind::FilterGraphInitFailure,
                "Error initializing filtergraph",
            ),
            (TOO_MANY_OUTPUTS, ErrorKind::TooManyOutputs, "Too many outputs"),
            (
                NO_INPUT_CONFIGURATION,
                ErrorKind::NoInputConfiguration,
                "No input configuration",
            ),
            (
                UNSUPPORTED_INPUT_CODEC,
                ErrorKind::UnsupportedInputCodec,
                "Unsupported input codec",
            ),
            (
                NO_KEYFRAME_IN_INPUT,
                ErrorKind::NoKeyframeInInput,
                "No keyframes in input",
            ),
            (
                UNRECOVERABLE_STATE,
                ErrorKind::UnrecoverableState,
                "Unrecoverable state, restart process",
            ),
            (
                OUTPUT_SIZE_LIMIT,
                ErrorKind::OutputSizeLimitExceeded,
                "Output exceeded its size limit",
            ),
            (SESSION_STOPPED, ErrorKind::SessionStopped, "Transcoder stopped"),
            (INVALID_INPUT, ErrorKind::InvalidInput, "Invalid input"),
            (INVALID_RESOLUTION, ErrorKind::InvalidResolution, "Invalid resolution"),
            (INVALID_HARDWARE, ErrorKind::InvalidHardware, "Invalid hardware selection"),
        ];

        let entries = rows
            .iter()
            .map(|&(code, kind, description)| (code, TableEntry { kind, description }))
            .collect();

        let non_retryable_codes = [
            AVERROR_DECODER_NOT_FOUND,
            AVERROR_DEMUXER_NOT_FOUND,
            AVERROR_ENCODER_NOT_FOUND,
            AVERROR_MUXER_NOT_FOUND,
            AVERROR_OPTION_NOT_FOUND,
            EINVAL,
        ]
        .into_iter()
        .collect();

        Self {
            entries,
            non_retryable_codes,
        }
    }

    pub fn classify(&self, status: &EngineStatus) -> TranscodeError {
        let message = status.message.trim();
        match self.entries.get(&status.code) {
            Some(entry) => {
                let description = if message.is_empty() || message == entry.description {
                    entry.description.to_string()
                } else {
                    format!("{}: {}", entry.description, message)
                };
                TranscodeError::with_code(entry.kind, status.code, description)
            }
            None => {
                let description = if message.is_empty() {
                    format!("engine error {}", status.code)
                } else {
                    message.to_string()
                };
                TranscodeError::with_code(ErrorKind::Engine, status.code, description)
            }
        }
    }

    pub fn is_retryable(&self, error: &TranscodeError) -> bool {
        if !error.kind.is_retryable() || self.non_retryable_codes.contains(&error.code) {
            return false;
        }
        let description = error.description.to_ascii_lowercase();
        !NON_RETRYABLE_REASONS
            .iter()
            .any(|reason| description.contains(reason))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build the table eagerly; called from [`crate::engine::init`].
pub(crate) fn install_error_table() -> &'static ErrorTable {
    error_table()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: i32, message: &str) -> EngineStatus {
        EngineStatus::new(code, message)
    }

    #[test]
    fn fferrtag_values_match_libav() {
        assert_eq!(codes::AVERROR_INVALIDDATA, -1_094_995_529);
        assert_eq!(codes::AVERROR_EOF, -541_478_725);
        assert_eq!(codes::AVERROR_DECODER_NOT_FOUND, -1_128_613_112);
    }

    #[test]
    fn orchestrator_codes_map_to_named_kinds() {
        let table = error_table();
        let cases = [
            (codes::UNSUPPORTED_PIXEL_FORMAT, ErrorKind::UnsupportedInputPixelFormat),
            (codes::FILTER_GRAPH_INIT, ErrorKind::FilterGraphInitFailure),
            (codes::TOO_MANY_OUTPUTS, ErrorKind::TooManyOutputs),
            (codes::NO_INPUT_CONFIGURATION, ErrorKind::NoInputConfiguration),
            (codes::UNSUPPORTED_INPUT_CODEC, ErrorKind::UnsupportedInputCodec),
            (codes::NO_KEYFRAME_IN_INPUT, ErrorKind::NoKeyframeInInput),
            (codes::UNRECOVERABLE_STATE, ErrorKind::UnrecoverableState),
            (codes::OUTPUT_SIZE_LIMIT, ErrorKind::OutputSizeLimitExceeded),
        ];
        for (code, kind) in cases {
            assert_eq!(table.classify(&status(code, "")).kind(), kind, "code {code}");
        }
    }

    #[test]
    fn unknown_codes_pass_through_as_engine_errors() {
        let err = TranscodeError::from_status(&status(-9999, "exploded"));
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert_eq!(err.code(), -9999);
        assert_eq!(err.description(), "exploded");
        assert!(err.is_retryable());
    }

    #[test]
    fn missing_file_is_a_retryable_engine_error() {
        let err = TranscodeError::from_status(&status(codes::ENOENT, "in.ts"));
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert_eq!(err.description(), "No such file or directory: in.ts");
        assert!(err.is_retryable());
    }

    #[test]
    fn not_found_codes_are_not_retryable() {
        for code in [
            codes::AVERROR_DECODER_NOT_FOUND,
            codes::AVERROR_MUXER_NOT_FOUND,
            codes::AVERROR_OPTION_NOT_FOUND,
            codes::EINVAL,
        ] {
            assert!(!TranscodeError::from_status(&status(code, "")).is_retryable());
        }
    }

    #[test]
    fn textual_reasons_are_not_retryable() {
        let err = TranscodeError::from_status(&status(-1, "Unknown encoder: Encoder not found"));
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert!(!err.is_retryable());
    }

    #[test]
    fn precondition_kinds_follow_retry_policy() {
        assert!(!TranscodeError::new(ErrorKind::TooManyOutputs, "11 outputs").is_retryable());
        assert!(!TranscodeError::new(ErrorKind::InvalidInput, "empty").is_retryable());
        assert!(TranscodeError::session_stopped().is_retryable());
        assert!(TranscodeError::new(ErrorKind::FilterGraphInitFailure, "gpu").is_retryable());
    }

    #[test]
    fn unrecoverable_state_is_process_fatal() {
        let err = TranscodeError::from_status(&status(codes::UNRECOVERABLE_STATE, ""));
        assert!(err.is_process_fatal());
        assert!(err.is_retryable());
        assert!(!TranscodeError::session_stopped().is_process_fatal());
    }
}
