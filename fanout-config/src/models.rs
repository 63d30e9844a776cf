use std::path::PathBuf;
use std::time::Duration;

use fanout_core::{FfmpegConfig, SizeGuard};

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub metadata: ConfigMetadata,
    pub ffmpeg: FfmpegConfig,
    pub retry: RetryConfig,
    pub guard: SizeGuard,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

/// Retry policy applied by front ends around one transcode request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub delay: Duration,
    /// Per-attempt limit; the session is stopped when it elapses.
    pub timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// ffmpeg style level name for `engine::init`.
    pub fn engine_log_level(&self) -> &'static str {
        match self.logging.level.to_ascii_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "warn" | "warning" => "warning",
            "error" => "error",
            "off" => "quiet",
            _ => "info",
        }
    }
}
