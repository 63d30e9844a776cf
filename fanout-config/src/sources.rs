use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub ffmpeg: FileFfmpegConfig,
    #[serde(default)]
    pub retry: FileRetryConfig,
    #[serde(default)]
    pub guard: FileGuardConfig,
    #[serde(default)]
    pub logging: FileLoggingConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileFfmpegConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffprobe_path: Option<PathBuf>,
}

/// Durations are humantime strings such as `"500ms"` or `"10m"`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRetryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileGuardConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duplication: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_cap: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub max_attempts: Option<u32>,
    pub retry_delay: Option<String>,
    pub timeout: Option<String>,
    pub max_duplication: Option<f64>,
    pub frame_cap: Option<u64>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let mut env_config = Self::default();

        env_config.config_path = get("FANOUT_CONFIG").map(PathBuf::from);
        env_config.ffmpeg_path = get("FFMPEG_PATH").map(PathBuf::from);
        env_config.ffprobe_path = get("FFPROBE_PATH").map(PathBuf::from);
        env_config.log_level = get("FANOUT_LOG_LEVEL");
        env_config.max_attempts = get("FANOUT_MAX_ATTEMPTS").and_then(|s| s.trim().parse().ok());
        env_config.retry_delay = get("FANOUT_RETRY_DELAY");
        env_config.timeout = get("FANOUT_TIMEOUT");
        env_config.max_duplication =
            get("FANOUT_MAX_DUPLICATION").and_then(|s| s.trim().parse().ok());
        env_config.frame_cap = get("FANOUT_FRAME_CAP").and_then(|s| s.trim().parse().ok());

        env_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_ignores_blank_and_malformed_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg"),
            ("FANOUT_MAX_ATTEMPTS", "five"),
            ("FANOUT_LOG_LEVEL", "  "),
            ("FANOUT_FRAME_CAP", "90000"),
        ]);
        let env = EnvConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(env.ffmpeg_path, Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg")));
        assert_eq!(env.max_attempts, None);
        assert_eq!(env.log_level, None);
        assert_eq!(env.frame_cap, Some(90_000));
    }

    #[test]
    fn file_sections_are_optional() {
        let parsed: FileConfig = toml::from_str("[retry]\nmax_attempts = 4\n").unwrap();
        assert_eq!(parsed.retry.max_attempts, Some(4));
        assert!(parsed.ffmpeg.ffmpeg_path.is_none());
        assert!(parsed.guard.frame_cap.is_none());
    }
}
