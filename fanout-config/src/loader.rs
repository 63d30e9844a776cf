use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::debug;

use fanout_core::{FfmpegConfig, SizeGuard};

use super::{
    models::{Config, ConfigMetadata, LoggingConfig, RetryConfig},
    sources::{EnvConfig, FileConfig},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("fanout.toml"),
        PathBuf::from("config/fanout.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

/// Loaded configuration plus non-fatal notes for the operator.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: Vec<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Layer defaults, the TOML file and the process environment (after
    /// `.env` has been applied). Environment values win.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        self.load_with_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Same as [`load`](Self::load) with an explicit environment snapshot.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let mut warnings = Vec::new();
        if config_path.is_none() {
            warnings.push("no fanout.toml found; using environment and defaults".to_string());
        }
        let metadata = ConfigMetadata {
            config_path,
            env_file_loaded,
        };
        let config = compose_config(file_config.unwrap_or_default(), env, metadata, &mut warnings)?;
        debug!(?config, "configuration loaded");
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let Some(path) = resolve_config_path(
            self.options.config_path.as_deref(),
            env_config.config_path.as_deref(),
        )?
        else {
            return Ok((None, None));
        };
        let file_config = read_file_config(&path)?;
        Ok((Some(file_config), Some(path)))
    }
}

/// `--config`, then `FANOUT_CONFIG`, then the first default location that
/// exists. A file asked for by name must exist.
fn resolve_config_path(
    explicit: Option<&Path>,
    from_env: Option<&Path>,
) -> Result<Option<PathBuf>, ConfigLoadError> {
    match explicit.or(from_env) {
        Some(path) if path.exists() => Ok(Some(path.to_path_buf())),
        Some(path) => Err(ConfigLoadError::MissingConfig {
            path: path.to_path_buf(),
        }),
        None => Ok(DEFAULT_CONFIG_LOCATIONS
            .iter()
            .find(|candidate| candidate.exists())
            .cloned()),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|err| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source: err,
    })?;
    toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source: err,
    })
}

fn compose_config(
    file: FileConfig,
    env: EnvConfig,
    metadata: ConfigMetadata,
    warnings: &mut Vec<String>,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        ffmpeg: file_ffmpeg,
        retry: file_retry,
        guard: file_guard,
        logging: file_logging,
    } = file;

    let defaults = FfmpegConfig::default();
    let ffmpeg = FfmpegConfig {
        ffmpeg_path: env
            .ffmpeg_path
            .or(file_ffmpeg.ffmpeg_path)
            .unwrap_or(defaults.ffmpeg_path),
        ffprobe_path: env
            .ffprobe_path
            .or(file_ffmpeg.ffprobe_path)
            .unwrap_or(defaults.ffprobe_path),
    };

    let retry_defaults = RetryConfig::default();
    let max_attempts = env
        .max_attempts
        .or(file_retry.max_attempts)
        .unwrap_or(retry_defaults.max_attempts);
    if max_attempts == 0 {
        return Err(ConfigLoadError::Invalid {
            field: "retry.max_attempts",
            reason: "must be at least 1".to_string(),
        });
    }
    let delay = match env.retry_delay.or(file_retry.delay) {
        Some(raw) => parse_duration("retry.delay", &raw)?,
        None => retry_defaults.delay,
    };
    let timeout = match env.timeout.or(file_retry.timeout) {
        Some(raw) => Some(parse_duration("retry.timeout", &raw)?),
        None => None,
    };
    if timeout == Some(Duration::ZERO) {
        return Err(ConfigLoadError::Invalid {
            field: "retry.timeout",
            reason: "must be greater than zero".to_string(),
        });
    }

    let guard_defaults = SizeGuard::default();
    let max_duplication = env
        .max_duplication
        .or(file_guard.max_duplication)
        .unwrap_or(guard_defaults.max_duplication);
    if !max_duplication.is_finite() || max_duplication < 0.0 {
        return Err(ConfigLoadError::Invalid {
            field: "guard.max_duplication",
            reason: format!("{max_duplication} is not a non-negative ratio"),
        });
    }
    if max_duplication > 0.0 && max_duplication < 1.0 {
        warnings.push(format!(
            "guard.max_duplication = {max_duplication} caps outputs below the input frame count"
        ));
    }
    let guard = SizeGuard {
        max_duplication,
        frame_cap: env.frame_cap.or(file_guard.frame_cap).filter(|cap| *cap > 0),
    };

    let logging = LoggingConfig {
        level: env
            .log_level
            .or(file_logging.level)
            .unwrap_or_else(|| LoggingConfig::default().level),
    };

    Ok(Config {
        metadata,
        ffmpeg,
        retry: RetryConfig {
            max_attempts,
            delay,
            timeout,
        },
        guard,
        logging,
    })
}

fn parse_duration(field: &'static str, raw: &str) -> Result<Duration, ConfigLoadError> {
    humantime::parse_duration(raw.trim()).map_err(|source| ConfigLoadError::Duration {
        field,
        value: raw.to_string(),
        source,
    })
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration '{value}' for {field}")]
    Duration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compose(file: FileConfig, env: EnvConfig) -> Result<Config, ConfigLoadError> {
        compose_config(file, env, ConfigMetadata::default(), &mut Vec::new())
    }

    #[test]
    fn defaults_apply_without_sources() {
        let config = compose(FileConfig::default(), EnvConfig::default()).unwrap();
        assert_eq!(config.ffmpeg, FfmpegConfig::default());
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.guard, SizeGuard::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn environment_overrides_file() {
        let mut file = FileConfig::default();
        file.ffmpeg.ffmpeg_path = Some(PathBuf::from("/usr/bin/ffmpeg"));
        file.retry.max_attempts = Some(5);
        file.retry.delay = Some("2s".to_string());
        let env = EnvConfig {
            ffmpeg_path: Some(PathBuf::from("/opt/ffmpeg")),
            retry_delay: Some("250ms".to_string()),
            ..EnvConfig::default()
        };
        let config = compose(file, env).unwrap();
        assert_eq!(config.ffmpeg.ffmpeg_path, PathBuf::from("/opt/ffmpeg"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay, Duration::from_millis(250));
    }

    #[test]
    fn rejects_bad_values() {
        let env = EnvConfig {
            timeout: Some("soon".to_string()),
            ..EnvConfig::default()
        };
        assert!(matches!(
            compose(FileConfig::default(), env),
            Err(ConfigLoadError::Duration { field: "retry.timeout", .. })
        ));

        let env = EnvConfig {
            max_attempts: Some(0),
            ..EnvConfig::default()
        };
        assert!(matches!(
            compose(FileConfig::default(), env),
            Err(ConfigLoadError::Invalid { field: "retry.max_attempts", .. })
        ));

        let mut file = FileConfig::default();
        file.guard.max_duplication = Some(-1.0);
        assert!(matches!(
            compose(file, EnvConfig::default()),
            Err(ConfigLoadError::Invalid { field: "guard.max_duplication", .. })
        ));
    }

    #[test]
    fn named_config_path_wins_and_must_exist() {
        let dir = tempfile::TempDir::new().unwrap();
        let present = dir.path().join("present.toml");
        fs::write(&present, "").unwrap();
        let absent = dir.path().join("absent.toml");

        assert_eq!(
            resolve_config_path(Some(present.as_path()), Some(absent.as_path())).unwrap(),
            Some(present.clone())
        );
        assert_eq!(
            resolve_config_path(None, Some(present.as_path())).unwrap(),
            Some(present)
        );
        assert!(matches!(
            resolve_config_path(Some(absent.as_path()), None),
            Err(ConfigLoadError::MissingConfig { path }) if path == absent
        ));
    }

    #[test]
    fn zero_frame_cap_means_unset() {
        let env = EnvConfig {
            frame_cap: Some(0),
            ..EnvConfig::default()
        };
        assert_eq!(compose(FileConfig::default(), env).unwrap().guard.frame_cap, None);
    }
}
