mod cli;
mod runner;

use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use fanout_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use fanout_core::engine::{self, EngineSettings};
use fanout_core::{
    Acceleration, ComponentOptions, FfmpegEngine, InputSpec, Locator, MediaEngine, OutputSpec,
    RenditionProfile, compare_signature_files, renditions,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command, TranscodeArgs};
use crate::runner::{Request, Runner};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let ConfigLoad {
        mut config,
        warnings,
    } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    for warning in &warnings {
        warn!(message = %warning, "configuration warning");
    }

    engine::init(EngineSettings {
        log_level: config.engine_log_level().to_string(),
        detector: None,
    });
    let outcome = match cli.command {
        Command::Transcode(args) => {
            if let Some(max_attempts) = args.max_attempts {
                config.retry.max_attempts = max_attempts;
            }
            if let Some(timeout) = args.timeout {
                config.retry.timeout = Some(timeout);
            }
            transcode(&config, args)
        }
        Command::Renditions { json } => list_renditions(json),
        Command::Probe { input } => probe(&config, input),
        Command::Compare { first, second } => compare(&config, first, second),
    };
    engine::deinit();
    outcome
}

fn transcode(config: &Config, args: TranscodeArgs) -> Result<ExitCode> {
    let profiles = load_profiles(&args)?;
    if profiles.len() != args.outputs.len() {
        bail!(
            "{} outputs given for {} renditions; pass one --output per rendition",
            args.outputs.len(),
            profiles.len()
        );
    }

    let mut input = InputSpec::new(args.input.clone())
        .with_acceleration(Acceleration::new(args.hwaccel, args.device.clone()));
    if let Some((width, height)) = args.input_size {
        input = input.with_dimensions(width, height);
    }
    if args.transmux {
        input = input.transmuxing();
    }

    let encode = args.encode_hwaccel.map(|accel| {
        Acceleration::new(accel, args.encode_device.clone().unwrap_or_default())
    });
    let outputs = args
        .outputs
        .iter()
        .zip(profiles)
        .map(|(path, profile)| {
            let mut output = OutputSpec::new(path.clone(), profile);
            if let Some(acceleration) = &encode {
                output = output.with_acceleration(acceleration.clone());
            }
            if let Some(muxer) = &args.muxer {
                output = output.with_muxer(ComponentOptions::named(muxer));
            }
            if let Some(video) = &args.video_encoder {
                output = output.with_video_encoder(ComponentOptions::named(video));
            }
            if let Some(audio) = &args.audio_encoder {
                output = output.with_audio_encoder(ComponentOptions::named(audio));
            }
            if args.signature {
                output = output.with_signature();
            }
            if args.from.is_some() || args.to.is_some() {
                output = output.with_clip(args.from, args.to);
            }
            output
        })
        .collect();

    let engine: Arc<dyn MediaEngine> = Arc::new(FfmpegEngine::new(config.ffmpeg.clone()));
    let runner = Runner::new(engine, config.guard, config.retry);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let result = runtime
        .block_on(runner.run(Request { input, outputs }))
        .context("transcode failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(ExitCode::SUCCESS)
}

fn load_profiles(args: &TranscodeArgs) -> Result<Vec<RenditionProfile>> {
    if let Some(path) = &args.profiles_json {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        return renditions::parse_profiles_json(&json)
            .with_context(|| format!("invalid profiles in {}", path.display()));
    }
    match &args.profiles {
        Some(names) => renditions::lookup_all(names).context("invalid --profiles"),
        None => bail!("pass --profiles or --profiles-json"),
    }
}

fn list_renditions(json: bool) -> Result<ExitCode> {
    if json {
        let profiles: Vec<RenditionProfile> =
            renditions::names().filter_map(renditions::lookup).collect();
        println!("{}", serde_json::to_string_pretty(&profiles)?);
    } else {
        for name in renditions::names() {
            println!("{name}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn probe(config: &Config, input: std::path::PathBuf) -> Result<ExitCode> {
    let engine = FfmpegEngine::new(config.ffmpeg.clone());
    let info = engine
        .probe(&Locator::from(input.clone()))
        .map_err(|status| fanout_core::TranscodeError::from_status(&status))
        .with_context(|| format!("failed to probe {}", input.display()))?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(ExitCode::SUCCESS)
}

fn compare(
    config: &Config,
    first: std::path::PathBuf,
    second: std::path::PathBuf,
) -> Result<ExitCode> {
    let engine = FfmpegEngine::new(config.ffmpeg.clone());
    let same = compare_signature_files(&engine, &first, &second)
        .context("failed to compare signatures")?;
    if same {
        println!("match");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("differ");
        Ok(ExitCode::from(1))
    }
}
