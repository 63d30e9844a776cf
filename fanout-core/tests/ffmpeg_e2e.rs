//! Runs against a real ffmpeg on PATH. Enable with `--features e2e`.
#![cfg(feature = "e2e")]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use fanout_core::error::codes;
use fanout_core::{
    Accel, Acceleration, ComponentOptions, ErrorKind, FfmpegEngine, InputSpec, OutputSpec,
    RenditionProfile, Session, compare_signature_files, renditions,
};
use tempfile::TempDir;

fn sample_input(dir: &Path) -> PathBuf {
    let path = dir.join("testsrc.mp4");
    let status = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-y"])
        .args(["-f", "lavfi", "-i", "testsrc=size=640x360:rate=30:duration=2"])
        .args(["-f", "lavfi", "-i", "sine=frequency=440:duration=2"])
        .args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-c:a", "aac", "-shortest"])
        .arg(&path)
        .status()
        .expect("ffmpeg on PATH");
    assert!(status.success(), "could not generate sample input");
    path
}

fn drop_to_null() -> OutputSpec {
    OutputSpec::new("-", RenditionProfile::new("null", "", 0))
        .with_muxer(ComponentOptions::named("null"))
        .with_video_encoder(ComponentOptions::named("drop"))
        .with_audio_encoder(ComponentOptions::named("drop"))
}

#[test]
fn missing_input_then_valid_input_on_one_session() {
    let dir = TempDir::new().unwrap();
    let input = sample_input(dir.path());
    let session = Session::new(Arc::new(FfmpegEngine::default())).unwrap();

    let err = session
        .transcode(&InputSpec::new("/nonexistent/missing.ts"), &[drop_to_null()])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Engine);
    assert_eq!(err.code(), codes::ENOENT);
    assert!(err.is_retryable());

    let result = session
        .transcode(&InputSpec::new(input), &[drop_to_null()])
        .unwrap();
    assert_eq!(result.encoded.len(), 1);
    assert_eq!(result.encoded[0].counters.frames, 0);
}

#[test]
fn renditions_and_signatures() {
    let dir = TempDir::new().unwrap();
    let input = sample_input(dir.path());
    let session = Session::new(Arc::new(FfmpegEngine::default())).unwrap();

    let low = renditions::lookup("P144p30fps16x9").unwrap();
    let first = dir.path().join("a.mp4");
    let second = dir.path().join("b.mp4");
    let outputs = [
        OutputSpec::new(first.clone(), low.clone()).with_signature(),
        OutputSpec::new(second.clone(), low).with_signature(),
    ];
    let result = session.transcode(&InputSpec::new(input), &outputs).unwrap();

    assert_eq!(result.decoded.frames, 60);
    assert_eq!(result.encoded.len(), 2);
    for encoded in &result.encoded {
        assert_eq!(encoded.counters.frames, 60);
        assert_eq!(encoded.counters.pixels, 60 * 256 * 144);
    }

    let engine = FfmpegEngine::default();
    let same = compare_signature_files(
        &engine,
        outputs[0].signature_path(),
        outputs[1].signature_path(),
    )
    .unwrap();
    assert!(same);
}

#[test]
fn nvidia_across_devices_is_rejected() {
    let session = Session::new(Arc::new(FfmpegEngine::default())).unwrap();
    let input = InputSpec::new("in.mp4").with_acceleration(Acceleration::new(Accel::Nvidia, "0"));
    let output = OutputSpec::new("out.mp4", RenditionProfile::new("720p", "1280x720", 1_000_000))
        .with_acceleration(Acceleration::new(Accel::Nvidia, "1"));

    let err = session.transcode(&input, &[output]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidHardware);
}

#[test]
fn aspect_fit_uses_probed_dimensions() {
    let dir = TempDir::new().unwrap();
    let input = sample_input(dir.path());
    let session = Session::new(Arc::new(FfmpegEngine::default())).unwrap();

    let out = dir.path().join("fit.mp4");
    let profile = RenditionProfile::new("fit", "autox180", 300_000);
    let result = session
        .transcode(&InputSpec::new(input), &[OutputSpec::new(out, profile)])
        .unwrap();
    assert_eq!(result.encoded[0].counters.pixels, result.encoded[0].counters.frames * 320 * 180);
}
