//! Process-backed [`MediaEngine`] driving the `ffmpeg` and `ffprobe` binaries.
//!
//! Each [`HandleId`] maps to a slot in a concurrent handle table holding the
//! timestamp continuity state of one session and the pid of the child that is
//! currently running for it. Closing a slot kills that child.

mod command;
mod probe;
pub mod stats;

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::Child;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::engine::{
    EngineInput, EngineOutput, EngineReport, EngineStatus, HandleId, InputInfo, MAX_OUTPUTS,
    MediaEngine,
};
use crate::error::codes;
use crate::types::{EncodedOutput, Locator, MediaCounters};

/// Percentage of fingerprint bits that must agree for two signatures to match.
pub const SIGNATURE_MATCH_PERCENT: u64 = 95;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfmpegConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    /// Seconds added to every output timestamp.
    ts_offset: f64,
    /// End of the previous call's output timeline.
    last_end: Option<f64>,
    pending_discontinuity: bool,
    running_pid: Option<u32>,
}

#[derive(Debug)]
pub struct FfmpegEngine {
    config: FfmpegConfig,
    slots: DashMap<HandleId, Slot>,
    next_handle: AtomicU64,
}

impl FfmpegEngine {
    pub fn new(config: FfmpegConfig) -> Self {
        Self {
            config,
            slots: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Sessions currently holding a slot.
    pub fn open_handles(&self) -> usize {
        self.slots.len()
    }

    fn unknown_handle(handle: HandleId) -> EngineStatus {
        EngineStatus::unrecoverable(format!("{handle} is not open"))
    }

    fn stopped(handle: HandleId) -> EngineStatus {
        EngineStatus::new(codes::SESSION_STOPPED, format!("{handle} closed during transcode"))
    }

    /// Claim the slot for one run and return the timestamp offset to apply.
    fn begin_run(&self, handle: HandleId) -> Result<f64, EngineStatus> {
        let mut slot = self
            .slots
            .get_mut(&handle)
            .ok_or_else(|| Self::unknown_handle(handle))?;
        if slot.running_pid.is_some() {
            return Err(EngineStatus::new(
                codes::EINVAL,
                format!("{handle} already has a transcode in flight"),
            ));
        }
        if slot.pending_discontinuity {
            slot.pending_discontinuity = false;
            slot.ts_offset = slot.last_end.unwrap_or(slot.ts_offset);
            debug!(%handle, offset = slot.ts_offset, "applying timestamp discontinuity");
        }
        Ok(slot.ts_offset)
    }

    fn run(&self, handle: HandleId, mut child: Child) -> Result<Vec<String>, EngineStatus> {
        match self.slots.get_mut(&handle) {
            Some(mut slot) => slot.running_pid = Some(child.id()),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Self::stopped(handle));
            }
        }

        let mut lines = Vec::new();
        if let Some(stderr) = child.stderr.take() {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                trace!(%handle, "ffmpeg: {}", line);
                lines.push(line);
            }
        }
        let status = child.wait();

        match self.slots.get_mut(&handle) {
            Some(mut slot) => slot.running_pid = None,
            None => return Err(Self::stopped(handle)),
        }

        let status = status.map_err(|err| {
            EngineStatus::new(codes::AVERROR_EXTERNAL, format!("waiting for ffmpeg: {err}"))
        })?;
        if status.success() {
            Ok(lines)
        } else {
            let failure = stats::classify_failure(&lines);
            warn!(%handle, exit = ?status.code(), code = failure.code, "ffmpeg failed: {}", failure.message);
            Err(failure)
        }
    }

    fn report(
        handle: HandleId,
        outputs: &[EngineOutput],
        file_index: &[Option<usize>],
        stats: &stats::RunStats,
    ) -> Result<EngineReport, EngineStatus> {
        let (in_w, in_h) = stats.input_size.unwrap_or_default();
        let decoded_frames = stats.decoded_frames.unwrap_or_default();
        let mut encoded = Vec::with_capacity(outputs.len());

        for (index, output) in outputs.iter().enumerate() {
            let frames = match file_index.get(index).copied().flatten() {
                Some(file) if !output.is_video_dropped() => {
                    stats.encoded_frames.get(&file).copied().unwrap_or_default()
                }
                _ => 0,
            };
            if let Some(cap) = output.frame_cap
                && !output.is_video_dropped()
                && frames > cap
            {
                warn!(%handle, output = index, frames, cap, "output ran past its frame cap");
                return Err(EngineStatus::new(
                    codes::OUTPUT_SIZE_LIMIT,
                    format!("output {index} ran past its cap of {cap} frames"),
                ));
            }
            let (width, height) = if output.width > 0 {
                (output.width, output.height)
            } else {
                (in_w, in_h)
            };
            encoded.push(EncodedOutput {
                counters: MediaCounters {
                    frames,
                    pixels: frames * u64::from(width) * u64::from(height),
                },
                detection: None,
            });
        }

        Ok(EngineReport {
            decoded: MediaCounters {
                frames: decoded_frames,
                pixels: decoded_frames * u64::from(in_w) * u64::from(in_h),
            },
            encoded,
        })
    }
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new(FfmpegConfig::default())
    }
}

impl MediaEngine for FfmpegEngine {
    fn open(&self) -> Result<HandleId, EngineStatus> {
        let handle = HandleId::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.slots.insert(handle, Slot::default());
        debug!(%handle, "ffmpeg slot opened");
        Ok(handle)
    }

    fn close(&self, handle: HandleId) {
        let Some((_, slot)) = self.slots.remove(&handle) else {
            return;
        };
        if let Some(pid) = slot.running_pid {
            info!(%handle, pid, "killing in-flight ffmpeg");
            kill_process(pid);
        }
    }

    fn transcode(
        &self,
        handle: HandleId,
        input: &EngineInput,
        outputs: &mut [EngineOutput],
    ) -> Result<EngineReport, EngineStatus> {
        if outputs.len() > MAX_OUTPUTS {
            return Err(EngineStatus::new(
                codes::TOO_MANY_OUTPUTS,
                format!("{} outputs", outputs.len()),
            ));
        }
        if outputs.iter().any(|o| o.detector.is_some()) {
            return Err(EngineStatus::new(
                codes::EINVAL,
                "detector outputs need a classifier runtime, which this engine lacks",
            ));
        }

        let ts_offset = self.begin_run(handle)?;
        let command::Invocation {
            command: mut cmd,
            file_index,
        } = command::build_command(&self.config, input, outputs, ts_offset);
        debug!(%handle, command = ?cmd, "spawning ffmpeg");
        let child = cmd.spawn().map_err(|err| {
            error!(%handle, error = %err, "failed to spawn ffmpeg");
            EngineStatus::new(
                codes::AVERROR_EXTERNAL,
                format!("failed to run {}: {err}", self.config.ffmpeg_path.display()),
            )
        })?;

        let lines = self.run(handle, child)?;
        let stats = stats::parse_stats(lines.iter().map(String::as_str));
        let report = Self::report(handle, outputs, &file_index, &stats)?;

        if let Some(end) = stats.last_time
            && let Some(mut slot) = self.slots.get_mut(&handle)
        {
            slot.last_end = Some(end);
        }
        Ok(report)
    }

    fn discontinuity(&self, handle: HandleId) -> Result<(), EngineStatus> {
        let mut slot = self
            .slots
            .get_mut(&handle)
            .ok_or_else(|| Self::unknown_handle(handle))?;
        slot.pending_discontinuity = true;
        Ok(())
    }

    fn probe(&self, locator: &Locator) -> Result<InputInfo, EngineStatus> {
        probe::probe(&self.config, locator)
    }

    fn compare_signatures(&self, a: &[u8], b: &[u8]) -> Result<bool, EngineStatus> {
        Ok(fingerprints_match(a, b))
    }
}

/// Equal length and at least [`SIGNATURE_MATCH_PERCENT`] of bits in common.
pub fn fingerprints_match(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() || a.is_empty() {
        return false;
    }
    let total_bits = a.len() as u64 * 8;
    let differing: u64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| u64::from((x ^ y).count_ones()))
        .sum();
    (total_bits - differing) * 100 >= total_bits * SIGNATURE_MATCH_PERCENT
}

fn kill_process(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGKILL) {
            debug!(pid, error = %err, "ffmpeg already gone");
        }
    }

    #[cfg(not(unix))]
    {
        warn!(pid, "cannot kill in-flight ffmpeg on this platform");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::SizeGuard;

    #[test]
    fn handle_table_lifecycle() {
        let engine = FfmpegEngine::default();
        let a = engine.open().unwrap();
        let b = engine.open().unwrap();
        assert_ne!(a, b);
        assert_eq!(engine.open_handles(), 2);

        engine.close(a);
        engine.close(a);
        assert_eq!(engine.open_handles(), 1);
        assert_eq!(
            engine.discontinuity(a).unwrap_err().code,
            codes::UNRECOVERABLE_STATE
        );
        assert!(engine.discontinuity(b).is_ok());
    }

    #[test]
    fn discontinuity_moves_offset_to_previous_end() {
        let engine = FfmpegEngine::default();
        let handle = engine.open().unwrap();
        assert_eq!(engine.begin_run(handle).unwrap(), 0.0);
        if let Some(mut slot) = engine.slots.get_mut(&handle) {
            slot.last_end = Some(8.0);
        }
        assert_eq!(engine.begin_run(handle).unwrap(), 0.0);
        engine.discontinuity(handle).unwrap();
        assert_eq!(engine.begin_run(handle).unwrap(), 8.0);
        assert_eq!(engine.begin_run(handle).unwrap(), 8.0);
    }

    #[test]
    fn report_scales_pixels_and_enforces_cap() {
        let stats = stats::parse_stats(
            [
                "  Stream #0:0: Video: h264, yuv420p, 640x360, 30 fps",
                "  Input stream #0:0 (video): 90 packets read (1 bytes); 90 frames decoded;",
                "  Output stream #0:0 (video): 90 frames encoded; 90 packets muxed (1 bytes);",
            ]
            .into_iter(),
        );
        let mut output = command_tests_output();
        let report = FfmpegEngine::report(HandleId::new(1), std::slice::from_ref(&output), &[Some(0)], &stats)
            .unwrap();
        assert_eq!(report.decoded.pixels, 90 * 640 * 360);
        assert_eq!(report.encoded[0].counters.pixels, 90 * 320 * 180);

        output.frame_cap = Some(89);
        let err = FfmpegEngine::report(HandleId::new(1), &[output], &[Some(0)], &stats).unwrap_err();
        assert_eq!(err.code, codes::OUTPUT_SIZE_LIMIT);
    }

    #[test]
    fn output_filling_its_cap_exactly_is_not_runaway() {
        let guard = SizeGuard {
            max_duplication: 1.0,
            frame_cap: None,
        };
        let cap = guard.frame_cap(Some(30.0), Some(10.0));
        assert_eq!(cap, Some(300));

        let lines = |frames: u64| {
            vec![
                "  Stream #0:0: Video: h264, yuv420p, 640x360, 30 fps".to_string(),
                format!("  Output stream #0:0 (video): {frames} frames encoded; {frames} packets muxed (1 bytes);"),
            ]
        };
        let mut output = command_tests_output();
        output.frame_cap = cap;

        let full = stats::parse_stats(lines(300).iter().map(String::as_str));
        let report =
            FfmpegEngine::report(HandleId::new(1), std::slice::from_ref(&output), &[Some(0)], &full)
                .unwrap();
        assert_eq!(report.encoded[0].counters.frames, 300);

        let runaway = stats::parse_stats(lines(301).iter().map(String::as_str));
        let err = FfmpegEngine::report(HandleId::new(1), &[output], &[Some(0)], &runaway)
            .unwrap_err();
        assert_eq!(err.code, codes::OUTPUT_SIZE_LIMIT);
    }

    fn command_tests_output() -> EngineOutput {
        EngineOutput {
            locator: Locator::from("out.mp4"),
            muxer: None,
            muxer_options: None,
            video_encoder: "libx264".to_string(),
            video_options: Vec::new(),
            audio_encoder: "aac".to_string(),
            audio_options: Vec::new(),
            filters: Some("scale=w=320:h=180".to_string()),
            width: 320,
            height: 180,
            bitrate: 0,
            framerate: None,
            gop: Default::default(),
            codec_profile: None,
            encode_accel: Default::default(),
            device: String::new(),
            frame_cap: None,
            clip_from: None,
            clip_to: None,
            calc_signature: false,
            detector: None,
        }
    }

    #[test]
    fn fingerprint_threshold() {
        let a = vec![0u8; 20];
        let mut b = a.clone();
        b[0] = 0xFF; // 8 of 160 bits differ: exactly 95% agree
        assert!(fingerprints_match(&a, &b));
        b[1] = 0x01;
        assert!(!fingerprints_match(&a, &b));
        assert!(!fingerprints_match(&a, &a[..19]));
    }

    #[test]
    fn detector_outputs_are_rejected() {
        let engine = FfmpegEngine::default();
        let handle = engine.open().unwrap();
        let mut output = command_tests_output();
        output.detector = crate::detector::lookup("scene-classifier");
        let input = EngineInput {
            locator: Locator::from("in.mp4"),
            hwaccel: Default::default(),
            device: String::new(),
            transmuxing: false,
        };
        let err = engine.transcode(handle, &input, &mut [output]).unwrap_err();
        assert_eq!(err.code, codes::EINVAL);
    }
}
