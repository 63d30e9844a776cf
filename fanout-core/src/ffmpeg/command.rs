use std::path::Path;
use std::process::{Command, Stdio};

use crate::accel::Accel;
use crate::engine::{EngineInput, EngineOutput};
use crate::profile::{ENCODER_COPY, ENCODER_DROP, GopPolicy};

use super::FfmpegConfig;

const DEFAULT_VAAPI_DEVICE: &str = "/dev/dri/renderD128";

pub(crate) struct Invocation {
    pub command: Command,
    /// ffmpeg output file index for each output, `None` when the output
    /// drops every stream and nothing is written for it.
    pub file_index: Vec<Option<usize>>,
}

/// Build one ffmpeg invocation that decodes `input` once and writes every
/// output. Muxer options are taken from the records here: once the process
/// is launched they belong to the header writer.
pub(crate) fn build_command(
    config: &FfmpegConfig,
    input: &EngineInput,
    outputs: &mut [EngineOutput],
    ts_offset: f64,
) -> Invocation {
    let mut cmd = Command::new(&config.ffmpeg_path);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    cmd.arg("-hide_banner").arg("-nostdin").arg("-y");
    // Final per-stream statistics are only printed at verbose level.
    cmd.arg("-loglevel").arg("verbose");

    // Hardware acceleration args MUST come before the input
    if !input.transmuxing {
        push_decode_flags(&mut cmd, input);
        push_upload_device(&mut cmd, input, outputs);
    }
    cmd.arg("-copyts");
    cmd.arg("-i").arg(input.locator.path());

    let mut file_index = Vec::with_capacity(outputs.len());
    let mut written = 0;
    for output in outputs.iter_mut() {
        // ffmpeg refuses an output file without streams.
        if output.video_encoder == ENCODER_DROP && output.audio_encoder == ENCODER_DROP {
            file_index.push(None);
            continue;
        }
        push_output(&mut cmd, output, ts_offset);
        file_index.push(Some(written));
        written += 1;
    }
    if written == 0 {
        // Still read the whole input so decode failures surface.
        cmd.args(["-map", "0:v:0?", "-f", "null", "-"]);
    }

    Invocation {
        command: cmd,
        file_index,
    }
}

fn push_decode_flags(cmd: &mut Command, input: &EngineInput) {
    let Some(hwaccel) = input.hwaccel.ffmpeg_hwaccel() else {
        return;
    };
    cmd.arg("-hwaccel").arg(hwaccel);
    match input.hwaccel {
        Accel::Nvidia => {
            cmd.arg("-hwaccel_output_format").arg(hwaccel);
            if let Some(device) = non_empty(&input.device) {
                cmd.arg("-hwaccel_device").arg(device);
            }
        }
        Accel::Vaapi => {
            let device = non_empty(&input.device).unwrap_or(DEFAULT_VAAPI_DEVICE);
            cmd.arg("-hwaccel_device").arg(device);
            cmd.arg("-hwaccel_output_format").arg(hwaccel);
        }
        Accel::Software | Accel::Amd => {}
    }
}

/// Software decode feeding a hardware encoder needs a device for `hwupload`.
fn push_upload_device(cmd: &mut Command, input: &EngineInput, outputs: &[EngineOutput]) {
    if input.hwaccel.is_hardware() {
        return;
    }
    let Some(target) = outputs
        .iter()
        .find(|o| matches!(o.encode_accel, Accel::Nvidia | Accel::Vaapi) && o.filters.is_some())
    else {
        return;
    };
    match target.encode_accel {
        Accel::Nvidia => {
            cmd.arg("-init_hw_device")
                .arg(format!("cuda=hw:{}", non_empty(&target.device).unwrap_or("0")));
        }
        _ => {
            cmd.arg("-init_hw_device").arg(format!(
                "vaapi=hw:{}",
                non_empty(&target.device).unwrap_or(DEFAULT_VAAPI_DEVICE)
            ));
        }
    }
    cmd.arg("-filter_hw_device").arg("hw");
}

fn push_output(cmd: &mut Command, output: &mut EngineOutput, ts_offset: f64) {
    let drop_video = output.video_encoder == ENCODER_DROP;
    let drop_audio = output.audio_encoder == ENCODER_DROP;

    if !drop_video {
        cmd.arg("-map").arg("0:v:0?");
    }
    if !drop_audio {
        cmd.arg("-map").arg("0:a:0?");
    }

    if drop_video {
        cmd.arg("-vn");
    } else {
        cmd.arg("-c:v").arg(&output.video_encoder);
        push_options(cmd, &output.video_options, ":v");
        if output.video_encoder != ENCODER_COPY {
            push_video_encoding(cmd, output);
        }
        // One frame of headroom tells a full output from a runaway one.
        if let Some(cap) = output.frame_cap {
            cmd.arg("-frames:v").arg(cap.saturating_add(1).to_string());
        }
    }

    if drop_audio {
        cmd.arg("-an");
    } else {
        cmd.arg("-c:a").arg(&output.audio_encoder);
        push_options(cmd, &output.audio_options, ":a");
    }

    if let Some(from) = output.clip_from {
        cmd.arg("-ss").arg(format!("{from:.3}"));
    }
    if let Some(to) = output.clip_to {
        cmd.arg("-to").arg(format!("{to:.3}"));
    }
    if ts_offset > 0.0 {
        cmd.arg("-output_ts_offset").arg(format!("{ts_offset:.6}"));
    }

    if let Some(muxer) = &output.muxer {
        cmd.arg("-f").arg(muxer);
    }
    if let Some(options) = output.take_muxer_options() {
        push_options(cmd, &options, "");
    }

    cmd.arg(output.locator.path());
}

fn push_video_encoding(cmd: &mut Command, output: &EngineOutput) {
    let mut filters = output.filters.clone().unwrap_or_default();
    if output.calc_signature {
        let stage = signature_filter(&signature_path(output.locator.path()));
        if filters.is_empty() {
            filters = stage;
        } else {
            filters = format!("{filters},{stage}");
        }
    }
    if !filters.is_empty() {
        cmd.arg("-vf").arg(filters);
    }
    if output.bitrate > 0 {
        cmd.arg("-b:v").arg(output.bitrate.to_string());
    }
    if let Some(profile) = output.codec_profile {
        cmd.arg("-profile:v").arg(profile.encoder_value());
    }
    match output.gop {
        GopPolicy::Default => {}
        GopPolicy::IntraOnly => {
            cmd.arg("-g").arg("1");
        }
        GopPolicy::Seconds(secs) => {
            cmd.arg("-force_key_frames")
                .arg(format!("expr:gte(t,n_forced*{secs})"));
        }
    }
}

fn push_options(cmd: &mut Command, options: &[(String, String)], stream: &str) {
    for (key, value) in options {
        cmd.arg(format!("-{key}{stream}")).arg(value);
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

pub(crate) fn signature_path(output: &Path) -> std::path::PathBuf {
    let mut path = output.as_os_str().to_owned();
    path.push(".bin");
    path.into()
}

fn signature_filter(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\\', "\\\\").replace('\'', "\\'");
    format!("signature=format=binary:filename='{escaped}'")
}
