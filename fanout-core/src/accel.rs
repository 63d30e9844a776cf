//! Acceleration compatibility matrix.
//!
//! Decides, for one output, which concrete encoder and which scaling filter
//! the engine should use given where decoding happens and where encoding is
//! requested. Pure functions only; safe to call from any thread.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result, TranscodeError};
use crate::profile::VideoCodec;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accel {
    #[default]
    Software,
    Nvidia,
    Amd,
    Vaapi,
}

impl Accel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::Nvidia => "nvidia",
            Self::Amd => "amd",
            Self::Vaapi => "vaapi",
        }
    }

    pub fn is_hardware(&self) -> bool {
        !matches!(self, Self::Software)
    }

    /// Value for ffmpeg's `-hwaccel` input option.
    pub fn ffmpeg_hwaccel(&self) -> Option<&'static str> {
        match self {
            Self::Software => None,
            Self::Nvidia => Some("cuda"),
            Self::Amd => Some("d3d11va"),
            Self::Vaapi => Some("vaapi"),
        }
    }

    fn encoder_for(&self, codec: VideoCodec) -> Option<&'static str> {
        match (self, codec) {
            (Self::Software, codec) => Some(codec.software_encoder()),
            (Self::Nvidia, VideoCodec::H264) => Some("h264_nvenc"),
            (Self::Nvidia, VideoCodec::H265) => Some("hevc_nvenc"),
            (Self::Amd, VideoCodec::H264) => Some("h264_amf"),
            (Self::Amd, VideoCodec::H265) => Some("hevc_amf"),
            (Self::Vaapi, VideoCodec::H264) => Some("h264_vaapi"),
            (Self::Vaapi, VideoCodec::H265) => Some("hevc_vaapi"),
            (Self::Vaapi, VideoCodec::Vp8) => Some("vp8_vaapi"),
            (Self::Vaapi, VideoCodec::Vp9) => Some("vp9_vaapi"),
            _ => None,
        }
    }

    fn scale_filter(&self) -> &'static str {
        match self {
            Self::Nvidia => "scale_cuda",
            Self::Vaapi => "scale_vaapi",
            Self::Software | Self::Amd => "scale",
        }
    }

    fn upload_filter(&self) -> Option<&'static str> {
        match self {
            Self::Nvidia => Some("hwupload_cuda"),
            Self::Vaapi => Some("format=nv12|vaapi,hwupload"),
            // AMF ingests system memory frames directly.
            Self::Software | Self::Amd => None,
        }
    }
}

impl fmt::Display for Accel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Accel {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "sw" | "software" | "none" => Ok(Self::Software),
            "nv" | "nvidia" | "cuda" | "nvenc" => Ok(Self::Nvidia),
            "amd" | "amf" => Ok(Self::Amd),
            "vaapi" => Ok(Self::Vaapi),
            other => Err(TranscodeError::new(
                ErrorKind::InvalidHardware,
                format!("unknown acceleration '{other}'"),
            )),
        }
    }
}

/// Acceleration selection plus the device it should run on.
///
/// An empty device means "any/default device".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acceleration {
    pub accel: Accel,
    #[serde(default)]
    pub device: String,
}

impl Acceleration {
    pub fn software() -> Self {
        Self::default()
    }

    pub fn new(accel: Accel, device: impl Into<String>) -> Self {
        Self {
            accel,
            device: device.into(),
        }
    }
}

/// Scaling stage selected by the matrix, rendered once dimensions are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleFilter {
    upload: Option<&'static str>,
    name: &'static str,
}

impl ScaleFilter {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn render(&self, width: u32, height: u32) -> String {
        let scale = format!("{}=w={}:h={}", self.name, width, height);
        match self.upload {
            Some(upload) => format!("{upload},{scale}"),
            None => scale,
        }
    }
}

/// Outcome of one lookup in the matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccelPlan {
    pub encoder: &'static str,
    pub scale: ScaleFilter,
    /// Where the encoder runs; determines alignment and bounds.
    pub encode_accel: Accel,
    /// Device the hardware stages are bound to (empty = default).
    pub device: String,
    /// Hardware-decoded frames must be downloaded before a software encoder.
    pub needs_download: bool,
}

fn invalid_hardware(detail: String) -> TranscodeError {
    TranscodeError::new(ErrorKind::InvalidHardware, detail)
}

/// Reject decode accelerations that have no decoder, whatever the outputs ask
/// for. Copy and drop outputs never reach the matrix, so this runs once per
/// call.
pub fn check_decode(decode: &Acceleration) -> Result<()> {
    if decode.accel == Accel::Amd {
        return Err(invalid_hardware(
            "amd acceleration is encode-only".to_string(),
        ));
    }
    Ok(())
}

/// Look up the encoder and scale filter for one decode/encode pairing.
pub fn resolve(
    decode: &Acceleration,
    encode: &Acceleration,
    codec: VideoCodec,
) -> Result<AccelPlan> {
    let encoder_for = |accel: Accel| {
        accel.encoder_for(codec).ok_or_else(|| {
            invalid_hardware(format!("no {} encoder for {}", accel, codec.as_str()))
        })
    };

    match (decode.accel, encode.accel) {
        (Accel::Software, Accel::Software) => Ok(AccelPlan {
            encoder: encoder_for(Accel::Software)?,
            scale: ScaleFilter {
                upload: None,
                name: "scale",
            },
            encode_accel: Accel::Software,
            device: String::new(),
            needs_download: false,
        }),
        (Accel::Software, hw) => Ok(AccelPlan {
            encoder: encoder_for(hw)?,
            scale: ScaleFilter {
                upload: hw.upload_filter(),
                name: hw.scale_filter(),
            },
            encode_accel: hw,
            device: encode.device.clone(),
            needs_download: false,
        }),
        (Accel::Amd, _) => Err(invalid_hardware(
            "amd acceleration is encode-only".to_string(),
        )),
        (hw, Accel::Software) => Ok(AccelPlan {
            encoder: encoder_for(Accel::Software)?,
            scale: ScaleFilter {
                upload: None,
                name: hw.scale_filter(),
            },
            encode_accel: Accel::Software,
            device: decode.device.clone(),
            needs_download: true,
        }),
        (decode_hw, encode_hw) if decode_hw == encode_hw => {
            let (a, b) = (decode.device.as_str(), encode.device.as_str());
            if !a.is_empty() && !b.is_empty() && a != b {
                return Err(invalid_hardware(format!(
                    "decode on {decode_hw} device {a} cannot feed encode on device {b}"
                )));
            }
            let device = if a.is_empty() { b } else { a };
            Ok(AccelPlan {
                encoder: encoder_for(encode_hw)?,
                scale: ScaleFilter {
                    upload: None,
                    name: encode_hw.scale_filter(),
                },
                encode_accel: encode_hw,
                device: device.to_string(),
                needs_download: false,
            })
        }
        (decode_hw, encode_hw) => Err(invalid_hardware(format!(
            "cannot pair {decode_hw} decode with {encode_hw} encode"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nv(device: &str) -> Acceleration {
        Acceleration::new(Accel::Nvidia, device)
    }

    #[test]
    fn software_to_software_uses_plain_scale() {
        let plan = resolve(&Acceleration::software(), &Acceleration::software(), VideoCodec::H264)
            .unwrap();
        assert_eq!(plan.encoder, "libx264");
        assert_eq!(plan.scale.render(1280, 720), "scale=w=1280:h=720");
        assert!(!plan.needs_download);
    }

    #[test]
    fn software_to_hardware_uploads_to_encode_device() {
        let plan = resolve(&Acceleration::software(), &nv("1"), VideoCodec::H265).unwrap();
        assert_eq!(plan.encoder, "hevc_nvenc");
        assert_eq!(
            plan.scale.render(640, 360),
            "hwupload_cuda,scale_cuda=w=640:h=360"
        );
        assert_eq!(plan.device, "1");
    }

    #[test]
    fn hardware_to_software_scales_on_device_then_downloads() {
        let plan = resolve(&nv("0"), &Acceleration::software(), VideoCodec::H264).unwrap();
        assert_eq!(plan.encoder, "libx264");
        assert_eq!(plan.scale.name(), "scale_cuda");
        assert!(plan.needs_download);
        assert_eq!(plan.encode_accel, Accel::Software);
    }

    #[test]
    fn only_amd_fails_the_decode_check() {
        let err = check_decode(&Acceleration::new(Accel::Amd, "0")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHardware);
        for accel in [Accel::Software, Accel::Nvidia, Accel::Vaapi] {
            assert!(check_decode(&Acceleration::new(accel, "")).is_ok(), "{accel}");
        }
        assert_eq!(Accel::Nvidia.ffmpeg_hwaccel(), Some("cuda"));
        assert_eq!(Accel::Software.ffmpeg_hwaccel(), None);
    }

    #[test]
    fn cross_device_hardware_pairing_is_rejected() {
        let err = resolve(&nv("0"), &nv("1"), VideoCodec::H264).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHardware);
    }

    #[test]
    fn same_or_default_device_is_accepted() {
        let same = resolve(&nv("0"), &nv("0"), VideoCodec::H264).unwrap();
        assert_eq!(same.device, "0");
        let defaulted = resolve(&nv("0"), &nv(""), VideoCodec::H264).unwrap();
        assert_eq!(defaulted.device, "0");
        let decode_any = resolve(&nv(""), &nv("1"), VideoCodec::H264).unwrap();
        assert_eq!(decode_any.device, "1");
        assert_eq!(same.scale.render(1280, 720), "scale_cuda=w=1280:h=720");
    }

    #[test]
    fn mixed_vendors_and_amd_decode_are_rejected() {
        let vaapi = Acceleration::new(Accel::Vaapi, "/dev/dri/renderD128");
        let amd = Acceleration::new(Accel::Amd, "");
        for (decode, encode) in [(&nv("0"), &vaapi), (&amd, &amd), (&amd, &Acceleration::software())] {
            let err = resolve(decode, encode, VideoCodec::H264).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidHardware);
        }
    }

    #[test]
    fn unsupported_codec_on_hardware_is_rejected() {
        let err = resolve(&Acceleration::software(), &nv(""), VideoCodec::Vp9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHardware);
    }

    #[test]
    fn amd_encode_takes_system_memory_frames() {
        let plan = resolve(
            &Acceleration::software(),
            &Acceleration::new(Accel::Amd, ""),
            VideoCodec::H264,
        )
        .unwrap();
        assert_eq!(plan.encoder, "h264_amf");
        assert_eq!(plan.scale.render(1920, 1080), "scale=w=1920:h=1080");
    }

    #[test]
    fn parses_accel_aliases() {
        assert_eq!("CUDA".parse::<Accel>().unwrap(), Accel::Nvidia);
        assert_eq!("".parse::<Accel>().unwrap(), Accel::Software);
        assert!("quantum".parse::<Accel>().is_err());
    }
}
