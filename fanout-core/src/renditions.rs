//! Named rendition table and JSON profile lists.
//!
//! Names follow `P<height>p<fps>fps<aspect>`, e.g. `P720p30fps16x9`. Front
//! ends translate user supplied names here; the session only ever sees the
//! resolved [`RenditionProfile`].

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::error::{ErrorKind, Result, TranscodeError};
use crate::profile::{CodecProfile, GopPolicy, RenditionProfile, VideoCodec, parse_bitrate};

struct Entry {
    name: &'static str,
    resolution: &'static str,
    bitrate: u64,
    framerate: u32,
}

const fn entry(name: &'static str, resolution: &'static str, bitrate: u64, framerate: u32) -> Entry {
    Entry {
        name,
        resolution,
        bitrate,
        framerate,
    }
}

const TABLE: &[Entry] = &[
    entry("P144p30fps16x9", "256x144", 400_000, 30),
    entry("P144p25fps16x9", "256x144", 400_000, 25),
    entry("P240p30fps16x9", "426x240", 600_000, 30),
    entry("P240p25fps16x9", "426x240", 600_000, 25),
    entry("P240p30fps4x3", "320x240", 600_000, 30),
    entry("P360p30fps16x9", "640x360", 1_200_000, 30),
    entry("P360p25fps16x9", "640x360", 1_200_000, 25),
    entry("P360p30fps4x3", "480x360", 1_000_000, 30),
    entry("P576p30fps16x9", "1024x576", 1_500_000, 30),
    entry("P576p25fps16x9", "1024x576", 1_500_000, 25),
    entry("P720p30fps16x9", "1280x720", 4_000_000, 30),
    entry("P720p60fps16x9", "1280x720", 6_000_000, 60),
    entry("P720p25fps16x9", "1280x720", 3_500_000, 25),
    entry("P720p30fps4x3", "960x720", 3_500_000, 30),
    entry("P1080p30fps16x9", "1920x1080", 6_500_000, 30),
    entry("P1080p60fps16x9", "1920x1080", 9_000_000, 60),
    entry("P2160p30fps16x9", "3840x2160", 20_000_000, 30),
];

static PROFILES: Lazy<Vec<RenditionProfile>> = Lazy::new(|| {
    TABLE
        .iter()
        .map(|e| RenditionProfile::new(e.name, e.resolution, e.bitrate).with_framerate(e.framerate, 1))
        .collect()
});

/// Resolve a rendition name; matching is case-insensitive.
pub fn lookup(name: &str) -> Option<RenditionProfile> {
    PROFILES
        .iter()
        .find(|profile| profile.name.eq_ignore_ascii_case(name.trim()))
        .cloned()
}

pub fn names() -> impl Iterator<Item = &'static str> {
    TABLE.iter().map(|e| e.name)
}

/// Resolve a comma separated list of names, failing on the first unknown one.
pub fn lookup_all(names: &str) -> Result<Vec<RenditionProfile>> {
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            lookup(name).ok_or_else(|| {
                TranscodeError::new(ErrorKind::InvalidInput, format!("unknown rendition '{name}'"))
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BitrateField {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonProfile {
    name: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    bitrate: BitrateField,
    #[serde(default)]
    fps: u32,
    #[serde(default)]
    fps_den: u32,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    gop: Option<String>,
    #[serde(default)]
    encoder: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonProfiles {
    List(Vec<JsonProfile>),
    Wrapped { profiles: Vec<JsonProfile> },
}

impl JsonProfile {
    fn into_profile(self) -> Result<RenditionProfile> {
        let resolution = match (self.width, self.height) {
            (0, 0) => {
                return Err(TranscodeError::new(
                    ErrorKind::InvalidResolution,
                    format!("profile '{}' has neither width nor height", self.name),
                ));
            }
            (0, h) => format!("autox{h}"),
            (w, 0) => format!("{w}xauto"),
            (w, h) => format!("{w}x{h}"),
        };
        let bitrate = match self.bitrate {
            BitrateField::Number(bits) => bits,
            BitrateField::Text(text) => parse_bitrate(&text)?,
        };
        let mut profile = RenditionProfile::new(self.name, resolution, bitrate)
            .with_framerate(self.fps, self.fps_den.max(1));
        if let Some(gop) = self.gop {
            profile = profile.with_gop(gop.parse::<GopPolicy>()?);
        }
        if let Some(encoder) = self.encoder {
            profile = profile.with_codec(encoder.parse::<VideoCodec>()?);
        }
        if let Some(codec_profile) = self.profile.filter(|p| !p.trim().is_empty() && p != "none") {
            profile.codec_profile = Some(codec_profile.parse::<CodecProfile>()?);
        }
        Ok(profile)
    }
}

/// Parse a JSON list of profiles, either a bare array or `{"profiles": [...]}`.
pub fn parse_profiles_json(json: &str) -> Result<Vec<RenditionProfile>> {
    let parsed: JsonProfiles = serde_json::from_str(json).map_err(|err| {
        TranscodeError::new(ErrorKind::InvalidInput, format!("invalid profile JSON: {err}"))
    })?;
    let list = match parsed {
        JsonProfiles::List(list) | JsonProfiles::Wrapped { profiles: list } => list,
    };
    list.into_iter().map(JsonProfile::into_profile).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookups() {
        let p = lookup("p720p60fps16x9").expect("known rendition");
        assert_eq!(p.resolution, "1280x720");
        assert_eq!(p.framerate, 60);
        assert!(lookup("P9000p").is_none());
        assert!(names().any(|n| n == "P144p30fps16x9"));
    }

    #[test]
    fn lookup_all_rejects_unknown_names() {
        assert_eq!(lookup_all("P240p30fps16x9, P360p30fps16x9").unwrap().len(), 2);
        let err = lookup_all("P240p30fps16x9,bogus").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn parses_json_profiles() {
        let json = r#"[
            {"name": "hd", "width": 1280, "height": 720, "bitrate": "4000k", "fps": 30000, "fpsDen": 1001, "gop": "2.0", "profile": "H264High"},
            {"name": "fit", "height": 360, "bitrate": 900000, "encoder": "h265"}
        ]"#;
        let profiles = parse_profiles_json(json).unwrap();
        assert_eq!(profiles[0].bitrate, 4_000_000);
        assert_eq!(profiles[0].fps_filter().as_deref(), Some("fps=30000/1001"));
        assert_eq!(profiles[0].gop, GopPolicy::Seconds(2.0));
        assert_eq!(profiles[0].codec_profile, Some(CodecProfile::High));
        assert_eq!(profiles[1].resolution, "autox360");
        assert_eq!(profiles[1].codec, VideoCodec::H265);
    }

    #[test]
    fn wrapped_and_broken_json() {
        let wrapped = r#"{"profiles": [{"name": "a", "width": 2, "height": 2, "bitrate": 1}]}"#;
        assert_eq!(parse_profiles_json(wrapped).unwrap().len(), 1);
        assert!(parse_profiles_json("{").is_err());
        let sizeless = r#"[{"name": "a", "bitrate": 1}]"#;
        assert_eq!(
            parse_profiles_json(sizeless).unwrap_err().kind(),
            ErrorKind::InvalidResolution
        );
    }
}
