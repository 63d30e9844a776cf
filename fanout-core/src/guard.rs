//! Runaway output guard.
//!
//! Malformed variable-frame-rate inputs can make a framerate filter duplicate
//! frames without bound. The guard turns the known input duration into a
//! frame cap per output. An output may produce exactly `cap` frames; the
//! engine stops it once it goes past the cap and reports `OUTPUT_SIZE_LIMIT`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeGuard {
    /// Allowed ratio of produced frames to the frames the duration implies.
    pub max_duplication: f64,
    /// Absolute cap used when no duration-based cap applies.
    pub frame_cap: Option<u64>,
}

impl Default for SizeGuard {
    fn default() -> Self {
        Self {
            max_duplication: 2.0,
            frame_cap: None,
        }
    }
}

impl SizeGuard {
    pub fn disabled() -> Self {
        Self {
            max_duplication: 0.0,
            frame_cap: None,
        }
    }

    /// Whether a cap for an output at `target_fps` depends on the input duration.
    pub fn wants_duration(&self, target_fps: Option<f64>) -> bool {
        target_fps.is_some() && self.max_duplication > 0.0
    }

    pub fn frame_cap(&self, target_fps: Option<f64>, duration: Option<f64>) -> Option<u64> {
        let scaled = match (target_fps, duration) {
            (Some(fps), Some(secs)) if self.max_duplication > 0.0 && fps > 0.0 && secs > 0.0 => {
                Some((secs * fps * self.max_duplication).ceil())
            }
            _ => None,
        };
        match scaled {
            Some(frames) if frames.is_finite() => Some((frames as u64).max(1)),
            _ => self.frame_cap,
        }
    }
}
