//! Named classifier descriptors attachable to an output.
//!
//! The orchestrator never loads or runs a model. A descriptor is handed to the
//! engine unchanged and the per-class scores it returns are surfaced keyed by
//! class id.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorProfile {
    pub name: String,
    /// Run the classifier on every Nth decoded frame.
    pub sample_rate: u32,
    pub model_path: String,
    pub input_tensor: String,
    pub output_tensor: String,
    pub classes: BTreeMap<u32, String>,
}

impl DetectorProfile {
    pub fn class_name(&self, id: u32) -> Option<&str> {
        self.classes.get(&id).map(String::as_str)
    }
}

/// Per-class scores produced for one output.
pub type DetectionScores = BTreeMap<u32, f64>;

static DETECTORS: Lazy<Vec<DetectorProfile>> = Lazy::new(|| {
    vec![DetectorProfile {
        name: "scene-classifier".to_string(),
        sample_rate: 30,
        model_path: "tasmodel.pb".to_string(),
        input_tensor: "input_1".to_string(),
        output_tensor: "reshape_3/Reshape".to_string(),
        classes: BTreeMap::from([
            (0, "adult".to_string()),
            (1, "soccer".to_string()),
        ]),
    }]
});

pub fn lookup(name: &str) -> Option<DetectorProfile> {
    DETECTORS
        .iter()
        .find(|detector| detector.name.eq_ignore_ascii_case(name))
        .cloned()
}

pub fn names() -> impl Iterator<Item = &'static str> {
    DETECTORS.iter().map(|detector| detector.name.as_str())
}
