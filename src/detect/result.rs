use serde::{Deserialize, Serialize};

/// One detected region, in pixel coordinates of the frame it came from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub class_name: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    /// Persistent identity, set only by tracking detectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u64>,
}

impl DetectionBox {
    pub fn new(class_name: impl Into<String>, confidence: f32, x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            class_name: class_name.into(),
            confidence: confidence.clamp(0.0, 1.0),
            x1,
            y1,
            x2,
            y2,
            track_id: None,
        }
    }

    pub fn with_track_id(mut self, track_id: u64) -> Self {
        self.track_id = Some(track_id);
        self
    }
}

/// Output of a classification call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    /// Confidence as a percentage in `[0, 100]`.
    pub confidence_pct: f32,
}
