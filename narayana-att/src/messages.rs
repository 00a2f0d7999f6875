//! Payloads exchanged with the detector, the servo controller and the camera

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Axis-aligned bounding box in pixel units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }
}

/// A single labelled detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            bbox,
        }
    }

    pub fn area(&self) -> f64 {
        self.bbox.area()
    }
}

/// All detections from one camera sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionFrame {
    /// Capture time in seconds since the unix epoch
    pub timestamp: f64,
    pub objects: Vec<Detection>,
}

impl DetectionFrame {
    pub fn new(timestamp: f64, objects: Vec<Detection>) -> Self {
        Self { timestamp, objects }
    }

    /// Frame stamped with the current wall clock
    pub fn now(objects: Vec<Detection>) -> Self {
        Self::new(unix_now(), objects)
    }

    /// Seconds between capture and `now`, or `None` for unusable timestamps
    pub fn latency(&self, now: f64) -> Option<f64> {
        let latency = now - self.timestamp;
        latency.is_finite().then_some(latency)
    }
}

/// Relative servo move used while tracking
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServoDelta {
    pub pan_deg: f64,
    pub tilt0_deg: f64,
    pub tilt1_deg: f64,
}

/// Absolute servo pose used while exploring
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServoPosition {
    pub pan_deg: f64,
    pub tilt0_deg: f64,
    pub tilt1_deg: f64,
    pub speed_dps: f64,
}

/// Upstream sampling-rate request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    pub fps: f64,
}

pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
