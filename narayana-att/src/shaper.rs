//! Bounding box to actuator error shaping
//!
//! Errors are normalized to `[-1, 1]` relative to the frame center. The
//! horizontal and vertical errors are zeroed inside a circular dead zone so the
//! servos do not hunt around a centered target; the depth error is left alone.

use crate::config::{ServoGains, ShaperConfig};
use crate::error::AttentionError;
use crate::messages::{Detection, ServoDelta};
use std::collections::HashMap;

/// Shaped error signals for one target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedError {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Target sat inside the dead zone; x and y are exactly zero
    pub locked: bool,
}

impl ShapedError {
    /// Map errors onto servo axes
    pub fn to_servo_delta(&self, gains: &ServoGains) -> ServoDelta {
        ServoDelta {
            pan_deg: gains.pan * self.x,
            tilt0_deg: gains.tilt0 * self.z,
            tilt1_deg: gains.tilt1 * self.y,
        }
    }
}

/// Converts target boxes into bounded error signals
#[derive(Debug, Clone)]
pub struct ErrorShaper {
    frame_width: f64,
    frame_height: f64,
    x_gain: f64,
    z_scale: f64,
    dead_zone_radius: f64,
    label_offsets: HashMap<String, f64>,
    default_offset: f64,
}

impl ErrorShaper {
    pub fn new(config: &ShaperConfig) -> Result<Self, AttentionError> {
        let valid_dim = |v: f64| v.is_finite() && v > 0.0;
        if !valid_dim(config.frame_width) || !valid_dim(config.frame_height) {
            return Err(AttentionError::Config(format!(
                "Invalid frame geometry {}x{}",
                config.frame_width, config.frame_height
            )));
        }

        Ok(Self {
            frame_width: config.frame_width,
            frame_height: config.frame_height,
            x_gain: config.x_gain,
            z_scale: config.z_scale,
            dead_zone_radius: config.dead_zone_radius,
            label_offsets: config.label_offsets.clone(),
            default_offset: config.default_offset,
        })
    }

    /// Shape against the configured frame geometry
    pub fn shape(&self, target: &Detection) -> ShapedError {
        self.shape_in(target, self.frame_width, self.frame_height)
    }

    /// Shape against an explicit frame geometry
    pub fn shape_in(&self, target: &Detection, frame_width: f64, frame_height: f64) -> ShapedError {
        let (x, y, z) = self.raw_errors(target, frame_width, frame_height);

        let locked = (x * x + y * y).sqrt() <= self.dead_zone_radius;
        let (x, y) = if locked { (0.0, 0.0) } else { (x, y) };

        ShapedError {
            x: clamp_unit(self.x_gain * x),
            y,
            z,
            locked,
        }
    }

    /// Errors before the dead zone and the horizontal gain
    pub fn raw_errors(&self, target: &Detection, frame_width: f64, frame_height: f64) -> (f64, f64, f64) {
        let bbox = &target.bbox;

        let x = clamp_unit(2.0 * bbox.center_x() / frame_width - 1.0);

        let adjusted_y = frame_height - bbox.y - self.offset_for(&target.label) * bbox.height;
        let y = clamp_unit(2.0 * adjusted_y / frame_height - 1.0);

        let size = bbox.area() / (frame_width * frame_height);
        let z = clamp_unit(self.z_scale * size - 1.0);

        (x, y, z)
    }

    fn offset_for(&self, label: &str) -> f64 {
        self.label_offsets
            .get(label)
            .copied()
            .unwrap_or(self.default_offset)
    }
}

/// Clamp to `[-1, 1]`; NaN collapses to 0
fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}
