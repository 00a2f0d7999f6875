//! Configuration for narayana-att

use crate::delayed_action::ActionErrorPolicy;
use crate::error::AttentionError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Attention loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    /// Target selection settings
    pub selection: SelectionConfig,
    /// Error shaping settings
    pub shaper: ShaperConfig,
    /// Error to servo axis mapping
    pub servo: ServoGains,
    /// Frame-rate throttling settings
    pub throttle: ThrottleConfig,
    /// Idle exploration settings
    pub exploration: ExplorationConfig,
    /// Status announcement settings
    pub status: StatusConfig,
    /// Only send relative servo commands when the channel has a listener
    pub require_servo_listener: bool,
    /// Publish the selected target on the tracking channel
    pub publish_tracking: bool,
    /// Capacity of the inbound frame queue
    pub inbound_buffer: usize,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            selection: SelectionConfig::default(),
            shaper: ShaperConfig::default(),
            servo: ServoGains::default(),
            throttle: ThrottleConfig::default(),
            exploration: ExplorationConfig::default(),
            status: StatusConfig::default(),
            require_servo_listener: true,
            publish_tracking: false,
            inbound_buffer: 64,
        }
    }
}

/// Labels eligible for tracking, highest priority first
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub labels: Vec<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            labels: vec!["cat".to_string(), "dog".to_string(), "person".to_string()],
        }
    }
}

/// Bounding box to error signal shaping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaperConfig {
    /// Frame width the detector reports boxes in (pixels)
    pub frame_width: f64,
    /// Frame height the detector reports boxes in (pixels)
    pub frame_height: f64,
    /// Horizontal gain applied after the dead zone
    pub x_gain: f64,
    /// Scale applied to the box/frame area ratio for the depth error
    pub z_scale: f64,
    /// Radius around the frame center where x/y errors are suppressed
    pub dead_zone_radius: f64,
    /// Fraction of box height subtracted from the box top, per label
    pub label_offsets: HashMap<String, f64>,
    /// Fraction used for labels without an entry in `label_offsets`
    pub default_offset: f64,
}

impl Default for ShaperConfig {
    fn default() -> Self {
        let mut label_offsets = HashMap::new();
        label_offsets.insert("person".to_string(), 0.3);

        Self {
            frame_width: 640.0,
            frame_height: 360.0,
            x_gain: 1.5,
            z_scale: 3.0,
            dead_zone_radius: 0.1,
            label_offsets,
            default_offset: 0.5,
        }
    }
}

/// Per-axis gains from shaped errors to relative servo degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoGains {
    pub pan: f64,
    pub tilt0: f64,
    pub tilt1: f64,
}

impl Default for ServoGains {
    fn default() -> Self {
        Self {
            pan: -3.0,
            tilt0: 1.0,
            tilt1: -2.0,
        }
    }
}

/// Frame-rate throttling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub high_fps: f64,
    pub low_fps: f64,
    /// Debounce before dropping to the low rate
    pub drop_delay_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            high_fps: 30.0,
            low_fps: 5.0,
            drop_delay_ms: 3000,
        }
    }
}

impl ThrottleConfig {
    pub fn drop_delay(&self) -> Duration {
        Duration::from_millis(self.drop_delay_ms)
    }
}

/// Idle exploration sweeps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    pub enabled: bool,
    /// Time without a target before the first sweep
    pub initial_delay_ms: u64,
    /// Time between consecutive sweeps
    pub sweep_interval_ms: u64,
    pub pan_range_deg: (f64, f64),
    pub tilt0_deg: f64,
    pub tilt1_range_deg: (f64, f64),
    pub speed_dps: f64,
    pub error_policy: ActionErrorPolicy,
    /// Fixed RNG seed for reproducible sweeps
    pub seed: Option<u64>,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 5000,
            sweep_interval_ms: 10_000,
            pan_range_deg: (-120.0, 120.0),
            tilt0_deg: 0.0,
            tilt1_range_deg: (-45.0, 45.0),
            speed_dps: 15.0,
            error_policy: ActionErrorPolicy::ContinueOnError,
            seed: None,
        }
    }
}

impl ExplorationConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Spoken status announcements
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub period_ms: u64,
    /// Announce again when the same label returns after the target was lost
    pub announce_on_reappear: bool,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_ms: 1000,
            announce_on_reappear: false,
        }
    }
}

impl StatusConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl AttentionConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AttentionError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text; missing fields take defaults
    pub fn from_toml_str(content: &str) -> Result<Self, AttentionError> {
        let config: AttentionConfig = toml::from_str(content)?;
        config.validate().map_err(AttentionError::Config)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.selection.labels.is_empty() {
            return Err("At least one tracked label is required".to_string());
        }
        if self.selection.labels.iter().any(|l| l.trim().is_empty()) {
            return Err("Tracked labels must be non-empty".to_string());
        }

        let shaper = &self.shaper;
        if !(shaper.frame_width.is_finite() && shaper.frame_width > 0.0)
            || !(shaper.frame_height.is_finite() && shaper.frame_height > 0.0)
        {
            return Err("Frame dimensions must be positive".to_string());
        }
        if !shaper.x_gain.is_finite() || !shaper.z_scale.is_finite() {
            return Err("Shaper gains must be finite".to_string());
        }
        if !(0.0..=1.0).contains(&shaper.dead_zone_radius) {
            return Err("dead_zone_radius must be between 0.0 and 1.0".to_string());
        }
        let offsets_ok = shaper
            .label_offsets
            .values()
            .chain(std::iter::once(&shaper.default_offset))
            .all(|o| (0.0..=1.0).contains(o));
        if !offsets_ok {
            return Err("Label offsets must be between 0.0 and 1.0".to_string());
        }

        let servo = &self.servo;
        if !(servo.pan.is_finite() && servo.tilt0.is_finite() && servo.tilt1.is_finite()) {
            return Err("Servo gains must be finite".to_string());
        }

        let throttle = &self.throttle;
        if !(throttle.low_fps > 0.0 && throttle.low_fps.is_finite()) {
            return Err("low_fps must be positive".to_string());
        }
        if !(throttle.high_fps >= throttle.low_fps && throttle.high_fps.is_finite()) {
            return Err("high_fps must be at least low_fps".to_string());
        }

        let exploration = &self.exploration;
        if exploration.sweep_interval_ms == 0 {
            return Err("sweep_interval_ms must be > 0".to_string());
        }
        let (pan_min, pan_max) = exploration.pan_range_deg;
        let (tilt_min, tilt_max) = exploration.tilt1_range_deg;
        if !(pan_min <= pan_max && pan_min.is_finite() && pan_max.is_finite()) {
            return Err("pan_range_deg must be an ordered finite range".to_string());
        }
        if !(tilt_min <= tilt_max && tilt_min.is_finite() && tilt_max.is_finite()) {
            return Err("tilt1_range_deg must be an ordered finite range".to_string());
        }
        if !(exploration.speed_dps > 0.0 && exploration.speed_dps.is_finite()) {
            return Err("speed_dps must be positive".to_string());
        }

        if self.status.period_ms == 0 {
            return Err("status period_ms must be > 0".to_string());
        }
        if self.inbound_buffer == 0 {
            return Err("inbound_buffer must be > 0".to_string());
        }

        Ok(())
    }
}
