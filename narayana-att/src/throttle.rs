//! Hysteretic upstream frame-rate throttling
//!
//! The camera runs at the high rate while a target needs correcting. Once the
//! target is centered, or gone, the controller waits out a debounce window
//! before asking for the low rate. A target that drifts off center cancels a
//! pending drop, and restores the high rate immediately if it was already low.

use crate::config::ThrottleConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Upstream sampling rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRate {
    High,
    Low,
}

#[derive(Debug, Clone)]
pub struct ThrottleController {
    high_fps: f64,
    low_fps: f64,
    drop_delay: Duration,
    rate: FrameRate,
    pending_drop: Option<Instant>,
}

impl ThrottleController {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            high_fps: config.high_fps,
            low_fps: config.low_fps,
            drop_delay: config.drop_delay(),
            rate: FrameRate::High,
            pending_drop: None,
        }
    }

    pub fn rate(&self) -> FrameRate {
        self.rate
    }

    pub fn fps(&self, rate: FrameRate) -> f64 {
        match rate {
            FrameRate::High => self.high_fps,
            FrameRate::Low => self.low_fps,
        }
    }

    /// Deadline of the pending drop to the low rate, if one is armed
    pub fn pending_drop(&self) -> Option<Instant> {
        self.pending_drop
    }

    /// Record one observation. `settled` means the target is absent or locked.
    ///
    /// Returns the new rate when the effective rate changed.
    pub fn observe(&mut self, settled: bool, now: Instant) -> Option<FrameRate> {
        if settled {
            if self.rate == FrameRate::High && self.pending_drop.is_none() {
                self.pending_drop = Some(now + self.drop_delay);
            }
            return None;
        }

        self.pending_drop = None;
        if self.rate == FrameRate::Low {
            self.rate = FrameRate::High;
            return Some(FrameRate::High);
        }
        None
    }

    /// Complete a pending drop whose deadline has passed
    pub fn poll(&mut self, now: Instant) -> Option<FrameRate> {
        match self.pending_drop {
            Some(deadline) if now >= deadline => {
                self.pending_drop = None;
                if self.rate == FrameRate::Low {
                    return None;
                }
                self.rate = FrameRate::Low;
                Some(FrameRate::Low)
            }
            _ => None,
        }
    }

    /// Forget any pending drop without changing the rate
    pub fn cancel_pending(&mut self) {
        self.pending_drop = None;
    }
}
