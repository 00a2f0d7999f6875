//! Idle exploration sweeps
//!
//! While nothing is tracked the head wanders to random absolute poses so the
//! detector gets to see more of the room.

use crate::bus::{channels, BusMessage, MessageBus};
use crate::config::ExplorationConfig;
use crate::delayed_action::DelayedTask;
use crate::error::AttentionError;
use crate::messages::{Detection, ServoPosition};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, RngCore};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Sweep task driven by a `DelayedAction`
pub struct ExploreSweep {
    bus: Arc<dyn MessageBus>,
    target: watch::Receiver<Option<Detection>>,
    rng: Mutex<Box<dyn RngCore + Send>>,
    pan_range_deg: (f64, f64),
    tilt0_deg: f64,
    tilt1_range_deg: (f64, f64),
    speed_dps: f64,
}

impl ExploreSweep {
    pub fn new(
        config: &ExplorationConfig,
        bus: Arc<dyn MessageBus>,
        target: watch::Receiver<Option<Detection>>,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        Self {
            bus,
            target,
            rng: Mutex::new(rng),
            pan_range_deg: config.pan_range_deg,
            tilt0_deg: config.tilt0_deg,
            tilt1_range_deg: config.tilt1_range_deg,
            speed_dps: config.speed_dps,
        }
    }

    /// Draw the next sweep pose
    pub fn next_pose(&self) -> ServoPosition {
        let mut rng = self.rng.lock();
        ServoPosition {
            pan_deg: uniform(&mut **rng, self.pan_range_deg),
            tilt0_deg: self.tilt0_deg,
            tilt1_deg: uniform(&mut **rng, self.tilt1_range_deg),
            speed_dps: self.speed_dps,
        }
    }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, (min, max): (f64, f64)) -> f64 {
    if min < max {
        rng.gen_range(min..=max)
    } else {
        min
    }
}

#[async_trait]
impl DelayedTask for ExploreSweep {
    async fn run(&self) -> Result<(), AttentionError> {
        if self.target.borrow().is_some() {
            debug!("Target present, skipping exploration sweep");
            return Ok(());
        }

        let pose = self.next_pose();
        info!(
            "Exploring: pan {:.1}, tilt1 {:.1}",
            pose.pan_deg, pose.tilt1_deg
        );
        self.bus
            .publish(channels::SERVO_ABSOLUTE, BusMessage::ServoPosition(pose))
            .await
            .map_err(|e| AttentionError::Action(format!("Exploration sweep failed: {}", e)))
    }
}
