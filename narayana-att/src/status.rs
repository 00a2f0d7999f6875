//! Spoken status: announces the tracked label when it changes

use crate::bus::{channels, BusMessage, MessageBus};
use crate::messages::Detection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Decides when a label is worth announcing
#[derive(Debug, Clone, Default)]
pub struct StatusReporter {
    last_announced: Option<String>,
    announce_on_reappear: bool,
}

impl StatusReporter {
    pub fn new(announce_on_reappear: bool) -> Self {
        Self {
            last_announced: None,
            announce_on_reappear,
        }
    }

    /// Feed the current target; returns the announcement text, if any
    pub fn observe(&mut self, current: Option<&Detection>) -> Option<String> {
        let Some(target) = current else {
            if self.announce_on_reappear {
                self.last_announced = None;
            }
            return None;
        };

        if self.last_announced.as_deref() == Some(target.label.as_str()) {
            return None;
        }

        self.last_announced = Some(target.label.clone());
        Some(announcement(&target.label))
    }
}

pub fn announcement(label: &str) -> String {
    format!("Tracking a {}.", label)
}

/// Poll the current target every `period` and publish announcements on "say"
pub fn spawn_status_reporter(
    mut reporter: StatusReporter,
    target: watch::Receiver<Option<Detection>>,
    bus: Arc<dyn MessageBus>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let current = target.borrow().clone();
            debug!("Current target: {:?}", current.as_ref().map(|t| &t.label));

            if let Some(text) = reporter.observe(current.as_ref()) {
                if let Err(e) = bus.publish(channels::SAY, BusMessage::Say(text)).await {
                    warn!("Failed to publish status: {}", e);
                }
            }
        }
    })
}
