//! Publish/subscribe seam towards the rest of the robot
//!
//! The real mesh transport lives outside this crate. `MessageBus` is the
//! contract it has to satisfy; `LocalBus` is an in-process implementation
//! backed by one broadcast channel per topic.

use crate::error::AttentionError;
use crate::messages::{Detection, DetectionFrame, RateLimit, ServoDelta, ServoPosition};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;

/// Channel names shared with the other nodes
pub mod channels {
    pub const DETECTIONS: &str = "detections";
    pub const TRACKING: &str = "tracking";
    pub const SERVO_DELTA: &str = "servo-delta";
    pub const SERVO_ABSOLUTE: &str = "servo-absolute";
    pub const RATE_LIMIT: &str = "rate-limit";
    pub const SAY: &str = "say";

    pub const OUTBOUND: [&str; 5] = [TRACKING, SERVO_DELTA, SERVO_ABSOLUTE, RATE_LIMIT, SAY];
}

/// Every payload that crosses the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BusMessage {
    Detections(DetectionFrame),
    Tracking(Option<Detection>),
    ServoDelta(ServoDelta),
    ServoPosition(ServoPosition),
    RateLimit(RateLimit),
    Say(String),
}

/// Transport contract used by the attention loop
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message on a channel
    async fn publish(&self, channel: &str, message: BusMessage) -> Result<(), AttentionError>;

    /// Whether anything is currently listening on a channel
    fn has_listener(&self, channel: &str) -> bool;
}

/// In-process bus
pub struct LocalBus {
    channels: RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
    capacity: usize,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a channel, creating it on first use
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<BusMessage> {
        if let Some(sender) = self.channels.read().get(channel) {
            return sender.subscribe();
        }

        let mut channels = self.channels.write();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, channel: &str, message: BusMessage) -> Result<(), AttentionError> {
        let sender = self.channels.read().get(channel).cloned();
        match sender {
            Some(sender) if sender.receiver_count() > 0 => {
                // Receivers can only vanish between the check and the send; that is a drop, not a failure.
                if sender.send(message).is_err() {
                    debug!("All listeners on {} went away, message dropped", channel);
                }
            }
            _ => debug!("No listeners on {}, message dropped", channel),
        }
        Ok(())
    }

    fn has_listener(&self, channel: &str) -> bool {
        self.channels
            .read()
            .get(channel)
            .map(|s| s.receiver_count() > 0)
            .unwrap_or(false)
    }
}
