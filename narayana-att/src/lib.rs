//! narayana-att: Attention loop for a pan/tilt robot head
//!
//! Consumes object detections, picks the most interesting target, turns its
//! position into bounded error signals and relative servo commands, throttles
//! the upstream frame rate once the target is centered, and wanders the head
//! around when nothing is in view.
//!
//! Everything talks to the outside world through a `MessageBus`.

pub mod attention_loop;
pub mod bus;
pub mod config;
pub mod delayed_action;
pub mod error;
pub mod explore;
pub mod messages;
pub mod selector;
pub mod shaper;
pub mod status;
pub mod throttle;

pub use attention_loop::{AttentionHandle, AttentionLoop, Inbound};
pub use bus::{channels, BusMessage, LocalBus, MessageBus};
pub use config::AttentionConfig;
pub use delayed_action::{ActionErrorPolicy, DelayedAction, DelayedTask};
pub use error::AttentionError;
pub use messages::{BoundingBox, Detection, DetectionFrame, RateLimit, ServoDelta, ServoPosition};
pub use selector::TargetSelector;
pub use shaper::{ErrorShaper, ShapedError};
pub use throttle::{FrameRate, ThrottleController};
