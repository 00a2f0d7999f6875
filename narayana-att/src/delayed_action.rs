//! Cancellable, re-armable delayed action
//!
//! A `DelayedAction` runs its task after a delay and keeps repeating it for as
//! long as it stays enabled. Every arm carries a generation number; a timer
//! only fires if its generation is still current when it wakes up. Disabling
//! aborts a sleeping timer outright. A fire that is already running is allowed
//! to finish, then notices it is stale and stops.

use crate::error::AttentionError;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Work performed when a delayed action fires
#[async_trait]
pub trait DelayedTask: Send + Sync + 'static {
    async fn run(&self) -> Result<(), AttentionError>;
}

/// What to do with the repeat cycle when the task fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionErrorPolicy {
    /// Log the failure and keep repeating
    ContinueOnError,
    /// Log the failure and stop until re-armed
    StopOnError,
}

impl Default for ActionErrorPolicy {
    fn default() -> Self {
        ActionErrorPolicy::ContinueOnError
    }
}

struct ArmState {
    enabled: bool,
    generation: u64,
    /// Generation whose task body is currently executing
    firing: Option<u64>,
    armed: Option<(u64, JoinHandle<()>)>,
}

struct Shared {
    name: String,
    task: Arc<dyn DelayedTask>,
    repeat_delay: Duration,
    policy: ActionErrorPolicy,
    state: Mutex<ArmState>,
}

pub struct DelayedAction {
    delay: Duration,
    shared: Arc<Shared>,
}

impl DelayedAction {
    /// Create an enabled, unarmed action. Repeats use `delay` unless
    /// `with_repeat_delay` says otherwise.
    pub fn new(name: impl Into<String>, delay: Duration, task: Arc<dyn DelayedTask>) -> Self {
        Self {
            delay,
            shared: Arc::new(Shared {
                name: name.into(),
                task,
                repeat_delay: delay,
                policy: ActionErrorPolicy::default(),
                state: Mutex::new(ArmState {
                    enabled: true,
                    generation: 0,
                    firing: None,
                    armed: None,
                }),
            }),
        }
    }

    pub fn with_repeat_delay(mut self, repeat_delay: Duration) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.repeat_delay = repeat_delay,
            None => warn!(action = %self.shared.name, "Repeat delay ignored on an armed action"),
        }
        self
    }

    pub fn with_error_policy(mut self, policy: ActionErrorPolicy) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.policy = policy,
            None => warn!(action = %self.shared.name, "Error policy ignored on an armed action"),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.state.lock().enabled
    }

    /// Whether a timer is currently pending or repeating
    pub fn is_armed(&self) -> bool {
        let state = self.shared.state.lock();
        state.enabled && state.armed.is_some()
    }

    /// Arm a fresh delay window if enabled, replacing any pending timer
    pub fn schedule(&self) {
        let mut state = self.shared.state.lock();
        if state.enabled {
            self.arm(&mut state);
        }
    }

    /// Enable or disable the action.
    ///
    /// Enabling arms a full delay window; disabling cancels the pending timer
    /// without running the task. Setting the current value again does nothing.
    pub fn set(&self, enabled: bool) {
        let mut state = self.shared.state.lock();
        if state.enabled == enabled {
            return;
        }
        state.enabled = enabled;

        if enabled {
            debug!(action = %self.shared.name, "Delayed action enabled");
            self.arm(&mut state);
        } else {
            debug!(action = %self.shared.name, "Delayed action disabled");
            disarm(&mut state);
        }
    }

    /// Cancel everything, including a fire in progress
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.enabled = false;
        state.generation = state.generation.wrapping_add(1);
        if let Some((_, handle)) = state.armed.take() {
            handle.abort();
        }
    }

    fn arm(&self, state: &mut ArmState) {
        disarm(state);
        let generation = state.generation;
        let handle = tokio::spawn(run_timer(self.shared.clone(), generation, self.delay));
        state.armed = Some((generation, handle));
    }
}

impl Drop for DelayedAction {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Invalidate the current generation; abort its timer unless it is mid-fire
fn disarm(state: &mut ArmState) {
    state.generation = state.generation.wrapping_add(1);
    if let Some((generation, handle)) = state.armed.take() {
        if state.firing != Some(generation) {
            handle.abort();
        }
    }
}

async fn run_timer(shared: Arc<Shared>, generation: u64, first_delay: Duration) {
    let mut delay = first_delay;

    loop {
        tokio::time::sleep(delay).await;

        {
            let mut state = shared.state.lock();
            if state.generation != generation || !state.enabled {
                return;
            }
            state.firing = Some(generation);
        }

        debug!(action = %shared.name, "Delayed action firing");
        let result = match AssertUnwindSafe(shared.task.run()).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(AttentionError::Action(format!("{} panicked", shared.name))),
        };

        let mut state = shared.state.lock();
        if state.firing == Some(generation) {
            state.firing = None;
        }

        if let Err(e) = &result {
            warn!(action = %shared.name, "Delayed action failed: {}", e);
        }

        if state.generation != generation || !state.enabled {
            debug!(action = %shared.name, "Delayed action cancelled while firing");
            return;
        }

        if result.is_err() && shared.policy == ActionErrorPolicy::StopOnError {
            error!(action = %shared.name, "Stopping delayed action after failure");
            state.armed = None;
            return;
        }

        delay = shared.repeat_delay;
    }
}
