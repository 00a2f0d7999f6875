//! Attention loop: the single task that owns the tracking state
//!
//! Frames come in through an mpsc queue and are handled one at a time. The
//! current target is owned here and handed to the status reporter and the
//! exploration sweep through a watch channel. The frame-rate debounce deadline
//! is awaited inside the same task, so a rate drop can never interleave with
//! frame handling.

use crate::bus::{channels, BusMessage, MessageBus};
use crate::config::AttentionConfig;
use crate::delayed_action::DelayedAction;
use crate::error::AttentionError;
use crate::explore::ExploreSweep;
use crate::messages::{unix_now, Detection, DetectionFrame, RateLimit, ServoDelta};
use crate::selector::TargetSelector;
use crate::shaper::{ErrorShaper, ShapedError};
use crate::status::{spawn_status_reporter, StatusReporter};
use crate::throttle::{FrameRate, ThrottleController};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Messages accepted by the loop
#[derive(Debug, Clone)]
pub enum Inbound {
    Frame(DetectionFrame),
    /// Target chosen by an external tracker
    Tracking(Option<Detection>),
}

impl Inbound {
    /// Decode one JSON line: a tagged `BusMessage` or a bare `DetectionFrame`.
    ///
    /// Messages that are not inbound traffic decode to `None`.
    pub fn from_json(line: &str) -> Result<Option<Self>, AttentionError> {
        if let Ok(message) = serde_json::from_str::<BusMessage>(line) {
            return Ok(match message {
                BusMessage::Detections(frame) => Some(Inbound::Frame(frame)),
                BusMessage::Tracking(target) => Some(Inbound::Tracking(target)),
                other => {
                    debug!("Ignoring outbound message on input: {:?}", other);
                    None
                }
            });
        }

        let frame: DetectionFrame = serde_json::from_str(line)?;
        Ok(Some(Inbound::Frame(frame)))
    }
}

pub struct AttentionLoop {
    config: AttentionConfig,
    bus: Arc<dyn MessageBus>,
    selector: TargetSelector,
    shaper: ErrorShaper,
    throttle: ThrottleController,
    target: Option<Detection>,
    target_tx: watch::Sender<Option<Detection>>,
    explore: Option<DelayedAction>,
}

impl AttentionLoop {
    /// Build a loop; sweeps use `exploration.seed` or OS entropy
    pub fn new(config: AttentionConfig, bus: Arc<dyn MessageBus>) -> Result<Self, AttentionError> {
        let rng: Box<dyn RngCore + Send> = match config.exploration.seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(StdRng::from_entropy()),
        };
        Self::with_rng(config, bus, rng)
    }

    /// Build a loop with an explicit random source for exploration
    pub fn with_rng(
        config: AttentionConfig,
        bus: Arc<dyn MessageBus>,
        rng: Box<dyn RngCore + Send>,
    ) -> Result<Self, AttentionError> {
        config.validate().map_err(AttentionError::Config)?;

        let selector = TargetSelector::new(config.selection.labels.clone());
        let shaper = ErrorShaper::new(&config.shaper)?;
        let throttle = ThrottleController::new(&config.throttle);
        let (target_tx, target_rx) = watch::channel(None);

        let explore = config.exploration.enabled.then(|| {
            let sweep = ExploreSweep::new(&config.exploration, bus.clone(), target_rx, rng);
            DelayedAction::new("exploration", config.exploration.initial_delay(), Arc::new(sweep))
                .with_repeat_delay(config.exploration.sweep_interval())
                .with_error_policy(config.exploration.error_policy)
        });

        Ok(Self {
            config,
            bus,
            selector,
            shaper,
            throttle,
            target: None,
            target_tx,
            explore,
        })
    }

    pub fn current_target(&self) -> Option<&Detection> {
        self.target.as_ref()
    }

    pub fn throttle(&self) -> &ThrottleController {
        &self.throttle
    }

    pub fn exploration(&self) -> Option<&DelayedAction> {
        self.explore.as_ref()
    }

    pub fn subscribe_target(&self) -> watch::Receiver<Option<Detection>> {
        self.target_tx.subscribe()
    }

    /// Process one detection frame
    pub async fn handle_frame(&mut self, frame: DetectionFrame) -> Option<ShapedError> {
        if let Some(latency) = frame.latency(unix_now()) {
            debug!("Frame latency: {:.3}s", latency);
        }

        let target = self.selector.select(&frame.objects);
        debug!("Tracking: {:?}", target.as_ref().map(|t| &t.label));
        self.update_target(target.clone()).await;

        let now = Instant::now();
        let Some(target) = target else {
            let change = self.throttle.observe(true, now);
            self.apply_rate(change).await;
            return None;
        };

        let shaped = self.shaper.shape(&target);
        debug!(
            "(x, y, z) error: {:.2}, {:.2}, {:.2} locked={}",
            shaped.x, shaped.y, shaped.z, shaped.locked
        );

        let change = self.throttle.observe(shaped.locked, now);
        self.apply_rate(change).await;
        self.send_servo_delta(shaped.to_servo_delta(&self.config.servo)).await;

        Some(shaped)
    }

    /// Accept a target chosen elsewhere; only gates exploration
    pub async fn handle_tracking(&mut self, target: Option<Detection>) {
        self.update_target(target).await;
    }

    /// Complete a due frame-rate drop
    pub async fn poll_throttle(&mut self) {
        let change = self.throttle.poll(Instant::now());
        self.apply_rate(change).await;
    }

    /// Move the loop into its own task
    pub fn spawn(self) -> AttentionHandle {
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_buffer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let target = self.subscribe_target();
        let join = tokio::spawn(self.run(inbound_rx, shutdown_rx));

        AttentionHandle {
            inbound: inbound_tx,
            shutdown: Some(shutdown_tx),
            target,
            join,
        }
    }

    async fn run(mut self, mut inbound: mpsc::Receiver<Inbound>, mut shutdown: oneshot::Receiver<()>) {
        info!("Attention loop started");

        if let Some(explore) = &self.explore {
            debug!("Arming {}, first fire in {:?}", explore.name(), explore.delay());
            explore.schedule();
        }

        let status = self.config.status.enabled.then(|| {
            spawn_status_reporter(
                StatusReporter::new(self.config.status.announce_on_reappear),
                self.target_tx.subscribe(),
                self.bus.clone(),
                self.config.status.period(),
            )
        });

        loop {
            let drop_deadline = self.throttle.pending_drop();

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Attention loop shutting down");
                    break;
                }
                message = inbound.recv() => match message {
                    Some(Inbound::Frame(frame)) => {
                        self.handle_frame(frame).await;
                    }
                    Some(Inbound::Tracking(target)) => self.handle_tracking(target).await,
                    None => {
                        info!("Inbound queue closed, stopping attention loop");
                        break;
                    }
                },
                _ = sleep_until(drop_deadline.unwrap_or_else(Instant::now)), if drop_deadline.is_some() => {
                    self.poll_throttle().await;
                }
            }
        }

        self.stop();
        if let Some(status) = status {
            status.abort();
        }
        info!("Attention loop stopped");
    }

    /// Cancel every pending timer
    fn stop(&mut self) {
        if let Some(explore) = &self.explore {
            explore.shutdown();
        }
        self.throttle.cancel_pending();
    }

    async fn update_target(&mut self, target: Option<Detection>) {
        let absent = target.is_none();
        self.target = target.clone();
        // The sweep reads the watch value, so it has to be current before exploration is toggled
        self.target_tx.send_replace(target.clone());

        if let Some(explore) = &self.explore {
            explore.set(absent);
        }

        if self.config.publish_tracking {
            self.publish(channels::TRACKING, BusMessage::Tracking(target)).await;
        }
    }

    async fn apply_rate(&mut self, change: Option<FrameRate>) {
        let Some(rate) = change else {
            return;
        };
        let fps = self.throttle.fps(rate);
        info!("Frame rate -> {:?} ({} fps)", rate, fps);
        self.publish(channels::RATE_LIMIT, BusMessage::RateLimit(RateLimit { fps }))
            .await;
    }

    async fn send_servo_delta(&self, delta: ServoDelta) {
        if self.config.require_servo_listener && !self.bus.has_listener(channels::SERVO_DELTA) {
            debug!("No servo listener, skipping relative command");
            return;
        }
        self.publish(channels::SERVO_DELTA, BusMessage::ServoDelta(delta))
            .await;
    }

    async fn publish(&self, channel: &str, message: BusMessage) {
        match self.bus.publish(channel, message).await {
            Ok(()) => {}
            Err(e) if e.is_transient() => warn!("Failed to publish on {}: {}", channel, e),
            Err(e) => error!("Publishing on {} failed: {}", channel, e),
        }
    }
}

impl Drop for AttentionLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle to a spawned attention loop
pub struct AttentionHandle {
    inbound: mpsc::Sender<Inbound>,
    shutdown: Option<oneshot::Sender<()>>,
    target: watch::Receiver<Option<Detection>>,
    join: JoinHandle<()>,
}

impl AttentionHandle {
    pub async fn submit_frame(&self, frame: DetectionFrame) -> Result<(), AttentionError> {
        self.submit(Inbound::Frame(frame)).await
    }

    pub async fn submit_tracking(&self, target: Option<Detection>) -> Result<(), AttentionError> {
        self.submit(Inbound::Tracking(target)).await
    }

    pub async fn submit(&self, message: Inbound) -> Result<(), AttentionError> {
        self.inbound
            .send(message)
            .await
            .map_err(|_| AttentionError::Channel("Attention loop is not running".to_string()))
    }

    pub fn subscribe_target(&self) -> watch::Receiver<Option<Detection>> {
        self.target.clone()
    }

    /// Stop the loop and wait for it to cancel its timers
    pub async fn shutdown(mut self) -> Result<(), AttentionError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        (&mut self.join)
            .await
            .map_err(|e| AttentionError::Channel(format!("Attention loop task failed: {}", e)))
    }
}
