//! Scenario tests for the spawned attention loop, run on paused time

use async_trait::async_trait;
use narayana_att::{
    channels, ActionErrorPolicy, AttentionConfig, AttentionError, AttentionLoop, BoundingBox,
    BusMessage, Detection, DetectionFrame, ErrorShaper, MessageBus,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Bus that records every publish attempt with its (virtual) time
struct RecordingBus {
    listeners: HashSet<String>,
    failing: HashSet<String>,
    sent: Mutex<Vec<(Instant, String, BusMessage)>>,
}

impl RecordingBus {
    fn new(listeners: &[&str]) -> Arc<Self> {
        Self::with_failures(listeners, &[])
    }

    fn with_failures(listeners: &[&str], failing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            listeners: listeners.iter().map(|c| c.to_string()).collect(),
            failing: failing.iter().map(|c| c.to_string()).collect(),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn on(&self, channel: &str) -> Vec<(Instant, BusMessage)> {
        self.sent
            .lock()
            .iter()
            .filter(|(_, c, _)| c == channel)
            .map(|(at, _, m)| (*at, m.clone()))
            .collect()
    }

    fn rates(&self) -> Vec<(Instant, f64)> {
        self.on(channels::RATE_LIMIT)
            .into_iter()
            .filter_map(|(at, m)| match m {
                BusMessage::RateLimit(rate) => Some((at, rate.fps)),
                _ => None,
            })
            .collect()
    }

    fn says(&self) -> Vec<String> {
        self.on(channels::SAY)
            .into_iter()
            .filter_map(|(_, m)| match m {
                BusMessage::Say(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, channel: &str, message: BusMessage) -> Result<(), AttentionError> {
        self.sent
            .lock()
            .push((Instant::now(), channel.to_string(), message));
        if self.failing.contains(channel) {
            return Err(AttentionError::Transport(format!("{} unreachable", channel)));
        }
        Ok(())
    }

    fn has_listener(&self, channel: &str) -> bool {
        self.listeners.contains(channel)
    }
}

fn config() -> AttentionConfig {
    let mut config = AttentionConfig::default();
    config.exploration.seed = Some(11);
    config.status.enabled = false;
    config
}

fn det(label: &str, x: f64, y: f64, w: f64, h: f64) -> Detection {
    Detection::new(label, BoundingBox::new(x, y, w, h))
}

/// Cat box exactly in the middle of a 640x360 frame
fn centered_cat() -> DetectionFrame {
    DetectionFrame::now(vec![det("cat", 270.0, 130.0, 100.0, 100.0)])
}

fn off_center_cat() -> DetectionFrame {
    DetectionFrame::now(vec![det("cat", 0.0, 130.0, 100.0, 100.0)])
}

fn empty() -> DetectionFrame {
    DetectionFrame::now(vec![])
}

fn assert_near(actual: Duration, expected: Duration) {
    let diff = if actual > expected { actual - expected } else { expected - actual };
    assert!(diff <= Duration::from_millis(5), "{:?} is not close to {:?}", actual, expected);
}

/// Let the loop drain its queue without moving far in time
async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_servo_delta_follows_shaped_error() {
    let bus = RecordingBus::new(&[channels::SERVO_DELTA]);
    let config = config();
    let shaper = ErrorShaper::new(&config.shaper).unwrap();
    let handle = AttentionLoop::new(config.clone(), bus.clone()).unwrap().spawn();

    let target = det("dog", 40.0, 20.0, 120.0, 90.0);
    handle
        .submit_frame(DetectionFrame::now(vec![target.clone(), det("plant", 0.0, 0.0, 600.0, 300.0)]))
        .await
        .unwrap();
    settle().await;

    let deltas = bus.on(channels::SERVO_DELTA);
    assert_eq!(deltas.len(), 1);
    let expected = shaper.shape(&target).to_servo_delta(&config.servo);
    assert_eq!(deltas[0].1, BusMessage::ServoDelta(expected));

    // Target left of center pans positive
    if let BusMessage::ServoDelta(delta) = &deltas[0].1 {
        assert!(delta.pan_deg > 0.0);
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_no_servo_delta_without_listener() {
    let bus = RecordingBus::new(&[]);
    let handle = AttentionLoop::new(config(), bus.clone()).unwrap().spawn();

    handle.submit_frame(off_center_cat()).await.unwrap();
    settle().await;
    assert!(bus.on(channels::SERVO_DELTA).is_empty());
    handle.shutdown().await.unwrap();

    let mut config = config();
    config.require_servo_listener = false;
    let bus = RecordingBus::new(&[]);
    let handle = AttentionLoop::new(config, bus.clone()).unwrap().spawn();

    handle.submit_frame(off_center_cat()).await.unwrap();
    settle().await;
    assert_eq!(bus.on(channels::SERVO_DELTA).len(), 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_locked_target_drops_rate_once_after_delay() {
    let bus = RecordingBus::new(&[channels::SERVO_DELTA]);
    let mut config = config();
    config.exploration.enabled = false;
    let handle = AttentionLoop::new(config, bus.clone()).unwrap().spawn();
    let start = Instant::now();

    for _ in 0..6 {
        handle.submit_frame(centered_cat()).await.unwrap();
        sleep(Duration::from_secs(1)).await;
    }
    sleep(Duration::from_secs(4)).await;

    let rates = bus.rates();
    assert_eq!(rates.len(), 1);
    assert_eq!(rates[0].1, 5.0);
    let elapsed = rates[0].0 - start;
    assert!(elapsed >= Duration::from_secs(3));
    assert_near(elapsed, Duration::from_secs(3));

    // Drifting off center restores the high rate immediately
    handle.submit_frame(off_center_cat()).await.unwrap();
    settle().await;
    let rates = bus.rates();
    assert_eq!(rates.len(), 2);
    assert_eq!(rates[1].1, 30.0);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unlocked_target_inside_window_cancels_drop() {
    let bus = RecordingBus::new(&[channels::SERVO_DELTA]);
    let mut config = config();
    config.exploration.enabled = false;
    let handle = AttentionLoop::new(config, bus.clone()).unwrap().spawn();

    // Locked at 0s, 1s and 2s; the drop would be due at 3s
    for step_ms in [1000, 1000, 900] {
        handle.submit_frame(centered_cat()).await.unwrap();
        sleep(Duration::from_millis(step_ms)).await;
    }
    handle.submit_frame(off_center_cat()).await.unwrap();
    sleep(Duration::from_secs(10)).await;

    assert!(bus.rates().is_empty());
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_exploration_sweeps_while_idle() {
    let bus = RecordingBus::new(&[channels::SERVO_DELTA]);
    let handle = AttentionLoop::new(config(), bus.clone()).unwrap().spawn();
    let start = Instant::now();

    handle.submit_frame(empty()).await.unwrap();
    sleep(Duration::from_millis(4900)).await;
    assert!(bus.on(channels::SERVO_ABSOLUTE).is_empty());

    sleep(Duration::from_millis(200)).await;
    let sweeps = bus.on(channels::SERVO_ABSOLUTE);
    assert_eq!(sweeps.len(), 1);
    assert_near(sweeps[0].0 - start, Duration::from_secs(5));

    sleep(Duration::from_secs(10)).await;
    let sweeps = bus.on(channels::SERVO_ABSOLUTE);
    assert_eq!(sweeps.len(), 2);
    assert_near(sweeps[1].0 - sweeps[0].0, Duration::from_secs(10));

    for (_, message) in sweeps {
        match message {
            BusMessage::ServoPosition(pose) => {
                assert!((-120.0..=120.0).contains(&pose.pan_deg));
                assert!((-45.0..=45.0).contains(&pose.tilt1_deg));
                assert_eq!(pose.tilt0_deg, 0.0);
                assert_eq!(pose.speed_dps, 15.0);
            }
            other => panic!("Unexpected sweep message: {:?}", other),
        }
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_target_stops_exploration_and_loss_restarts_window() {
    let bus = RecordingBus::new(&[channels::SERVO_DELTA]);
    let handle = AttentionLoop::new(config(), bus.clone()).unwrap().spawn();

    handle.submit_frame(empty()).await.unwrap();
    sleep(Duration::from_secs(6)).await;
    assert_eq!(bus.on(channels::SERVO_ABSOLUTE).len(), 1);

    handle.submit_frame(off_center_cat()).await.unwrap();
    sleep(Duration::from_secs(30)).await;
    assert_eq!(bus.on(channels::SERVO_ABSOLUTE).len(), 1);

    // Losing the target waits the full initial delay again
    handle.submit_frame(empty()).await.unwrap();
    let lost_at = Instant::now();
    sleep(Duration::from_secs(6)).await;
    let sweeps = bus.on(channels::SERVO_ABSOLUTE);
    assert_eq!(sweeps.len(), 2);
    assert_near(sweeps[1].0 - lost_at, Duration::from_secs(5));

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_tracking_notification_gates_exploration() {
    let bus = RecordingBus::new(&[]);
    let handle = AttentionLoop::new(config(), bus.clone()).unwrap().spawn();

    handle
        .submit_tracking(Some(det("person", 10.0, 10.0, 50.0, 50.0)))
        .await
        .unwrap();
    sleep(Duration::from_secs(20)).await;

    assert!(bus.on(channels::SERVO_ABSOLUTE).is_empty());
    assert!(bus.rates().is_empty());
    let target = handle.subscribe_target().borrow().clone();
    assert_eq!(target.unwrap().label, "person");

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_status_announces_label_changes_only() {
    let bus = RecordingBus::new(&[]);
    let mut config = config();
    config.status.enabled = true;
    config.exploration.enabled = false;
    let handle = AttentionLoop::new(config, bus.clone()).unwrap().spawn();

    handle.submit_frame(off_center_cat()).await.unwrap();
    sleep(Duration::from_millis(3500)).await;
    assert_eq!(bus.says(), vec!["Tracking a cat."]);

    handle
        .submit_frame(DetectionFrame::now(vec![det("dog", 0.0, 0.0, 50.0, 50.0)]))
        .await
        .unwrap();
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(bus.says(), vec!["Tracking a cat.", "Tracking a dog."]);

    // Losing the target is silent
    handle.submit_frame(empty()).await.unwrap();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(bus.says().len(), 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_publish_tracking_when_enabled() {
    let bus = RecordingBus::new(&[]);
    let mut config = config();
    config.publish_tracking = true;
    let handle = AttentionLoop::new(config, bus.clone()).unwrap().spawn();

    handle.submit_frame(off_center_cat()).await.unwrap();
    handle.submit_frame(empty()).await.unwrap();
    settle().await;

    let tracking: Vec<BusMessage> = bus
        .on(channels::TRACKING)
        .into_iter()
        .map(|(_, m)| m)
        .collect();
    assert_eq!(tracking.len(), 2);
    assert!(matches!(&tracking[0], BusMessage::Tracking(Some(t)) if t.label == "cat"));
    assert_eq!(tracking[1], BusMessage::Tracking(None));

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_timers() {
    let bus = RecordingBus::new(&[]);
    let mut config = config();
    config.status.enabled = true;
    let handle = AttentionLoop::new(config, bus.clone()).unwrap().spawn();

    // Arms both the rate drop and the exploration timer
    handle.submit_frame(empty()).await.unwrap();
    settle().await;
    handle.shutdown().await.unwrap();

    let published = bus.sent.lock().len();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(bus.sent.lock().len(), published);
    assert!(bus.rates().is_empty());
    assert!(bus.on(channels::SERVO_ABSOLUTE).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_target_watch() {
    let bus = RecordingBus::new(&[]);
    let handle = AttentionLoop::new(config(), bus).unwrap().spawn();
    let target = handle.subscribe_target();

    handle.shutdown().await.unwrap();
    assert!(target.has_changed().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_transport_failures_do_not_stop_exploration() {
    let bus = RecordingBus::with_failures(&[], &[channels::SERVO_ABSOLUTE]);
    let handle = AttentionLoop::new(config(), bus.clone()).unwrap().spawn();

    handle.submit_frame(empty()).await.unwrap();
    sleep(Duration::from_secs(26)).await;
    assert_eq!(bus.on(channels::SERVO_ABSOLUTE).len(), 3);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_frame_publishes_do_not_stall_tracking() {
    let bus = RecordingBus::with_failures(
        &[channels::SERVO_DELTA],
        &[channels::SERVO_DELTA, channels::RATE_LIMIT],
    );
    let mut config = config();
    config.exploration.enabled = false;
    let handle = AttentionLoop::new(config, bus.clone()).unwrap().spawn();
    let start = Instant::now();

    handle.submit_frame(off_center_cat()).await.unwrap();
    sleep(Duration::from_secs(1)).await;
    // Locked from 1s, so the drop is due at 4s
    handle.submit_frame(centered_cat()).await.unwrap();
    sleep(Duration::from_secs(1)).await;
    handle.submit_frame(centered_cat()).await.unwrap();
    sleep(Duration::from_secs(6)).await;

    assert_eq!(bus.on(channels::SERVO_DELTA).len(), 3);
    let rates = bus.rates();
    assert_eq!(rates.len(), 1);
    assert_eq!(rates[0].1, 5.0);
    assert_near(rates[0].0 - start, Duration::from_secs(4));

    handle.submit_frame(off_center_cat()).await.unwrap();
    settle().await;
    assert_eq!(bus.on(channels::SERVO_DELTA).len(), 4);
    let rates = bus.rates();
    assert_eq!(rates.len(), 2);
    assert_eq!(rates[1].1, 30.0);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_on_error_policy_halts_exploration() {
    let bus = RecordingBus::with_failures(&[], &[channels::SERVO_ABSOLUTE]);
    let mut config = config();
    config.exploration.error_policy = ActionErrorPolicy::StopOnError;
    let handle = AttentionLoop::new(config, bus.clone()).unwrap().spawn();

    handle.submit_frame(empty()).await.unwrap();
    sleep(Duration::from_secs(26)).await;
    assert_eq!(bus.on(channels::SERVO_ABSOLUTE).len(), 1);

    // Re-arming after a target comes and goes starts a fresh cycle
    handle.submit_frame(off_center_cat()).await.unwrap();
    handle.submit_frame(empty()).await.unwrap();
    sleep(Duration::from_secs(6)).await;
    assert_eq!(bus.on(channels::SERVO_ABSOLUTE).len(), 2);

    handle.shutdown().await.unwrap();
}
