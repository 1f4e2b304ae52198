//! Per-frame control loop.
//!
//! `KeeperLoop::step` runs one frame through capture, detection, tracking,
//! pan output, and the blocking coordinator, in that order. Nothing here
//! waits on the serial link: pan commands go through a bounded queue to a
//! writer thread, and blocking sessions run on the coordinator's worker.

use anyhow::Result;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::blocking::{BallBlocker, BlockerStatistics, SharedLink};
use crate::detect::{find_ball, BallDetection, BallFilter, DetectorBackend, ModelGeometry};
use crate::frame::FrameSource;
use crate::tracking::{BallTracker, ServoCommand, TrackerState, PAN_MAX_DEG, PAN_MIN_DEG};

const FPS_WINDOW: usize = 30;
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const IDLE_BACKOFF: Duration = Duration::from_millis(5);

/// Where the pan servo output goes.
pub trait PanSink: Send {
    /// Hand over the latest pan angle. Must not block.
    fn send_pan(&mut self, pan_angle: f64);

    fn close(&mut self) {}
}

/// Discards pan output (no pan servo fitted).
#[derive(Debug, Default)]
pub struct NullPanSink;

impl PanSink for NullPanSink {
    fn send_pan(&mut self, _pan_angle: f64) {}
}

/// Pan servo channel and its pulse range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PanServo {
    pub servo_id: u8,
    /// Actuator value at 0°.
    pub pwm_min: u16,
    /// Actuator value at 180°.
    pub pwm_max: u16,
}

impl Default for PanServo {
    fn default() -> Self {
        Self {
            servo_id: 0,
            pwm_min: 100,
            pwm_max: 600,
        }
    }
}

impl PanServo {
    /// Linear map of a pan angle onto the actuator range.
    pub fn value_for(&self, pan_angle: f64) -> u16 {
        let angle = if pan_angle.is_finite() {
            pan_angle.clamp(PAN_MIN_DEG, PAN_MAX_DEG)
        } else {
            (PAN_MIN_DEG + PAN_MAX_DEG) / 2.0
        };
        let span = self.pwm_max.saturating_sub(self.pwm_min) as f64;
        let fraction = (angle - PAN_MIN_DEG) / (PAN_MAX_DEG - PAN_MIN_DEG);
        self.pwm_min + (fraction * span).round() as u16
    }
}

/// Sends pan angles as `S` commands on the shared serial link.
///
/// The frame loop only ever `try_send`s into a one-slot queue. The writer
/// thread `try_lock`s the link, so a blocking session holding the link
/// causes pan updates to be skipped rather than queued.
pub struct SerialPanSink {
    servo: PanServo,
    tx: Option<SyncSender<u16>>,
    worker: Option<JoinHandle<()>>,
}

impl SerialPanSink {
    pub fn new(link: SharedLink, servo: PanServo) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(1);
        let worker = std::thread::Builder::new()
            .name("keeper-pan".to_string())
            .spawn(move || write_pan_commands(link, servo, rx))?;
        log::info!(
            "pan output on servo {} (pwm {}..{})",
            servo.servo_id,
            servo.pwm_min,
            servo.pwm_max
        );
        Ok(Self {
            servo,
            tx: Some(tx),
            worker: Some(worker),
        })
    }
}

impl PanSink for SerialPanSink {
    fn send_pan(&mut self, pan_angle: f64) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        match tx.try_send(self.servo.value_for(pan_angle)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::trace!("pan writer busy, dropping update"),
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("pan writer stopped; disabling pan output");
                self.tx = None;
            }
        }
    }

    fn close(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for SerialPanSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn write_pan_commands(link: SharedLink, servo: PanServo, rx: Receiver<u16>) {
    let mut applied: Option<u16> = None;
    while let Ok(mut value) = rx.recv() {
        // Only the newest angle matters.
        loop {
            match rx.try_recv() {
                Ok(newer) => value = newer,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        if applied == Some(value) {
            continue;
        }
        let mut guard = match link.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                log::trace!("serial link busy, skipping pan update");
                continue;
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        if guard.set_actuator(servo.servo_id, value) {
            applied = Some(value);
        }
    }
    log::debug!("pan writer finished");
}

/// Frame counters plus a sliding fps estimate.
#[derive(Clone, Debug, Default)]
pub struct LoopStats {
    pub frames: u64,
    pub detections: u64,
    pub blocks_started: u64,
    pub missed_captures: u64,
    window: VecDeque<Instant>,
}

impl LoopStats {
    pub fn record_frame(&mut self, at: Instant) {
        self.frames += 1;
        if self.window.len() == FPS_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(at);
    }

    /// Frames per second over the last 30 frames. 0 until two frames are in.
    pub fn fps(&self) -> f64 {
        match (self.window.front(), self.window.back()) {
            (Some(first), Some(last)) if self.window.len() > 1 => {
                let span = last.duration_since(*first).as_secs_f64();
                if span > 0.0 {
                    (self.window.len() - 1) as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}

/// Read-only view of the loop for logs and presentation layers.
#[derive(Clone, Debug, Serialize)]
pub struct LoopSnapshot {
    pub frames: u64,
    pub detections: u64,
    pub blocks_started: u64,
    pub fps: f64,
    pub tracker_state: TrackerState,
    pub servo: ServoCommand,
    pub frames_since_detection: u32,
    pub last_ball: Option<BallDetection>,
    pub blocker: BlockerStatistics,
}

/// What one `step` did.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepOutcome {
    /// Sequence of the processed frame, `None` when the source had nothing.
    pub frame: Option<u64>,
    pub ball: Option<BallDetection>,
    pub pan_angle: f64,
    pub block_started: bool,
}

pub struct KeeperLoop {
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    filter: BallFilter,
    geometry: ModelGeometry,
    tracker: BallTracker,
    blocker: Arc<BallBlocker>,
    pan: Box<dyn PanSink>,
    stats: LoopStats,
    last_ball: Option<BallDetection>,
}

impl KeeperLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        mut detector: Box<dyn DetectorBackend>,
        filter: BallFilter,
        geometry: ModelGeometry,
        tracker: BallTracker,
        blocker: Arc<BallBlocker>,
        pan: Box<dyn PanSink>,
    ) -> Result<Self> {
        detector.warm_up()?;
        log::info!(
            "frame loop ready: source={} detector={}",
            source.describe(),
            detector.name()
        );
        Ok(Self {
            source,
            detector,
            filter,
            geometry,
            tracker,
            blocker,
            pan,
            stats: LoopStats::default(),
            last_ball: None,
        })
    }

    pub fn tracker(&self) -> &BallTracker {
        &self.tracker
    }

    pub fn blocker(&self) -> &Arc<BallBlocker> {
        &self.blocker
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Process one frame.
    pub fn step(&mut self) -> Result<StepOutcome> {
        let Some(frame) = self.source.capture_frame()? else {
            self.stats.missed_captures += 1;
            return Ok(StepOutcome {
                pan_angle: self.tracker.pan_angle(),
                ..StepOutcome::default()
            });
        };
        self.stats.record_frame(frame.captured_at);

        let detections = match frame.run_detector(self.detector.as_mut()) {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!("detector {} failed: {:#}", self.detector.name(), e);
                Vec::new()
            }
        };
        let ball = find_ball(
            &detections,
            &self.filter,
            &self.geometry,
            frame.width,
            frame.height,
        );
        if ball.is_some() {
            self.stats.detections += 1;
            self.last_ball = ball;
        }

        let pan_angle = self.tracker.update(ball.map(|b| b.position));
        self.pan.send_pan(pan_angle);

        let block_started = match ball {
            Some(b) => self.blocker.process_ball_detection(
                b.position.center_x,
                b.position.center_y,
                frame.width,
                frame.height,
                b.score,
            ),
            None => false,
        };
        if block_started {
            self.stats.blocks_started += 1;
        }

        Ok(StepOutcome {
            frame: Some(frame.sequence),
            ball,
            pan_angle,
            block_started,
        })
    }

    /// Run until `shutdown` is raised. Capture errors end the loop.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        let mut last_health_log = Instant::now();
        while !shutdown.load(Ordering::SeqCst) {
            let outcome = self.step()?;
            if outcome.frame.is_none() {
                std::thread::sleep(IDLE_BACKOFF);
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let snap = self.snapshot();
                log::info!(
                    "health source_ok={} fps={:.1} frames={} tracker={} pan={:.1} detections={} blocks={}/{} ({:.1}%)",
                    self.source.is_healthy(),
                    snap.fps,
                    snap.frames,
                    snap.tracker_state.as_str(),
                    snap.servo.pan_angle,
                    snap.blocker.total_detections,
                    snap.blocker.successful_blocks,
                    snap.blocker.failed_blocks,
                    snap.blocker.success_rate
                );
                last_health_log = Instant::now();
            }
        }
        log::info!("frame loop stopping after {} frames", self.stats.frames);
        Ok(())
    }

    pub fn snapshot(&self) -> LoopSnapshot {
        LoopSnapshot {
            frames: self.stats.frames,
            detections: self.stats.detections,
            blocks_started: self.stats.blocks_started,
            fps: self.stats.fps(),
            tracker_state: self.tracker.state(),
            servo: self.tracker.servo_command(),
            frames_since_detection: self.tracker.frames_since_detection(),
            last_ball: self.last_ball,
            blocker: self.blocker.get_statistics(),
        }
    }

    /// Stop pan output and the blocking coordinator.
    pub fn close(&mut self) {
        self.pan.close();
        self.blocker.shutdown();
    }
}
