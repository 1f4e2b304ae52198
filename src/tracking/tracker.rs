use serde::Serialize;

use super::pid::PidController;
use crate::detect::BallPosition;

pub const PAN_MIN_DEG: f64 = 0.0;
pub const PAN_MAX_DEG: f64 = 180.0;
pub const PAN_CENTER_DEG: f64 = 90.0;
/// Tilt is not actuated on the 1-axis mount; it is reported at its rest angle.
pub const TILT_FIXED_DEG: f64 = 90.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerState {
    Idle,
    Tracking,
    Lost,
}

impl TrackerState {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackerState::Idle => "idle",
            TrackerState::Tracking => "tracking",
            TrackerState::Lost => "lost",
        }
    }
}

/// Current servo output. Only the tracker writes it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ServoCommand {
    pub pan_angle: f64,
    pub tilt_angle: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct TrackerConfig {
    pub frame_width: u32,
    pub frame_height: u32,
    /// Consecutive missed frames tolerated before the track is declared lost.
    pub max_frames_lost: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            frame_width: 640,
            frame_height: 480,
            max_frames_lost: 30,
        }
    }
}

/// Ball tracking state machine driving the pan servo through a PID corrector.
///
/// `Idle` until the first detection, `Tracking` while detections arrive, `Lost`
/// after more than `max_frames_lost` consecutive misses. The PID history is
/// dropped on entering `Lost` so a resumed track starts clean.
#[derive(Debug)]
pub struct BallTracker {
    config: TrackerConfig,
    pid: PidController,
    state: TrackerState,
    pan_angle: f64,
    frames_since_detection: u32,
    last_position: Option<BallPosition>,
}

impl BallTracker {
    pub fn new(pid: PidController, config: TrackerConfig) -> Self {
        Self {
            config,
            pid,
            state: TrackerState::Idle,
            pan_angle: PAN_CENTER_DEG,
            frames_since_detection: 0,
            last_position: None,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn pan_angle(&self) -> f64 {
        self.pan_angle
    }

    pub fn servo_command(&self) -> ServoCommand {
        ServoCommand {
            pan_angle: self.pan_angle,
            tilt_angle: TILT_FIXED_DEG,
        }
    }

    pub fn frames_since_detection(&self) -> u32 {
        self.frames_since_detection
    }

    pub fn last_position(&self) -> Option<BallPosition> {
        self.last_position
    }

    pub fn pid(&self) -> &PidController {
        &self.pid
    }

    pub fn pid_mut(&mut self) -> &mut PidController {
        &mut self.pid
    }

    /// Feed one frame's detection (or miss) and return the pan angle to command.
    pub fn update(&mut self, detection: Option<BallPosition>) -> f64 {
        match detection {
            Some(position) => self.on_detection(position),
            None => self.on_miss(),
        }
        self.pan_angle
    }

    /// Back to `Idle` at the center angle with a fresh PID.
    pub fn reset(&mut self) {
        self.pid.reset();
        self.pan_angle = PAN_CENTER_DEG;
        self.frames_since_detection = 0;
        self.last_position = None;
        self.set_state(TrackerState::Idle);
    }

    fn on_detection(&mut self, position: BallPosition) {
        let error = self.horizontal_error(position.center_x);
        let delta = self.pid.update(error);
        let next = self.pan_angle + delta;
        if next.is_finite() {
            self.pan_angle = next.clamp(PAN_MIN_DEG, PAN_MAX_DEG);
        }
        self.frames_since_detection = 0;
        self.last_position = Some(position);
        self.set_state(TrackerState::Tracking);
    }

    fn on_miss(&mut self) {
        self.frames_since_detection = self.frames_since_detection.saturating_add(1);
        if self.state == TrackerState::Tracking
            && self.frames_since_detection > self.config.max_frames_lost
        {
            self.pid.reset();
            self.set_state(TrackerState::Lost);
        }
    }

    // Sign is inverted to match the servo mounting orientation.
    fn horizontal_error(&self, ball_x: f64) -> f64 {
        let center_x = self.config.frame_width as f64 / 2.0;
        if center_x <= 0.0 || !ball_x.is_finite() {
            return 0.0;
        }
        (-(ball_x - center_x) / center_x).clamp(-1.0, 1.0)
    }

    fn set_state(&mut self, next: TrackerState) {
        if self.state != next {
            log::info!(
                "tracker state {} -> {}",
                self.state.as_str(),
                next.as_str()
            );
            self.state = next;
        }
    }
}
