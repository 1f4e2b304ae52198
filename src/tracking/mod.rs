//! Camera-servo tracking.
//!
//! - `pid`: single-axis PID corrector with anti-windup.
//! - `tracker`: IDLE/TRACKING/LOST state machine that turns per-frame ball
//!   positions into a pan angle in `[0, 180]`.

pub mod pid;
pub mod tracker;

pub use pid::{PidConfig, PidController};
pub use tracker::{
    BallTracker, ServoCommand, TrackerConfig, TrackerState, PAN_CENTER_DEG, PAN_MAX_DEG, PAN_MIN_DEG,
    TILT_FIXED_DEG,
};
