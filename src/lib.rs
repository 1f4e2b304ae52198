//! Goalkeeper robot control loop.
//!
//! A camera follows the ball with a pan servo, and a two-legged blocker is
//! fired on the side the ball approaches, once a microcontroller confirms the
//! crossing with its distance sensor.
//!
//! # Module Structure
//!
//! - `tracking`: PID corrector and the IDLE/TRACKING/LOST ball tracker
//! - `blocking`: side classification and the single-session blocking coordinator
//! - `serial`: line protocol to the microcontroller, TTY and simulated transports
//! - `detect`: detector seam and ball selection from model-space detections
//! - `frame` / `ingest`: captured frames and the sources that produce them
//! - `pipeline`: the per-frame loop tying everything together
//! - `config`: `KeeperConfig` loading (file, environment, validation)

pub mod blocking;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod serial;
pub mod tracking;

pub use blocking::{
    shared_link, BallBlocker, BlockSide, BlockerConfig, BlockerStatistics, SharedLink,
    SideThresholds,
};
pub use config::KeeperConfig;
pub use detect::{
    find_ball, BBox, BallDetection, BallFilter, BallPosition, BrightBlobBackend, Detection,
    DetectorBackend, ModelGeometry,
};
pub use frame::{Frame, FrameSource};
pub use ingest::{open_source, SyntheticConfig, SyntheticSource};
pub use pipeline::{
    KeeperLoop, LoopSnapshot, LoopStats, NullPanSink, PanServo, PanSink, SerialPanSink,
    StepOutcome,
};
pub use serial::{LinkError, SerialConfig, SerialLink, SimulatedConfig, SimulatedController};
pub use tracking::{
    BallTracker, PidConfig, PidController, ServoCommand, TrackerConfig, TrackerState,
};
