use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use goalkeeper::ingest::{GAP_FRAMES, VISIBLE_FRAMES};
use goalkeeper::{
    shared_link, BallBlocker, BallFilter, BallTracker, BlockSide, BlockerConfig,
    BrightBlobBackend, FrameSource, KeeperLoop, ModelGeometry, PanSink, PidController, SerialConfig,
    SerialLink, SimulatedConfig, SimulatedController, SyntheticConfig, SyntheticSource,
    TrackerConfig, TrackerState,
};

#[derive(Clone, Default)]
struct RecordingPan(Arc<Mutex<Vec<f64>>>);

impl PanSink for RecordingPan {
    fn send_pan(&mut self, pan_angle: f64) {
        self.0.lock().unwrap().push(pan_angle);
    }
}

fn simulated_link() -> goalkeeper::SharedLink {
    let sim = SimulatedConfig {
        monitor_window: Duration::from_millis(200),
        sample_interval: Duration::from_millis(5),
        crossing_after: Some(Duration::from_millis(40)),
        ..SimulatedConfig::default()
    };
    let (reader, writer) = SimulatedController::new(sim).into_io();
    shared_link(SerialLink::from_io(
        "sim",
        reader,
        writer,
        Duration::from_millis(200),
    ))
}

fn keeper(pan: RecordingPan, fps: u32) -> KeeperLoop {
    let source = SyntheticSource::new(SyntheticConfig {
        target_fps: fps,
        ..SyntheticConfig::default()
    })
    .unwrap();
    let blocker = BallBlocker::new(
        simulated_link(),
        BlockerConfig {
            monitoring_duration: Duration::from_millis(200),
            monitor_margin: Duration::from_millis(100),
            post_detection_hold: Duration::from_millis(20),
            cooldown: Duration::from_secs(30),
            ..BlockerConfig::default()
        },
    );
    KeeperLoop::new(
        Box::new(source),
        Box::new(BrightBlobBackend::default()),
        BallFilter::default(),
        ModelGeometry::default(),
        BallTracker::new(PidController::default(), TrackerConfig::default()),
        Arc::new(blocker),
        Box::new(pan),
    )
    .unwrap()
}

#[test]
fn sweep_tracks_blocks_once_and_loses_ball_in_gap() {
    let pan = RecordingPan::default();
    let mut keeper = keeper(pan.clone(), 0);

    let first = keeper.step().unwrap();
    assert_eq!(first.frame, Some(0));
    let ball = first.ball.expect("ball on first frame");
    assert!(ball.position.center_x < 64.0);
    assert!(first.block_started);
    assert_eq!(keeper.tracker().state(), TrackerState::Tracking);

    for _ in 1..VISIBLE_FRAMES {
        let outcome = keeper.step().unwrap();
        assert!(outcome.ball.is_some());
        assert!(!outcome.block_started);
    }
    assert_eq!(keeper.tracker().state(), TrackerState::Tracking);

    for _ in 0..GAP_FRAMES {
        assert!(keeper.step().unwrap().ball.is_none());
    }
    assert_eq!(keeper.tracker().state(), TrackerState::Lost);

    assert!(keeper.blocker().wait_idle(Duration::from_secs(3)));
    let snap = keeper.snapshot();
    assert_eq!(snap.frames, VISIBLE_FRAMES + GAP_FRAMES);
    assert_eq!(snap.detections, VISIBLE_FRAMES);
    assert_eq!(snap.blocks_started, 1);
    assert_eq!(snap.blocker.total_detections, 1);
    assert_eq!(snap.blocker.last_side, BlockSide::Left);
    assert_eq!(
        snap.blocker.successful_blocks + snap.blocker.failed_blocks,
        1
    );
    assert_eq!(snap.frames_since_detection, GAP_FRAMES as u32);
    assert!(snap.last_ball.is_some());

    let angles = pan.0.lock().unwrap().clone();
    assert_eq!(angles.len() as u64, VISIBLE_FRAMES + GAP_FRAMES);
    assert!(angles.iter().all(|a| (0.0..=180.0).contains(a)));
    // Ball starts on the left edge; the first correction moves off center.
    assert!((angles[0] - 90.0).abs() > 0.5);

    let json = serde_json::to_value(&snap).unwrap();
    assert_eq!(json["tracker_state"], "lost");
    assert_eq!(json["blocker"]["last_side"], "left");

    keeper.close();
}

#[test]
fn run_stops_when_shutdown_is_raised() {
    let pan = RecordingPan::default();
    let mut keeper = keeper(pan.clone(), 200);
    let shutdown = Arc::new(AtomicBool::new(true));
    keeper.run(&shutdown).unwrap();
    assert_eq!(keeper.stats().frames, 0);

    let flag = Arc::new(AtomicBool::new(false));
    let stopper = {
        let flag = flag.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        })
    };
    keeper.run(&flag).unwrap();
    stopper.join().unwrap();

    let frames = keeper.stats().frames;
    assert!(frames > 0);
    assert!(keeper.stats().fps() > 0.0);
    assert_eq!(pan.0.lock().unwrap().len() as u64, frames);
    keeper.close();
}

#[test]
fn stub_serial_port_opens_simulated_controller() {
    let config = SerialConfig {
        port: "stub://keeper".to_string(),
        reset_delay: Duration::from_millis(10),
        ..SerialConfig::default()
    };
    let mut link = SerialLink::open(&config).unwrap();
    assert!(link.initialize_actuators());
    assert!(link.set_actuator(0, 350));
    assert!(link.block(BlockSide::Right));
    link.disconnect();
}

#[test]
fn non_stub_source_is_rejected() {
    assert!(goalkeeper::open_source("rtsp://camera/stream", 640, 480, 30).is_err());
    let source = goalkeeper::open_source("stub://pitch", 320, 240, 0).unwrap();
    assert!(source.describe().contains("stub://pitch"));
}
