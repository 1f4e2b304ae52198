//! Blocking coordinator against a hand-driven controller.
//!
//! The test plays the microcontroller: it sees every command line the host
//! writes and decides when each reply line goes out.

use std::io::Write;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use goalkeeper::serial::ChannelReader;
use goalkeeper::{shared_link, BallBlocker, BlockSide, BlockerConfig, SerialLink};

/// Forwards each command line the host writes to the test.
struct Device {
    commands: Sender<String>,
    line: Vec<u8>,
}

impl Write for Device {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for &b in buf {
            if b == b'\n' {
                let cmd = String::from_utf8_lossy(&self.line).to_string();
                self.line.clear();
                let _ = self.commands.send(cmd);
            } else {
                self.line.push(b);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct Bench {
    blocker: Arc<BallBlocker>,
    to_host: Sender<Vec<u8>>,
    commands: Receiver<String>,
}

impl Bench {
    fn new(config: BlockerConfig) -> Self {
        let (to_host, reader) = ChannelReader::pair();
        let (tx, commands) = mpsc::channel();
        let device = Device {
            commands: tx,
            line: Vec::new(),
        };
        let link = SerialLink::from_io("bench", reader, device, Duration::from_millis(500));
        Self {
            blocker: Arc::new(BallBlocker::new(shared_link(link), config)),
            to_host,
            commands,
        }
    }

    fn reply(&self, line: &str) {
        self.to_host.send(format!("{line}\n").into_bytes()).unwrap();
    }

    fn expect_command(&self) -> String {
        self.commands
            .recv_timeout(Duration::from_secs(2))
            .expect("host sent no command")
    }
}

fn config() -> BlockerConfig {
    BlockerConfig {
        monitoring_duration: Duration::from_millis(800),
        monitor_margin: Duration::from_millis(200),
        post_detection_hold: Duration::from_millis(300),
        cooldown: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
        ..BlockerConfig::default()
    }
}

fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn confirmed_crossing_holds_then_counts_success() {
    let bench = Bench::new(config());
    assert!(bench
        .blocker
        .process_ball_detection(100.0, 240.0, 640, 480, 0.9));
    assert_eq!(bench.expect_command(), "HL");
    assert!(bench.blocker.is_monitoring());

    bench.reply("D:12.3,T:100,N:1");
    let detected_at = Instant::now();
    bench.reply("BALL_DETECTED");

    let blocker = bench.blocker.clone();
    assert!(wait_for(|| blocker.blocking_active(), Duration::from_secs(1)));
    // Nothing new starts while the hold is running.
    assert!(!bench
        .blocker
        .process_ball_detection(600.0, 240.0, 640, 480, 0.9));

    assert!(bench.blocker.wait_idle(Duration::from_secs(3)));
    assert!(detected_at.elapsed() >= Duration::from_millis(300));

    let stats = bench.blocker.get_statistics();
    assert_eq!(stats.total_detections, 1);
    assert_eq!(stats.successful_blocks, 1);
    assert_eq!(stats.failed_blocks, 0);
    assert_eq!(stats.success_rate, 100.0);
    assert_eq!(stats.last_side, BlockSide::Left);
    assert!(!stats.is_monitoring);
    assert!(!stats.blocking_active);

    // Inside the cooldown: no command goes out.
    assert!(!bench
        .blocker
        .process_ball_detection(600.0, 240.0, 640, 480, 0.9));
    assert!(bench.commands.try_recv().is_err());
}

#[test]
fn crossing_ends_long_window_within_a_poll() {
    let bench = Bench::new(BlockerConfig {
        monitoring_duration: Duration::from_secs(10),
        ..config()
    });
    assert!(bench
        .blocker
        .process_ball_detection(50.0, 240.0, 640, 480, 0.9));
    assert_eq!(bench.expect_command(), "HL");

    bench.reply("D:12.3,T:100,N:1");
    let detected_at = Instant::now();
    bench.reply("BALL_DETECTED");

    assert!(bench.blocker.wait_idle(Duration::from_secs(3)));
    // Hold is 300 ms; the rest of the 10 s window is never waited out.
    let elapsed = detected_at.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(800));

    let stats = bench.blocker.get_statistics();
    assert_eq!(stats.successful_blocks, 1);
    assert_eq!(stats.failed_blocks, 0);
}

#[test]
fn concurrent_detections_start_one_session() {
    let bench = Bench::new(config());
    assert!(bench
        .blocker
        .process_ball_detection(600.0, 240.0, 640, 480, 0.8));
    assert_eq!(bench.expect_command(), "HR");

    let handles: Vec<_> = (0..2)
        .map(|i| {
            let blocker = bench.blocker.clone();
            std::thread::spawn(move || {
                let x = if i == 0 { 20.0 } else { 620.0 };
                blocker.process_ball_detection(x, 240.0, 640, 480, 0.9)
            })
        })
        .collect();
    for handle in handles {
        assert!(!handle.join().unwrap());
    }
    assert_eq!(bench.blocker.get_statistics().total_detections, 1);

    bench.reply("OK");
    assert!(bench.blocker.wait_idle(Duration::from_secs(2)));
    let stats = bench.blocker.get_statistics();
    assert_eq!(stats.failed_blocks, 1);
    assert_eq!(stats.successful_blocks, 0);
    assert_eq!(stats.success_rate, 0.0);
    assert!(bench.commands.try_recv().is_err());
}

#[test]
fn silent_controller_times_out_after_window_and_margin() {
    let bench = Bench::new(BlockerConfig {
        monitoring_duration: Duration::from_millis(200),
        monitor_margin: Duration::from_millis(100),
        ..config()
    });
    let started = Instant::now();
    assert!(bench
        .blocker
        .process_ball_detection(50.0, 240.0, 640, 480, 0.9));
    assert_eq!(bench.expect_command(), "HL");

    assert!(bench.blocker.wait_idle(Duration::from_secs(3)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(2));
    assert_eq!(bench.blocker.get_statistics().failed_blocks, 1);
    assert!(!bench.blocker.is_monitoring());
}

#[test]
fn retrigger_allowed_once_cooldown_elapses() {
    let bench = Bench::new(BlockerConfig {
        cooldown: Duration::from_millis(300),
        ..config()
    });
    assert!(bench
        .blocker
        .process_ball_detection(50.0, 240.0, 640, 480, 0.9));
    assert_eq!(bench.expect_command(), "HL");
    bench.reply("OK");
    assert!(bench.blocker.wait_idle(Duration::from_secs(2)));

    std::thread::sleep(Duration::from_millis(350));
    assert!(bench
        .blocker
        .process_ball_detection(600.0, 240.0, 640, 480, 0.9));
    assert_eq!(bench.expect_command(), "HR");
    bench.reply("OK");
    assert!(bench.blocker.wait_idle(Duration::from_secs(2)));
    assert_eq!(bench.blocker.get_statistics().total_detections, 2);
}

#[test]
fn stale_and_malformed_lines_do_not_count_as_crossings() {
    let bench = Bench::new(config());
    // Left over from an earlier exchange; flushed before `H` goes out.
    bench.reply("BALL_DETECTED");
    std::thread::sleep(Duration::from_millis(50));

    assert!(bench
        .blocker
        .process_ball_detection(50.0, 240.0, 640, 480, 0.9));
    assert_eq!(bench.expect_command(), "HL");
    bench.to_host.send(b"\xff\xfe noise\n".to_vec()).unwrap();
    bench.reply("D:abc,T:x");
    bench.reply("OK");

    assert!(bench.blocker.wait_idle(Duration::from_secs(2)));
    let stats = bench.blocker.get_statistics();
    assert_eq!(stats.failed_blocks, 1);
    assert_eq!(stats.successful_blocks, 0);
}

#[test]
fn direct_trigger_runs_on_caller_and_leaves_counters() {
    let bench = Bench::new(config());
    let Bench {
        blocker,
        to_host,
        commands,
    } = bench;

    let device = std::thread::spawn(move || {
        let cmd = commands.recv_timeout(Duration::from_secs(2)).unwrap();
        to_host.send(b"BALL_DETECTED 42\n".to_vec()).unwrap();
        cmd
    });
    assert!(blocker.trigger_blocking(BlockSide::Right));
    assert_eq!(device.join().unwrap(), "HR");

    let stats = blocker.get_statistics();
    assert_eq!(stats.total_detections, 0);
    assert_eq!(stats.successful_blocks, 0);
    assert_eq!(stats.last_side, BlockSide::Right);
    assert!(!blocker.blocking_active());
}

#[test]
fn shutdown_cancels_session_and_refuses_new_ones() {
    let bench = Bench::new(BlockerConfig {
        monitoring_duration: Duration::from_secs(10),
        ..config()
    });
    assert!(bench
        .blocker
        .process_ball_detection(50.0, 240.0, 640, 480, 0.9));
    assert_eq!(bench.expect_command(), "HL");

    let started = Instant::now();
    bench.blocker.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!bench.blocker.is_monitoring());
    assert!(!bench
        .blocker
        .process_ball_detection(600.0, 240.0, 640, 480, 0.9));
    assert!(!bench.blocker.trigger_blocking(BlockSide::Left));
}
