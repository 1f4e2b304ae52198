//! In-process stand-in for the leg microcontroller (`stub://` ports).
//!
//! Speaks the same line protocol as the firmware so the whole control loop
//! can run without hardware. Replies are produced on helper threads, so a
//! streamed monitoring window arrives over time just like the real device.

use rand::Rng;
use std::io::Write;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use super::protocol::{validate_actuator, BALL_DETECTED, REPLY_OK};
use super::ChannelReader;

const BANNER: &str = "PK_CONTROLLER_READY";

#[derive(Clone, Debug)]
pub struct SimulatedConfig {
    /// Length of an `H<side>` monitoring window.
    pub monitor_window: Duration,
    /// Interval between streamed distance samples (~50 Hz on the firmware).
    pub sample_interval: Duration,
    /// When set, a crossing is reported this long after the window opens.
    pub crossing_after: Option<Duration>,
    /// Resting distance seen by the proximity sensors.
    pub baseline_cm: f64,
    /// Duration of the canned `B<side>` motion.
    pub block_duration: Duration,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            monitor_window: Duration::from_secs(4),
            sample_interval: Duration::from_millis(20),
            crossing_after: Some(Duration::from_millis(1500)),
            baseline_cm: 45.0,
            block_duration: Duration::from_millis(500),
        }
    }
}

pub struct SimulatedController {
    config: SimulatedConfig,
    replies: Sender<Vec<u8>>,
    reader: Option<ChannelReader>,
    line: Vec<u8>,
}

impl SimulatedController {
    pub fn new(config: SimulatedConfig) -> Self {
        let (replies, reader) = ChannelReader::pair();
        let _ = replies.send(format!("{}\n", BANNER).into_bytes());
        Self {
            config,
            replies,
            reader: Some(reader),
            line: Vec::new(),
        }
    }

    /// Split into the read half (controller output) and the write half
    /// (controller input), ready for `SerialLink::from_io`.
    pub fn into_io(mut self) -> (ChannelReader, SimulatedController) {
        let reader = self
            .reader
            .take()
            .unwrap_or_else(|| ChannelReader::pair().1);
        (reader, self)
    }

    fn reply(&self, line: &str) {
        let _ = self.replies.send(format!("{}\n", line).into_bytes());
    }

    fn handle(&mut self, command: &str) {
        log::trace!("simulated controller rx: {}", command);
        let mut chars = command.chars();
        let op = chars.next();
        let arg: String = chars.collect();
        match (op, arg.as_str()) {
            (Some('I'), "") => self.reply(REPLY_OK),
            (Some('D'), "L") | (Some('D'), "R") => {
                let mm = (self.sample_distance(false) * 10.0).round() as u32;
                self.reply(&format!("D{:05}", mm.min(99_999)));
            }
            (Some('S'), args) => match parse_set_args(args) {
                Some((id, value)) if validate_actuator(id, value).is_ok() => {
                    self.reply(REPLY_OK)
                }
                _ => self.reply("ERR:INVALID"),
            },
            (Some('B'), "L") | (Some('B'), "R") => {
                let tx = self.replies.clone();
                let duration = self.config.block_duration;
                std::thread::spawn(move || {
                    std::thread::sleep(duration);
                    let _ = tx.send(format!("{}\n", REPLY_OK).into_bytes());
                });
            }
            (Some('H'), "L") | (Some('H'), "R") => self.stream_window(),
            _ => self.reply("ERR:UNKNOWN"),
        }
    }

    fn stream_window(&self) {
        let tx = self.replies.clone();
        let config = self.config.clone();
        std::thread::spawn(move || {
            let opened = Instant::now();
            let mut sequence = 0u32;
            loop {
                let elapsed = opened.elapsed();
                if elapsed >= config.monitor_window {
                    let _ = tx.send(format!("{}\n", REPLY_OK).into_bytes());
                    return;
                }
                let crossing = config.crossing_after.is_some_and(|after| elapsed >= after);
                sequence += 1;
                let distance = noisy(config.baseline_cm, crossing);
                let sample = format!(
                    "D:{:.1},T:{},N:{}\n",
                    distance,
                    elapsed.as_millis(),
                    sequence
                );
                if tx.send(sample.into_bytes()).is_err() {
                    return;
                }
                if crossing {
                    let _ = tx.send(format!("{} {:.1}\n", BALL_DETECTED, distance).into_bytes());
                    return;
                }
                std::thread::sleep(config.sample_interval);
            }
        });
    }

    fn sample_distance(&self, crossing: bool) -> f64 {
        noisy(self.config.baseline_cm, crossing)
    }
}

impl Write for SimulatedController {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for &byte in buf {
            match byte {
                b'\n' => {
                    let command = String::from_utf8_lossy(&self.line).trim().to_string();
                    self.line.clear();
                    if !command.is_empty() {
                        self.handle(&command);
                    }
                }
                b'\r' => {}
                other => self.line.push(other),
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn parse_set_args(args: &str) -> Option<(u8, u16)> {
    if args.len() != 5 || !args.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id = args[..2].parse().ok()?;
    let value = args[2..].parse().ok()?;
    Some((id, value))
}

fn noisy(baseline_cm: f64, crossing: bool) -> f64 {
    let jitter = rand::thread_rng().gen_range(-0.5..0.5);
    let base = if crossing { baseline_cm / 3.0 } else { baseline_cm };
    (base + jitter).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::BlockSide;
    use crate::serial::{parse_monitor_line, MonitorLine, SerialLink};

    fn link_with(config: SimulatedConfig) -> SerialLink {
        let (reader, writer) = SimulatedController::new(config).into_io();
        let mut link = SerialLink::from_io("sim", reader, writer, Duration::from_millis(500));
        // Banner.
        let banner = link.recv_line(Duration::from_millis(200)).unwrap();
        assert_eq!(banner, BANNER);
        link
    }

    #[test]
    fn answers_request_response_commands() {
        let mut link = link_with(SimulatedConfig {
            block_duration: Duration::from_millis(20),
            ..SimulatedConfig::default()
        });
        assert!(link.initialize_actuators());
        let cm = link.read_distance(BlockSide::Right).unwrap();
        assert!((40.0..50.0).contains(&cm));
        assert!(link.set_actuator(0, 350));
        assert!(link.block(BlockSide::Left));
    }

    #[test]
    fn streams_samples_then_crossing() {
        let mut link = link_with(SimulatedConfig {
            monitor_window: Duration::from_millis(500),
            sample_interval: Duration::from_millis(5),
            crossing_after: Some(Duration::from_millis(50)),
            ..SimulatedConfig::default()
        });
        link.start_monitoring(BlockSide::Left).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut samples = 0;
        loop {
            let line = link.next_line(deadline).unwrap().expect("line before deadline");
            match parse_monitor_line(&line) {
                MonitorLine::Sample(_) => samples += 1,
                MonitorLine::BallDetected => break,
                other => panic!("unexpected line {:?}", other),
            }
        }
        assert!(samples >= 1);
    }

    #[test]
    fn window_without_crossing_ends_with_ok() {
        let mut link = link_with(SimulatedConfig {
            monitor_window: Duration::from_millis(60),
            sample_interval: Duration::from_millis(10),
            crossing_after: None,
            ..SimulatedConfig::default()
        });
        link.start_monitoring(BlockSide::Right).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let line = link.next_line(deadline).unwrap().expect("line before deadline");
            match parse_monitor_line(&line) {
                MonitorLine::Sample(_) => continue,
                MonitorLine::Completed => break,
                other => panic!("unexpected line {:?}", other),
            }
        }
    }
}
