//! Line-oriented command grammar spoken to the leg microcontroller.
//!
//! | Command                   | Reply                                        |
//! |---------------------------|----------------------------------------------|
//! | `I`                       | `OK`                                         |
//! | `D<L|R>`                  | `D#####` (millimeters)                       |
//! | `S<2-digit id><3-digit>`  | `OK` or error text                           |
//! | `B<L|R>`                  | `OK` once the canned block finishes          |
//! | `H<L|R>`                  | `D:...` samples, then `BALL_DETECTED` or `OK` |

use anyhow::{anyhow, Result};

use crate::blocking::BlockSide;

pub const REPLY_OK: &str = "OK";
pub const BALL_DETECTED: &str = "BALL_DETECTED";

pub const ACTUATOR_ID_MAX: u8 = 15;
pub const ACTUATOR_VALUE_MIN: u16 = 100;
pub const ACTUATOR_VALUE_MAX: u16 = 600;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Put every actuator at its rest position.
    Initialize,
    ReadDistance(BlockSide),
    SetActuator { id: u8, value: u16 },
    /// Synchronous canned block; the reply arrives after the motion completes.
    Block(BlockSide),
    /// Start the high-speed monitoring window.
    Monitor(BlockSide),
}

impl Command {
    /// Wire form, newline terminated.
    pub fn encode(&self) -> Result<String> {
        let body = match *self {
            Command::Initialize => "I".to_string(),
            Command::ReadDistance(side) => format!("D{}", side_letter(side)?),
            Command::SetActuator { id, value } => {
                validate_actuator(id, value)?;
                format!("S{:02}{:03}", id, value)
            }
            Command::Block(side) => format!("B{}", side_letter(side)?),
            Command::Monitor(side) => format!("H{}", side_letter(side)?),
        };
        Ok(format!("{}\n", body))
    }
}

fn side_letter(side: BlockSide) -> Result<char> {
    side.letter()
        .ok_or_else(|| anyhow!("side '{}' has no protocol letter", side))
}

pub fn validate_actuator(id: u8, value: u16) -> Result<()> {
    if id > ACTUATOR_ID_MAX {
        return Err(anyhow!(
            "actuator id {} out of range 0..={}",
            id,
            ACTUATOR_ID_MAX
        ));
    }
    if !(ACTUATOR_VALUE_MIN..=ACTUATOR_VALUE_MAX).contains(&value) {
        return Err(anyhow!(
            "actuator value {} out of range {}..={}",
            value,
            ACTUATOR_VALUE_MIN,
            ACTUATOR_VALUE_MAX
        ));
    }
    Ok(())
}

/// Parse a single-shot distance reply (`D01234`) into centimeters.
pub fn parse_distance_reply(line: &str) -> Option<f64> {
    let digits = line.strip_prefix('D')?;
    if digits.len() != 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let millimeters: u32 = digits.parse().ok()?;
    Some(millimeters as f64 / 10.0)
}

/// One proximity reading streamed during a monitoring window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceSample {
    pub distance_cm: f64,
    /// `T:` field, milliseconds since the window opened.
    pub elapsed_ms: Option<u64>,
    /// `N:` field, sample sequence number.
    pub sequence: Option<u32>,
}

/// Classification of a line received while a monitoring window is open.
#[derive(Clone, Debug, PartialEq)]
pub enum MonitorLine {
    BallDetected,
    Sample(DistanceSample),
    /// Window elapsed without a crossing.
    Completed,
    /// Anything else, including malformed samples. Never fatal.
    Ignored(String),
}

pub fn parse_monitor_line(line: &str) -> MonitorLine {
    let line = line.trim();
    if line.contains(BALL_DETECTED) {
        return MonitorLine::BallDetected;
    }
    if line == REPLY_OK {
        return MonitorLine::Completed;
    }
    if line.starts_with("D:") {
        if let Some(sample) = parse_sample(line) {
            return MonitorLine::Sample(sample);
        }
    }
    MonitorLine::Ignored(line.to_string())
}

fn parse_sample(line: &str) -> Option<DistanceSample> {
    let mut fields = line.split(',');
    let distance_cm: f64 = fields.next()?.strip_prefix("D:")?.trim().parse().ok()?;
    if !distance_cm.is_finite() {
        return None;
    }
    let mut sample = DistanceSample {
        distance_cm,
        elapsed_ms: None,
        sequence: None,
    };
    // Trailing fields are optional; colon-less or unknown ones are skipped.
    for (key, value) in fields.filter_map(|field| field.split_once(':')) {
        let value = value.trim();
        match key.trim() {
            "T" => sample.elapsed_ms = value.parse().ok(),
            "N" => sample.sequence = value.parse().ok(),
            _ => {}
        }
    }
    Some(sample)
}
