use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::blocking::{BlockerConfig, SideThresholds};
use crate::detect::{BallFilter, ModelGeometry, MOUSE_CLASS, SPORTS_BALL_CLASS};
use crate::pipeline::PanServo;
use crate::serial::protocol::{ACTUATOR_ID_MAX, ACTUATOR_VALUE_MAX, ACTUATOR_VALUE_MIN};
use crate::serial::SerialConfig;
use crate::tracking::{PidConfig, TrackerConfig};

const DEFAULT_SOURCE_URL: &str = "stub://pitch";
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_MODEL_INPUT: u32 = 300;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.3;
const DEFAULT_MAX_FRAMES_LOST: u32 = 30;
const DEFAULT_PAN_SERVO_ID: u8 = 0;
const DEFAULT_SERIAL_PORT: &str = "/dev/ttyACM0";
const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_SERIAL_TIMEOUT_SECS: f64 = 1.0;
const DEFAULT_RESET_DELAY_SECS: f64 = 2.0;

#[derive(Debug, Deserialize, Default)]
struct KeeperConfigFile {
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    tracking: Option<TrackingConfigFile>,
    blocking: Option<BlockingConfigFile>,
    serial: Option<SerialConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    input_width: Option<u32>,
    input_height: Option<u32>,
    score_threshold: Option<f32>,
    class_ids: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    kp: Option<f64>,
    ki: Option<f64>,
    kd: Option<f64>,
    output_min: Option<f64>,
    output_max: Option<f64>,
    max_frames_lost: Option<u32>,
    pan_enabled: Option<bool>,
    pan_servo_id: Option<u8>,
    pan_pwm_min: Option<u16>,
    pan_pwm_max: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
struct BlockingConfigFile {
    left_threshold: Option<f64>,
    right_threshold: Option<f64>,
    monitoring_secs: Option<f64>,
    monitor_margin_secs: Option<f64>,
    post_detection_hold_secs: Option<f64>,
    cooldown_secs: Option<f64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SerialConfigFile {
    port: Option<String>,
    baud_rate: Option<u32>,
    timeout_secs: Option<f64>,
    reset_delay_secs: Option<f64>,
}

/// Daemon configuration: file, then `KEEPER_*` environment overrides, then validation.
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub tracking: TrackingSettings,
    pub blocking: BlockerConfig,
    pub serial: SerialConfig,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub geometry: ModelGeometry,
    pub filter: BallFilter,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub pid: PidConfig,
    pub max_frames_lost: u32,
    /// `None` disables pan output.
    pub pan: Option<PanServo>,
}

impl KeeperConfig {
    /// Load using `KEEPER_CONFIG` as the optional file path.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("KEEPER_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply command-line overrides on top of a loaded config and validate again.
    pub fn with_overrides(
        mut self,
        serial_port: Option<String>,
        source_url: Option<String>,
    ) -> Result<Self> {
        if let Some(port) = serial_port {
            self.serial.port = port;
        }
        if let Some(url) = source_url {
            self.camera.url = url;
        }
        self.validate()?;
        Ok(self)
    }

    fn from_file(file: KeeperConfigFile) -> Result<Self> {
        let camera = file.camera.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        let blocking = file.blocking.unwrap_or_default();
        let serial = file.serial.unwrap_or_default();

        let camera = CameraSettings {
            url: camera
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            width: camera.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            height: camera.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            target_fps: camera.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
        };

        let detection = DetectionSettings {
            geometry: ModelGeometry {
                input_width: detection.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
                input_height: detection.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
            },
            filter: BallFilter {
                class_ids: detection
                    .class_ids
                    .unwrap_or_else(|| vec![SPORTS_BALL_CLASS, MOUSE_CLASS]),
                score_threshold: detection
                    .score_threshold
                    .unwrap_or(DEFAULT_SCORE_THRESHOLD),
            },
        };

        let pid_defaults = PidConfig::default();
        let pan_defaults = PanServo::default();
        let pan = if tracking.pan_enabled.unwrap_or(true) {
            Some(PanServo {
                servo_id: tracking.pan_servo_id.unwrap_or(DEFAULT_PAN_SERVO_ID),
                pwm_min: tracking.pan_pwm_min.unwrap_or(pan_defaults.pwm_min),
                pwm_max: tracking.pan_pwm_max.unwrap_or(pan_defaults.pwm_max),
            })
        } else {
            None
        };
        let tracking = TrackingSettings {
            pid: PidConfig {
                kp: tracking.kp.unwrap_or(pid_defaults.kp),
                ki: tracking.ki.unwrap_or(pid_defaults.ki),
                kd: tracking.kd.unwrap_or(pid_defaults.kd),
                output_min: tracking.output_min.unwrap_or(pid_defaults.output_min),
                output_max: tracking.output_max.unwrap_or(pid_defaults.output_max),
            },
            max_frames_lost: tracking.max_frames_lost.unwrap_or(DEFAULT_MAX_FRAMES_LOST),
            pan,
        };

        let blocking_defaults = BlockerConfig::default();
        let blocking = BlockerConfig {
            thresholds: SideThresholds {
                left: blocking
                    .left_threshold
                    .unwrap_or(blocking_defaults.thresholds.left),
                right: blocking
                    .right_threshold
                    .unwrap_or(blocking_defaults.thresholds.right),
            },
            monitoring_duration: seconds_or(
                blocking.monitoring_secs,
                blocking_defaults.monitoring_duration,
                "blocking.monitoring_secs",
            )?,
            monitor_margin: seconds_or(
                blocking.monitor_margin_secs,
                blocking_defaults.monitor_margin,
                "blocking.monitor_margin_secs",
            )?,
            post_detection_hold: seconds_or(
                blocking.post_detection_hold_secs,
                blocking_defaults.post_detection_hold,
                "blocking.post_detection_hold_secs",
            )?,
            cooldown: seconds_or(
                blocking.cooldown_secs,
                blocking_defaults.cooldown,
                "blocking.cooldown_secs",
            )?,
            poll_interval: blocking
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(blocking_defaults.poll_interval),
        };

        let serial = SerialConfig {
            port: serial
                .port
                .unwrap_or_else(|| DEFAULT_SERIAL_PORT.to_string()),
            baud_rate: serial.baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
            timeout: seconds(
                serial.timeout_secs.unwrap_or(DEFAULT_SERIAL_TIMEOUT_SECS),
                "serial.timeout_secs",
            )?,
            reset_delay: seconds(
                serial.reset_delay_secs.unwrap_or(DEFAULT_RESET_DELAY_SECS),
                "serial.reset_delay_secs",
            )?,
        };

        Ok(Self {
            camera,
            detection,
            tracking,
            blocking,
            serial,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("KEEPER_SERIAL_PORT") {
            if !port.trim().is_empty() {
                self.serial.port = port.trim().to_string();
            }
        }
        if let Ok(baud) = std::env::var("KEEPER_SERIAL_BAUD") {
            self.serial.baud_rate = baud
                .trim()
                .parse()
                .map_err(|_| anyhow!("KEEPER_SERIAL_BAUD must be an integer baud rate"))?;
        }
        if let Ok(url) = std::env::var("KEEPER_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url.trim().to_string();
            }
        }
        if let Ok(cooldown) = std::env::var("KEEPER_COOLDOWN_SECS") {
            let secs: f64 = cooldown
                .trim()
                .parse()
                .map_err(|_| anyhow!("KEEPER_COOLDOWN_SECS must be a number of seconds"))?;
            self.blocking.cooldown = seconds(secs, "KEEPER_COOLDOWN_SECS")?;
        }
        if let Ok(gains) = std::env::var("KEEPER_PID_GAINS") {
            let (kp, ki, kd) = parse_gains(&gains)?;
            self.tracking.pid.kp = kp;
            self.tracking.pid.ki = ki;
            self.tracking.pid.kd = kd;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.url.trim().is_empty() {
            return Err(anyhow!("camera url must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera frame size must be non-zero"));
        }
        let geometry = &self.detection.geometry;
        if geometry.input_width == 0 || geometry.input_height == 0 {
            return Err(anyhow!("detection model input size must be non-zero"));
        }
        let threshold = self.detection.filter.score_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("detection score_threshold must be within [0, 1]"));
        }
        if self.detection.filter.class_ids.is_empty() {
            return Err(anyhow!("detection class_ids must not be empty"));
        }

        let pid = &self.tracking.pid;
        if ![pid.kp, pid.ki, pid.kd].iter().all(|g| g.is_finite()) {
            return Err(anyhow!("pid gains must be finite"));
        }
        if !(pid.output_min.is_finite() && pid.output_max.is_finite())
            || pid.output_min >= pid.output_max
        {
            return Err(anyhow!("pid output_min must be below output_max"));
        }
        if let Some(pan) = &self.tracking.pan {
            if pan.servo_id > ACTUATOR_ID_MAX {
                return Err(anyhow!(
                    "pan_servo_id must be within 0..={}",
                    ACTUATOR_ID_MAX
                ));
            }
            if pan.pwm_min < ACTUATOR_VALUE_MIN
                || pan.pwm_max > ACTUATOR_VALUE_MAX
                || pan.pwm_min >= pan.pwm_max
            {
                return Err(anyhow!(
                    "pan pwm range must be ordered within {}..={}",
                    ACTUATOR_VALUE_MIN,
                    ACTUATOR_VALUE_MAX
                ));
            }
        }

        let t = &self.blocking.thresholds;
        if !(0.0 < t.left && t.left < t.right && t.right < 1.0) {
            return Err(anyhow!(
                "blocking thresholds must satisfy 0 < left < right < 1 (got {} / {})",
                t.left,
                t.right
            ));
        }
        if self.blocking.monitoring_duration.is_zero() {
            return Err(anyhow!("blocking monitoring duration must be greater than zero"));
        }
        if self.blocking.poll_interval.is_zero() {
            return Err(anyhow!("blocking poll interval must be greater than zero"));
        }

        if self.serial.port.trim().is_empty() {
            return Err(anyhow!("serial port must not be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(anyhow!("serial baud rate must be greater than zero"));
        }
        if self.serial.timeout.is_zero() {
            return Err(anyhow!("serial timeout must be greater than zero"));
        }
        Ok(())
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            frame_width: self.camera.width,
            frame_height: self.camera.height,
            max_frames_lost: self.tracking.max_frames_lost,
        }
    }
}

fn read_config_file(path: &Path) -> Result<KeeperConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn seconds(value: f64, name: &str) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!("{} must be a non-negative number of seconds", name));
    }
    Duration::try_from_secs_f64(value).map_err(|e| anyhow!("{} is out of range: {}", name, e))
}

fn seconds_or(value: Option<f64>, default: Duration, name: &str) -> Result<Duration> {
    match value {
        Some(secs) => seconds(secs, name),
        None => Ok(default),
    }
}

fn parse_gains(value: &str) -> Result<(f64, f64, f64)> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|entry| entry.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| anyhow!("KEEPER_PID_GAINS must be three numbers: kp,ki,kd"))?;
    match parts.as_slice() {
        [kp, ki, kd] => Ok((*kp, *ki, *kd)),
        _ => Err(anyhow!("KEEPER_PID_GAINS must be three numbers: kp,ki,kd")),
    }
}
