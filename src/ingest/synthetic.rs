use anyhow::{bail, Result};
use std::thread;
use std::time::{Duration, Instant};

use crate::frame::{Frame, FrameSource};

const BACKGROUND_LEVEL: u8 = 40;
const BALL_LEVEL: u8 = 255;
/// Frames per sweep cycle in which the ball is on screen.
pub const VISIBLE_FRAMES: u64 = 120;
/// Empty frames after each sweep; longer than the tracker's loss budget.
pub const GAP_FRAMES: u64 = 40;

/// Settings for a synthetic scene.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// 0 disables pacing.
    pub target_fps: u32,
    pub ball_radius: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://pitch".to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
            ball_radius: 18,
        }
    }
}

/// Renders a bright ball sweeping left and right across a dark pitch,
/// with a stretch of empty frames after every sweep.
pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    last_capture: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        if !config.url.starts_with("stub://") {
            bail!("synthetic source requires a stub:// url, got {}", config.url);
        }
        if config.width == 0 || config.height == 0 {
            bail!("synthetic source needs a non-empty frame size");
        }
        log::info!(
            "SyntheticSource: {} ({}x{} @ {} fps)",
            config.url,
            config.width,
            config.height,
            config.target_fps
        );
        Ok(Self {
            config,
            frame_count: 0,
            last_capture: None,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    /// Ball center for a given frame number, `None` during the gap.
    pub fn ball_center(&self, frame: u64) -> Option<(u32, u32)> {
        let phase = frame % (VISIBLE_FRAMES + GAP_FRAMES);
        if phase >= VISIBLE_FRAMES {
            return None;
        }
        let radius = self.config.ball_radius;
        let min_x = radius;
        let max_x = self.config.width.saturating_sub(radius + 1).max(min_x);
        let half = VISIBLE_FRAMES / 2;
        // Triangle wave: out over the first half, back over the second.
        let t = if phase < half { phase } else { VISIBLE_FRAMES - phase };
        let x = min_x as u64 + (max_x - min_x) as u64 * t / half;
        Some((x as u32, self.config.height / 2))
    }

    fn render(&self, frame: u64) -> Vec<u8> {
        let (width, height) = (self.config.width, self.config.height);
        let mut pixels = vec![BACKGROUND_LEVEL; (width * height * 3) as usize];
        if let Some((cx, cy)) = self.ball_center(frame) {
            let r = self.config.ball_radius as i64;
            for dy in -r..=r {
                for dx in -r..=r {
                    if dx * dx + dy * dy > r * r {
                        continue;
                    }
                    let x = cx as i64 + dx;
                    let y = cy as i64 + dy;
                    if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                        continue;
                    }
                    let idx = ((y as usize) * width as usize + x as usize) * 3;
                    pixels[idx..idx + 3].fill(BALL_LEVEL);
                }
            }
        }
        pixels
    }

    fn pace(&mut self) {
        if self.config.target_fps == 0 {
            return;
        }
        let interval = Duration::from_millis((1000 / self.config.target_fps).max(1) as u64);
        if let Some(last) = self.last_capture {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_capture = Some(Instant::now());
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.config.url)
    }

    fn capture_frame(&mut self) -> Result<Option<Frame>> {
        self.pace();
        let sequence = self.frame_count;
        let pixels = self.render(sequence);
        self.frame_count += 1;
        Ok(Some(Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            sequence,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{find_ball, BallFilter, BrightBlobBackend, ModelGeometry};

    fn unpaced() -> SyntheticSource {
        SyntheticSource::new(SyntheticConfig {
            target_fps: 0,
            ..SyntheticConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn rejects_non_stub_urls() {
        let config = SyntheticConfig {
            url: "rtsp://camera/stream".to_string(),
            ..SyntheticConfig::default()
        };
        assert!(SyntheticSource::new(config).is_err());
    }

    #[test]
    fn ball_sweeps_and_disappears() {
        let source = unpaced();
        let (x0, _) = source.ball_center(0).unwrap();
        let (x_mid, _) = source.ball_center(VISIBLE_FRAMES / 2).unwrap();
        assert_eq!(x0, 18);
        assert!(x_mid > 600);
        assert!(source.ball_center(VISIBLE_FRAMES).is_none());
        assert!(source.ball_center(VISIBLE_FRAMES + GAP_FRAMES - 1).is_none());
        assert!(source.ball_center(VISIBLE_FRAMES + GAP_FRAMES).is_some());
    }

    #[test]
    fn detector_finds_rendered_ball() {
        let mut source = unpaced();
        for _ in 0..30 {
            source.capture_frame().unwrap();
        }
        let frame = source.capture_frame().unwrap().unwrap();
        assert_eq!(frame.sequence, 30);
        let (expected_x, expected_y) = source.ball_center(30).unwrap();

        let mut backend = BrightBlobBackend::default();
        let detections = frame.run_detector(&mut backend).unwrap();
        let ball = find_ball(
            &detections,
            &BallFilter::default(),
            &ModelGeometry::default(),
            frame.width,
            frame.height,
        )
        .unwrap();
        assert!((ball.position.center_x - expected_x as f64).abs() < 4.0);
        assert!((ball.position.center_y - expected_y as f64).abs() < 4.0);
    }
}
