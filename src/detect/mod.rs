//! Detection intake.
//!
//! The inference engine is external; it reports `Detection`s in its own
//! model-input coordinate space. This module rescales them to frame pixels
//! and picks the ball out of each frame's list.

mod backend;
mod backends;
mod result;

pub use backend::DetectorBackend;
pub use backends::BrightBlobBackend;
pub use result::{BBox, BallDetection, BallPosition, Detection};

/// COCO "sports ball" as numbered by the shipped label table.
pub const SPORTS_BALL_CLASS: u32 = 36;
/// COCO "mouse"; small round objects are often reported as this class.
pub const MOUSE_CLASS: u32 = 73;

/// Declared input size of the detection model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelGeometry {
    pub input_width: u32,
    pub input_height: u32,
}

impl Default for ModelGeometry {
    fn default() -> Self {
        Self {
            input_width: 300,
            input_height: 300,
        }
    }
}

impl ModelGeometry {
    /// Rescale a model-space box into frame-pixel space.
    pub fn to_frame(&self, bbox: &BBox, frame_width: u32, frame_height: u32) -> BBox {
        let sx = frame_width as f32 / self.input_width.max(1) as f32;
        let sy = frame_height as f32 / self.input_height.max(1) as f32;
        BBox {
            xmin: bbox.xmin * sx,
            ymin: bbox.ymin * sy,
            xmax: bbox.xmax * sx,
            ymax: bbox.ymax * sy,
        }
    }
}

/// Which detections count as the ball.
#[derive(Clone, Debug, PartialEq)]
pub struct BallFilter {
    pub class_ids: Vec<u32>,
    pub score_threshold: f32,
}

impl Default for BallFilter {
    fn default() -> Self {
        Self {
            class_ids: vec![SPORTS_BALL_CLASS, MOUSE_CLASS],
            score_threshold: 0.3,
        }
    }
}

impl BallFilter {
    pub fn accepts(&self, detection: &Detection) -> bool {
        self.class_ids.contains(&detection.class_id)
            && detection.score >= self.score_threshold
            && detection.bbox.is_finite()
    }
}

/// First accepted detection, with its center rescaled to frame pixels.
pub fn find_ball(
    detections: &[Detection],
    filter: &BallFilter,
    geometry: &ModelGeometry,
    frame_width: u32,
    frame_height: u32,
) -> Option<BallDetection> {
    detections
        .iter()
        .find(|det| filter.accepts(det))
        .map(|det| {
            let (cx, cy) = geometry
                .to_frame(&det.bbox, frame_width, frame_height)
                .center();
            BallDetection {
                position: BallPosition {
                    center_x: cx as f64,
                    center_y: cy as f64,
                },
                score: det.score,
                class_id: det.class_id,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: u32, score: f32, bbox: (f32, f32, f32, f32)) -> Detection {
        Detection {
            class_id,
            score,
            bbox: BBox {
                xmin: bbox.0,
                ymin: bbox.1,
                xmax: bbox.2,
                ymax: bbox.3,
            },
        }
    }

    #[test]
    fn rescales_model_box_to_frame_center() {
        let detections = vec![det(SPORTS_BALL_CLASS, 0.8, (60.0, 90.0, 90.0, 120.0))];
        let ball = find_ball(
            &detections,
            &BallFilter::default(),
            &ModelGeometry::default(),
            640,
            480,
        )
        .unwrap();
        // Model center (75, 105) scaled by (640/300, 480/300).
        assert!((ball.position.center_x - 160.0).abs() < 1e-3);
        assert!((ball.position.center_y - 168.0).abs() < 1e-3);
    }

    #[test]
    fn skips_other_classes_and_weak_scores() {
        let detections = vec![
            det(0, 0.99, (0.0, 0.0, 10.0, 10.0)),
            det(SPORTS_BALL_CLASS, 0.1, (0.0, 0.0, 10.0, 10.0)),
            det(MOUSE_CLASS, 0.5, (150.0, 150.0, 150.0, 150.0)),
        ];
        let ball = find_ball(
            &detections,
            &BallFilter::default(),
            &ModelGeometry::default(),
            300,
            300,
        )
        .unwrap();
        assert_eq!(ball.class_id, MOUSE_CLASS);
        assert_eq!(ball.position.center_x, 150.0);
    }

    #[test]
    fn no_ball_when_nothing_matches() {
        let detections = vec![det(SPORTS_BALL_CLASS, f32::NAN, (0.0, 0.0, 1.0, 1.0))];
        assert!(find_ball(
            &detections,
            &BallFilter::default(),
            &ModelGeometry::default(),
            640,
            480
        )
        .is_none());
    }
}
