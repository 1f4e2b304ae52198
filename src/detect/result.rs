use serde::Serialize;

/// Axis-aligned box. Coordinates are in whatever space the producer uses;
/// detector output is in model-input space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BBox {
    pub fn center(&self) -> (f32, f32) {
        ((self.xmin + self.xmax) / 2.0, (self.ymin + self.ymax) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        [self.xmin, self.ymin, self.xmax, self.ymax]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// One object reported by the detector, in model-input coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: u32,
    /// 0..=1
    pub score: f32,
    pub bbox: BBox,
}

/// Ball center in frame-pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BallPosition {
    pub center_x: f64,
    pub center_y: f64,
}

/// A ball picked out of a frame's detections.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BallDetection {
    pub position: BallPosition,
    pub score: f32,
    pub class_id: u32,
}
