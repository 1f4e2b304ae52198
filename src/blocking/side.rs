use serde::Serialize;

/// Which side of the goal a ball was seen on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockSide {
    Left,
    Right,
    Center,
    #[default]
    None,
}

impl BlockSide {
    /// Protocol letter for sides the microcontroller can act on.
    pub fn letter(self) -> Option<char> {
        match self {
            BlockSide::Left => Some('L'),
            BlockSide::Right => Some('R'),
            BlockSide::Center | BlockSide::None => None,
        }
    }

    pub fn is_actionable(self) -> bool {
        self.letter().is_some()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlockSide::Left => "left",
            BlockSide::Right => "right",
            BlockSide::Center => "center",
            BlockSide::None => "none",
        }
    }
}

impl std::fmt::Display for BlockSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Horizontal bands used to classify a ball position.
///
/// Positions are normalized by frame width; anything between the two
/// thresholds is the center dead zone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SideThresholds {
    pub left: f64,
    pub right: f64,
}

impl Default for SideThresholds {
    fn default() -> Self {
        Self {
            left: 0.3,
            right: 0.7,
        }
    }
}

impl SideThresholds {
    pub fn determine_side(&self, x: f64, frame_width: u32) -> BlockSide {
        determine_side(x, frame_width, self.left, self.right)
    }
}

/// Classify a horizontal pixel position.
///
/// Returns `None` when the position cannot be normalized (zero width or a
/// non-finite coordinate).
pub fn determine_side(x: f64, frame_width: u32, left: f64, right: f64) -> BlockSide {
    if frame_width == 0 || !x.is_finite() {
        return BlockSide::None;
    }
    let normalized = x / frame_width as f64;
    if normalized < left {
        BlockSide::Left
    } else if normalized > right {
        BlockSide::Right
    } else {
        BlockSide::Center
    }
}
