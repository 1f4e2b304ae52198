//! Captured frames.
//!
//! - `Frame`: one RGB8 image plus its capture instant. Pixel bytes are private
//!   and only reach a detector through `run_detector`.
//! - `FrameSource`: anything that can hand out frames, one at a time.

use anyhow::Result;
use std::time::Instant;

use crate::detect::{Detection, DetectorBackend};

/// One captured RGB8 frame.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic capture instant.
    pub captured_at: Instant,
    /// Sequence number assigned by the source.
    pub sequence: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
            sequence,
        }
    }

    /// Run a detector on this frame. The detector sees the pixels for the
    /// duration of the call only.
    pub fn run_detector(&self, detector: &mut dyn DetectorBackend) -> Result<Vec<Detection>> {
        detector.detect(&self.data, self.width, self.height)
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// A source of frames (camera driver, file, synthetic scene).
pub trait FrameSource: Send {
    /// Source identifier for logs.
    fn describe(&self) -> String;

    /// Capture the next frame. `Ok(None)` on a miss; the caller re-polls.
    fn capture_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool {
        true
    }
}
