use anyhow::Result;

use super::result::Detection;

/// Detector backend trait.
///
/// This is the seam to the inference engine. Implementations receive one
/// RGB8 frame and return detections in their own model-input coordinate
/// space; the caller rescales them with `ModelGeometry`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Implementations must treat the pixel slice as read-only and ephemeral.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
