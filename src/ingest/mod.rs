//! Frame ingestion.
//!
//! Sources are selected by URL. `stub://` produces a synthetic pitch with a
//! moving ball; camera drivers plug in through `FrameSource`.

mod synthetic;

use anyhow::{bail, Result};

use crate::frame::FrameSource;

pub use synthetic::{SyntheticConfig, SyntheticSource, GAP_FRAMES, VISIBLE_FRAMES};

/// Open the frame source named by `url`.
pub fn open_source(
    url: &str,
    width: u32,
    height: u32,
    target_fps: u32,
) -> Result<Box<dyn FrameSource>> {
    if url.starts_with("stub://") {
        let source = SyntheticSource::new(SyntheticConfig {
            url: url.to_string(),
            width,
            height,
            target_fps,
            ..SyntheticConfig::default()
        })?;
        return Ok(Box::new(source));
    }
    bail!("unsupported frame source {url}: no camera driver is built in (use stub://)")
}
