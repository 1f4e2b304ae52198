use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BBox, Detection};
use crate::detect::{ModelGeometry, SPORTS_BALL_CLASS};

/// Minimum channel value for a pixel to count as part of the blob.
const BRIGHT_LEVEL: u8 = 240;
/// Fewer model-space pixels than this is treated as noise.
const MIN_BLOB_PIXELS: usize = 4;

/// CPU backend that reports the bounding box of saturated pixels as a ball.
///
/// Sampling happens on the model-input grid, so boxes come back in model
/// coordinates exactly like a real inference engine's output.
#[derive(Debug, Default)]
pub struct BrightBlobBackend {
    geometry: ModelGeometry,
}

impl BrightBlobBackend {
    pub fn new(geometry: ModelGeometry) -> Self {
        Self { geometry }
    }
}

impl DetectorBackend for BrightBlobBackend {
    fn name(&self) -> &'static str {
        "bright-blob"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() < expected {
            return Err(anyhow!(
                "frame buffer too small: {} bytes for {}x{} rgb",
                pixels.len(),
                width,
                height
            ));
        }
        let (mw, mh) = (self.geometry.input_width, self.geometry.input_height);
        if width == 0 || height == 0 || mw == 0 || mh == 0 {
            return Ok(Vec::new());
        }

        let mut count = 0usize;
        let (mut xmin, mut ymin, mut xmax, mut ymax) = (u32::MAX, u32::MAX, 0u32, 0u32);
        for my in 0..mh {
            let fy = (my as u64 * height as u64 / mh as u64) as usize;
            for mx in 0..mw {
                let fx = (mx as u64 * width as u64 / mw as u64) as usize;
                let idx = (fy * width as usize + fx) * 3;
                let px = &pixels[idx..idx + 3];
                if px.iter().all(|&c| c >= BRIGHT_LEVEL) {
                    count += 1;
                    xmin = xmin.min(mx);
                    ymin = ymin.min(my);
                    xmax = xmax.max(mx);
                    ymax = ymax.max(my);
                }
            }
        }

        if count < MIN_BLOB_PIXELS {
            return Ok(Vec::new());
        }

        // Score is how well the blob fills its box; a disc fills ~78%.
        let area = ((xmax - xmin + 1) * (ymax - ymin + 1)) as f32;
        let fill = count as f32 / area;
        let score = (fill / std::f32::consts::FRAC_PI_4).min(1.0);

        Ok(vec![Detection {
            class_id: SPORTS_BALL_CLASS,
            score,
            bbox: BBox {
                xmin: xmin as f32,
                ymin: ymin as f32,
                xmax: (xmax + 1) as f32,
                ymax: (ymax + 1) as f32,
            },
        }])
    }
}
