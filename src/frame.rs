//! Frame container shared by sources, detectors and display sinks.
//!
//! - `Frame`: owned RGB24 pixel buffer plus its capture instant.
//! - Resizing to the pipeline working resolution happens here so every detector
//!   sees frames of a single, consistent size.
//! - A couple of primitive painting helpers (filled rectangles, borders) used for
//!   annotating frames before they reach the display queue.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::fmt;
use std::time::Instant;

/// Owned RGB24 frame.
#[derive(Clone)]
pub struct Frame {
    image: RgbImage,
    captured_at: Instant,
}

impl Frame {
    /// Build a frame from tightly packed RGB24 bytes.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))? as usize;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self::from_image(image))
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }

    /// Single-color frame. Mostly useful for synthetic sources and tests.
    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self::from_image(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Resize to `width` x `height`. The capture instant is preserved.
    pub fn resized(self, width: u32, height: u32) -> Self {
        if self.image.width() == width && self.image.height() == height {
            return self;
        }
        let image = imageops::resize(&self.image, width, height, FilterType::Triangle);
        Self {
            image,
            captured_at: self.captured_at,
        }
    }

    /// Paint a filled rectangle, clipped to the frame bounds.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: [u8; 3]) {
        let x_end = x.saturating_add(width).min(self.image.width());
        let y_end = y.saturating_add(height).min(self.image.height());
        for py in y..y_end {
            for px in x..x_end {
                self.image.put_pixel(px, py, Rgb(color));
            }
        }
    }

    /// Paint a border of `thickness` pixels along the frame edges.
    pub fn draw_border(&mut self, thickness: u32, color: [u8; 3]) {
        let (w, h) = (self.image.width(), self.image.height());
        let t = thickness.min(w / 2).min(h / 2);
        self.fill_rect(0, 0, w, t, color);
        self.fill_rect(0, h.saturating_sub(t), w, t, color);
        self.fill_rect(0, 0, t, h, color);
        self.fill_rect(w.saturating_sub(t), 0, t, h, color);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

pub(crate) fn luma(rgb: [u8; 3]) -> f32 {
    0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32
}
