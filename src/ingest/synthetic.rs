//! Synthetic desktop source for demos and tests.
//!
//! Produces a deterministic moving gradient with a little per-frame noise so
//! frame-difference detectors see change. The scene shifts every 50 frames.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};

use super::FrameSource;
use crate::frame::Frame;
use crate::region::Rect;

pub struct SyntheticSource {
    name: String,
    desktop_width: u32,
    desktop_height: u32,
    frame_count: AtomicU64,
}

impl SyntheticSource {
    pub fn new(name: &str, desktop_width: u32, desktop_height: u32) -> Self {
        log::info!(
            "SyntheticSource: stub://{} ({}x{})",
            name,
            desktop_width,
            desktop_height
        );
        Self {
            name: format!("stub://{}", name),
            desktop_width,
            desktop_height,
            frame_count: AtomicU64::new(0),
        }
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&self, rect: Rect) -> Result<Frame> {
        let (x0, y0, width, height) = rect
            .clip_to(self.desktop_width, self.desktop_height)
            .ok_or_else(|| anyhow!("region {} lies outside the synthetic desktop", rect))?;

        let frame_count = self.frame_count.fetch_add(1, Ordering::Relaxed) + 1;
        let scene = frame_count / 50;
        let noise = rand::random::<u8>() % 8;

        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for y in y0..y0 + height {
            for x in x0..x0 + width {
                pixels.push(((x as u64 + frame_count) % 256) as u8);
                pixels.push(((y as u64 + scene * 16) % 256) as u8);
                pixels.push((((x ^ y) as u64 % 256) as u8).wrapping_add(noise));
            }
        }
        Frame::from_rgb(width, height, pixels)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }
}
