//! Desktop snapshot frame source.
//!
//! Reads a local image (PNG/JPEG) on every capture and crops the requested
//! region out of it. Paired with any external screen grabber that rewrites the
//! file, this gives a screen source without binding the crate to a windowing
//! system.
//!
//! The snapshot source MUST NOT:
//! - Fetch remote URLs
//! - Write frames back to disk

use anyhow::{anyhow, Context, Result};
use image::imageops;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::FrameSource;
use crate::frame::Frame;
use crate::region::Rect;

pub struct SnapshotSource {
    path: PathBuf,
    name: String,
    frames_captured: AtomicU64,
    healthy: AtomicBool,
}

impl SnapshotSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: path.display().to_string(),
            path,
            frames_captured: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    fn grab(&self, rect: Rect) -> Result<Frame> {
        let desktop = image::open(&self.path)
            .with_context(|| format!("failed to read snapshot {}", self.path.display()))?
            .to_rgb8();
        let (x, y, width, height) = rect
            .clip_to(desktop.width(), desktop.height())
            .ok_or_else(|| {
                anyhow!(
                    "region {} lies outside snapshot {}x{}",
                    rect,
                    desktop.width(),
                    desktop.height()
                )
            })?;
        let crop = imageops::crop_imm(&desktop, x, y, width, height).to_image();
        Ok(Frame::from_image(crop))
    }
}

impl FrameSource for SnapshotSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&self, rect: Rect) -> Result<Frame> {
        let result = self.grab(rect);
        self.healthy.store(result.is_ok(), Ordering::Relaxed);
        if result.is_ok() {
            self.frames_captured.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }
}
