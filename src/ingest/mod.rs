//! Frame sources.
//!
//! A frame source returns one frame for a screen rectangle per call. Calls are
//! synchronous and may be slow; the caller owns pacing and retry. Two sources
//! ship with the crate:
//! - `stub://<name>`: synthetic moving desktop (demos, tests)
//! - a local image path: desktop snapshot re-read on every capture, so any
//!   external screen grabber that keeps the file fresh can feed the pipeline
//!
//! Sources MUST NOT retain frames after handing them to the caller.

pub mod snapshot;
pub mod synthetic;

pub use snapshot::SnapshotSource;
pub use synthetic::SyntheticSource;

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::frame::Frame;
use crate::region::Rect;

/// Screen capture capability shared by every detection task.
pub trait FrameSource: Send + Sync {
    /// Source identifier for logs.
    fn name(&self) -> &str;

    /// Capture the area under `rect`. `rect` is already normalized.
    fn capture(&self, rect: Rect) -> Result<Frame>;

    /// Returns false after the most recent capture failed.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Total successful captures.
    fn frames_captured(&self) -> u64;
}

/// Default synthetic desktop size.
pub const DEFAULT_DESKTOP_WIDTH: u32 = 1920;
pub const DEFAULT_DESKTOP_HEIGHT: u32 = 1080;

/// Open a source from a `stub://` URL or a local snapshot path.
pub fn open_source(location: &str) -> Result<Arc<dyn FrameSource>> {
    let location = location.trim();
    if location.is_empty() {
        return Err(anyhow!("frame source location must not be empty"));
    }
    if let Some(name) = location.strip_prefix("stub://") {
        return Ok(Arc::new(SyntheticSource::new(
            name,
            DEFAULT_DESKTOP_WIDTH,
            DEFAULT_DESKTOP_HEIGHT,
        )));
    }
    if location.contains("://") {
        return Err(anyhow!(
            "frame source '{}' is not supported (expected stub:// or a local path)",
            location
        ));
    }
    Ok(Arc::new(SnapshotSource::new(location)))
}
