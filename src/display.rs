//! Display sinks and the single consumer loop that feeds them.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::frame::Frame;
use crate::queue::FrameQueue;
use crate::stats::PipelineStats;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Renders labeled frames. Driven by exactly one thread.
pub trait DisplaySink: Send {
    fn name(&self) -> &str;

    fn show(&mut self, label: &str, frame: &Frame) -> Result<()>;

    /// `true` when the sink wants the whole session to stop (window closed,
    /// quit key, frame budget spent).
    fn poll_cancel(&mut self) -> bool {
        false
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Headless
// ----------------------------------------------------------------------------

/// Counts frames per label without rendering anything.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    per_label: HashMap<String, u64>,
    shown: u64,
    frame_limit: Option<u64>,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation once `limit` frames have been shown.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    pub fn shown(&self) -> u64 {
        self.shown
    }

    pub fn shown_for(&self, label: &str) -> u64 {
        self.per_label.get(label).copied().unwrap_or(0)
    }
}

impl DisplaySink for HeadlessDisplay {
    fn name(&self) -> &str {
        "headless"
    }

    fn show(&mut self, label: &str, frame: &Frame) -> Result<()> {
        *self.per_label.entry(label.to_string()).or_insert(0) += 1;
        self.shown += 1;
        log::debug!("{} {}x{}", label, frame.width(), frame.height());
        Ok(())
    }

    fn poll_cancel(&mut self) -> bool {
        matches!(self.frame_limit, Some(limit) if self.shown >= limit)
    }

    fn close(&mut self) -> Result<()> {
        let mut labels: Vec<_> = self.per_label.iter().collect();
        labels.sort();
        for (label, count) in labels {
            log::info!("display closed: {} frames for '{}'", count, label);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Snapshot
// ----------------------------------------------------------------------------

/// Writes the latest frame of every label as `<dir>/<label>.png`, at most
/// once per `interval` per label.
pub struct SnapshotDisplay {
    dir: PathBuf,
    interval: Duration,
    last_written: HashMap<String, Instant>,
    written: u64,
}

impl SnapshotDisplay {
    pub fn new<P: AsRef<Path>>(dir: P, interval: Duration) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| anyhow!("failed to create snapshot dir {}: {}", dir.display(), e))?;
        Ok(Self {
            dir,
            interval,
            last_written: HashMap::new(),
            written: 0,
        })
    }

    pub fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{}.png", file_stem(label)))
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl DisplaySink for SnapshotDisplay {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn show(&mut self, label: &str, frame: &Frame) -> Result<()> {
        let due = self
            .last_written
            .get(label)
            .map(|at| at.elapsed() >= self.interval)
            .unwrap_or(true);
        if !due {
            return Ok(());
        }
        let path = self.path_for(label);
        frame
            .image()
            .save(&path)
            .map_err(|e| anyhow!("failed to write snapshot {}: {}", path.display(), e))?;
        self.last_written.insert(label.to_string(), Instant::now());
        self.written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        log::info!(
            "snapshot display closed: {} file(s) written to {}",
            self.written,
            self.dir.display()
        );
        Ok(())
    }
}

pub(crate) fn file_stem(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

// ----------------------------------------------------------------------------
// Consumer loop
// ----------------------------------------------------------------------------

/// Drain `queue` into `sink` until `cancel` fires, then close the sink.
///
/// Each dequeue waits at most `poll`, which bounds how long cancellation
/// takes to be noticed. A sink asking to stop cancels the whole session.
pub fn run_display_loop(
    queue: FrameQueue,
    mut sink: Box<dyn DisplaySink>,
    cancel: CancelToken,
    stats: Arc<PipelineStats>,
    poll: Duration,
) {
    log::info!("display loop started (sink={})", sink.name());
    let mut last_health_log = Instant::now();
    let mut shown_since = 0u64;

    while !cancel.is_cancelled() {
        if sink.poll_cancel() {
            log::info!("display sink '{}' requested shutdown", sink.name());
            cancel.cancel();
            break;
        }

        if let Some(msg) = queue.dequeue(poll) {
            match sink.show(&msg.label, &msg.frame) {
                Ok(()) => {
                    stats.record_display();
                    shown_since += 1;
                }
                Err(e) => log::warn!("display failed for '{}': {}", msg.label, e),
            }
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            log::info!(
                "display health: shown={} queued={}/{} dropped={}",
                shown_since,
                queue.len(),
                queue.capacity(),
                queue.dropped()
            );
            shown_since = 0;
            last_health_log = Instant::now();
        }
    }

    if let Err(e) = sink.close() {
        log::warn!("display sink '{}' close failed: {}", sink.name(), e);
    }
    log::info!("display loop stopped");
}
