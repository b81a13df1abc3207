use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline counters shared by all tasks and the display loop.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_captured: AtomicU64,
    capture_failures: AtomicU64,
    detector_failures: AtomicU64,
    frames_enqueued: AtomicU64,
    frames_dropped: AtomicU64,
    frames_displayed: AtomicU64,
    sos_alerts: AtomicU64,
    violence_incidents: AtomicU64,
}

/// Point-in-time copy of `PipelineStats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub detector_failures: u64,
    pub frames_enqueued: u64,
    pub frames_dropped: u64,
    pub frames_displayed: u64,
    pub sos_alerts: u64,
    pub violence_incidents: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_capture(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_capture_failure(&self) {
        self.capture_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_detector_failure(&self) {
        self.detector_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_enqueue(&self, accepted: bool) {
        if accepted {
            self.frames_enqueued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_display(&self) {
        self.frames_displayed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sos(&self) {
        self.sos_alerts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_incident(&self) {
        self.violence_incidents.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            frames_enqueued: self.frames_enqueued.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_displayed: self.frames_displayed.load(Ordering::Relaxed),
            sos_alerts: self.sos_alerts.load(Ordering::Relaxed),
            violence_incidents: self.violence_incidents.load(Ordering::Relaxed),
        }
    }
}
