use std::fmt;

/// Failures that callers of the monitor may want to match on.
///
/// Everything else travels as a plain `anyhow::Error`; these variants are
/// wrapped in one too and can be recovered with `downcast_ref::<WatchError>()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// `start()` was called with an empty registry.
    NoRegions,
    /// A region could not be captured.
    CaptureFailure { region_id: u32, reason: String },
    /// A detector returned an error or panicked.
    DetectorFailure {
        kind: &'static str,
        region_id: u32,
        reason: String,
    },
    /// Worker threads did not finish within the shutdown timeout.
    PoolShutdownTimeout { stragglers: usize },
    /// Registry mutation attempted while the monitor is running.
    Running,
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchError::NoRegions => write!(f, "no regions registered"),
            WatchError::CaptureFailure { region_id, reason } => {
                write!(f, "capture failed for region {}: {}", region_id, reason)
            }
            WatchError::DetectorFailure {
                kind,
                region_id,
                reason,
            } => write!(
                f,
                "{} detector failed for region {}: {}",
                kind, region_id, reason
            ),
            WatchError::PoolShutdownTimeout { stragglers } => {
                write!(f, "{} worker(s) still busy after shutdown timeout", stragglers)
            }
            WatchError::Running => write!(f, "monitor is running"),
        }
    }
}

impl std::error::Error for WatchError {}
