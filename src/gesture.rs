//! Debounced SOS detection.
//!
//! The gesture classifier answers one question per frame: is an open hand
//! visible? `GestureStateMachine` turns that boolean stream into SOS alerts:
//!
//! - An occurrence is a discrete false -> true edge. Inside a window a hand
//!   held open over many frames counts once; it has to close and reopen to
//!   count again.
//! - The first occurrence opens a counting window at `now`.
//! - Reaching `threshold_count` occurrences inside the window emits exactly one
//!   `SosAlert` and resets to idle.
//! - A window older than `timeframe` is discarded before the current
//!   observation is applied.
//! - Both resets clear the hand state as well. A hand still open on the frame
//!   after a reset is a fresh edge and opens the next window.

use std::time::{Duration, Instant};

use crate::frame::Frame;

/// Occurrences needed inside one window to raise an SOS.
pub const SOS_THRESHOLD_COUNT: u32 = 3;

/// Length of the counting window.
pub const SOS_TIMEFRAME: Duration = Duration::from_secs(10);

const BANNER_IDLE: [u8; 3] = [60, 60, 60];
const BANNER_COUNTING: [u8; 3] = [240, 170, 0];
const BANNER_ALERT: [u8; 3] = [220, 20, 20];
const MARKER: [u8; 3] = [255, 255, 255];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SosPolicy {
    pub threshold_count: u32,
    pub timeframe: Duration,
}

impl Default for SosPolicy {
    fn default() -> Self {
        Self {
            threshold_count: SOS_THRESHOLD_COUNT,
            timeframe: SOS_TIMEFRAME,
        }
    }
}

/// Per-task gesture state.
///
/// `gesture_start_time` is `Some` exactly while a counting window is open, and
/// then `gesture_count >= 1`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GestureState {
    pub is_open: bool,
    pub gesture_start_time: Option<Instant>,
    pub gesture_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SosAlert {
    pub location: String,
    pub triggered_at: Instant,
    pub gesture_count: u32,
}

pub struct GestureStateMachine {
    location: String,
    policy: SosPolicy,
    state: GestureState,
}

impl GestureStateMachine {
    pub fn new(location: impl Into<String>, policy: SosPolicy) -> Self {
        Self {
            location: location.into(),
            policy,
            state: GestureState::default(),
        }
    }

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    /// Feed one observation. Returns an alert when this observation completes
    /// the threshold inside the window.
    pub fn observe(&mut self, is_open_now: bool, now: Instant) -> Option<SosAlert> {
        if let Some(start) = self.state.gesture_start_time {
            if now.saturating_duration_since(start) > self.policy.timeframe {
                log::debug!(
                    "gesture window expired at {} with {} occurrence(s)",
                    self.location,
                    self.state.gesture_count
                );
                self.state = GestureState::default();
            }
        }

        let rising = is_open_now && !self.state.is_open;
        self.state.is_open = is_open_now;
        if !rising {
            return None;
        }

        match self.state.gesture_start_time {
            None => {
                self.state.gesture_start_time = Some(now);
                self.state.gesture_count = 1;
            }
            Some(_) => self.state.gesture_count += 1,
        }

        if self.state.gesture_count >= self.policy.threshold_count {
            let alert = SosAlert {
                location: self.location.clone(),
                triggered_at: now,
                gesture_count: self.state.gesture_count,
            };
            self.state = GestureState::default();
            return Some(alert);
        }
        None
    }

    /// Observe and paint the resulting status onto `frame`.
    pub fn step(
        &mut self,
        mut frame: Frame,
        is_open_now: bool,
        now: Instant,
    ) -> (Frame, Option<SosAlert>) {
        let alert = self.observe(is_open_now, now);
        self.annotate(&mut frame, alert.is_some());
        (frame, alert)
    }

    fn annotate(&self, frame: &mut Frame, alerted: bool) {
        let banner = (frame.height() / 24).max(4);
        let (color, markers) = if alerted {
            (BANNER_ALERT, self.policy.threshold_count)
        } else if self.state.gesture_start_time.is_some() {
            (BANNER_COUNTING, self.state.gesture_count)
        } else {
            (BANNER_IDLE, 0)
        };
        frame.fill_rect(0, 0, frame.width(), banner, color);

        let size = banner.saturating_sub(2).max(1);
        for i in 0..markers {
            let x = 2 + i * (size + 2);
            frame.fill_rect(x, 1, size, size, MARKER);
        }
    }
}
