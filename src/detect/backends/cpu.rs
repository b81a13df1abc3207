use anyhow::Result;
use image::imageops::{self, FilterType};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::detect::backend::{GestureDetector, Incident, ViolenceAnalysis, ViolenceDetector};
use crate::frame::{luma, Frame};

/// Side length of the luma thumbnail used for frame differencing.
const SIGNATURE_WIDTH: u32 = 32;
const SIGNATURE_HEIGHT: u32 = 24;

const INCIDENT_BORDER: [u8; 3] = [220, 20, 20];

/// CPU open-hand heuristic: fraction of skin-toned pixels in the frame.
///
/// Uses the classic RGB skin rule. Crude, but deterministic and dependency
/// free; swap in the `tract` backend for a trained classifier.
pub struct SkinToneGestureDetector {
    min_coverage: f32,
}

impl SkinToneGestureDetector {
    pub const DEFAULT_MIN_COVERAGE: f32 = 0.18;

    pub fn new(min_coverage: f32) -> Self {
        Self { min_coverage }
    }

    /// Fraction of pixels, 0..=1, classified as skin.
    pub fn coverage(frame: &Frame) -> f32 {
        let total = frame.width() as u64 * frame.height() as u64;
        if total == 0 {
            return 0.0;
        }
        let skin = frame
            .image()
            .pixels()
            .filter(|p| is_skin(p.0))
            .count() as u64;
        skin as f32 / total as f32
    }
}

impl Default for SkinToneGestureDetector {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_COVERAGE)
    }
}

impl GestureDetector for SkinToneGestureDetector {
    fn name(&self) -> &'static str {
        "skin"
    }

    fn classify_open_hand(&mut self, frame: &Frame) -> Result<bool> {
        Ok(Self::coverage(frame) >= self.min_coverage)
    }
}

fn is_skin([r, g, b]: [u8; 3]) -> bool {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    r > 95 && g > 40 && b > 20 && max - min > 15 && r.abs_diff(g) > 15 && r > g && r > b
}

/// CPU violence heuristic: sudden whole-scene motion.
///
/// Keeps a small luma thumbnail per location and flags an incident when the
/// mean absolute difference against the previous thumbnail reaches
/// `threshold`. Flagged frames get a red border, but a location raises at most
/// one incident per `cooldown`.
pub struct MotionViolenceDetector {
    threshold: f32,
    cooldown: Duration,
    history: HashMap<String, Vec<f32>>,
    last_incident: HashMap<String, Instant>,
}

impl MotionViolenceDetector {
    pub const DEFAULT_THRESHOLD: f32 = 28.0;
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);

    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            cooldown: Self::DEFAULT_COOLDOWN,
            history: HashMap::new(),
            last_incident: HashMap::new(),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    fn cooling_down(&self, location: &str, now: Instant) -> bool {
        self.last_incident
            .get(location)
            .map(|at| now.saturating_duration_since(*at) < self.cooldown)
            .unwrap_or(false)
    }

    fn signature(frame: &Frame) -> Vec<f32> {
        let thumb = imageops::resize(
            frame.image(),
            SIGNATURE_WIDTH,
            SIGNATURE_HEIGHT,
            FilterType::Triangle,
        );
        thumb.pixels().map(|p| luma(p.0)).collect()
    }
}

impl Default for MotionViolenceDetector {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

impl ViolenceDetector for MotionViolenceDetector {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn process(&mut self, mut frame: Frame, location: &str) -> Result<ViolenceAnalysis> {
        let current = Self::signature(&frame);
        let previous = self.history.insert(location.to_string(), current);
        let Some(previous) = previous else {
            return Ok(ViolenceAnalysis::quiet(frame));
        };
        let current = &self.history[location];

        let score = current
            .iter()
            .zip(previous.iter())
            .map(|(a, b)| (a - b).abs())
            .sum::<f32>()
            / current.len().max(1) as f32;

        if score < self.threshold {
            return Ok(ViolenceAnalysis::quiet(frame));
        }
        frame.draw_border((frame.height() / 60).max(2), INCIDENT_BORDER);

        let now = Instant::now();
        if self.cooling_down(location, now) {
            return Ok(ViolenceAnalysis::quiet(frame));
        }
        self.last_incident.insert(location.to_string(), now);
        Ok(ViolenceAnalysis {
            frame,
            incident: Some(Incident {
                action: "rapid motion".to_string(),
                score,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skin_coverage_decides_open_hand() {
        let mut detector = SkinToneGestureDetector::default();
        let skin = Frame::filled(20, 20, [220, 170, 140]);
        let wall = Frame::filled(20, 20, [40, 90, 200]);
        assert!(detector.classify_open_hand(&skin).unwrap());
        assert!(!detector.classify_open_hand(&wall).unwrap());

        let mut mixed = Frame::filled(20, 20, [40, 90, 200]);
        mixed.fill_rect(0, 0, 20, 2, [220, 170, 140]);
        assert!((SkinToneGestureDetector::coverage(&mixed) - 0.1).abs() < 1e-6);
        assert!(!detector.classify_open_hand(&mixed).unwrap());
    }

    #[test]
    fn motion_detector_flags_sudden_change_per_location() {
        let mut detector = MotionViolenceDetector::default().with_cooldown(Duration::ZERO);

        let first = detector.process(Frame::filled(64, 48, [0, 0, 0]), "Gate").unwrap();
        assert!(first.incident.is_none());

        let still = detector.process(Frame::filled(64, 48, [0, 0, 0]), "Gate").unwrap();
        assert!(still.incident.is_none());

        // First frame for a new location never alerts.
        let other = detector.process(Frame::filled(64, 48, [255, 255, 255]), "Lobby").unwrap();
        assert!(other.incident.is_none());

        let burst = detector.process(Frame::filled(64, 48, [255, 255, 255]), "Gate").unwrap();
        let incident = burst.incident.expect("incident");
        assert_eq!(incident.action, "rapid motion");
        assert!(incident.score > 200.0);
        assert_eq!(burst.frame.image().get_pixel(0, 0).0, INCIDENT_BORDER);
        assert_eq!(burst.frame.image().get_pixel(32, 24).0, [255, 255, 255]);
    }

    #[test]
    fn sustained_motion_raises_one_incident_per_cooldown() {
        let mut detector = MotionViolenceDetector::default();
        let black = || Frame::filled(64, 48, [0, 0, 0]);
        let white = || Frame::filled(64, 48, [255, 255, 255]);

        detector.process(black(), "Gate").unwrap();
        let mut incidents = 0;
        for i in 0..10 {
            let frame = if i % 2 == 0 { white() } else { black() };
            let analysis = detector.process(frame, "Gate").unwrap();
            // Every flagged frame is still marked for the operator.
            assert_eq!(analysis.frame.image().get_pixel(0, 0).0, INCIDENT_BORDER);
            incidents += analysis.incident.is_some() as u32;
        }
        assert_eq!(incidents, 1);

        // Cooldown is tracked per location.
        detector.process(black(), "Lobby").unwrap();
        let lobby = detector.process(white(), "Lobby").unwrap();
        assert!(lobby.incident.is_some());
    }
}
