use anyhow::Result;

use crate::frame::Frame;

/// Open-hand classifier driving the SOS gesture pipeline.
///
/// # Audit Boundary
///
/// Implementations receive frames of the pipeline working resolution and
/// MUST NOT retain them beyond the call, write them to disk, or send them over
/// the network. The classifier is stateless from the pipeline's point of view;
/// debouncing lives in `GestureStateMachine`.
pub trait GestureDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Is an open hand visible in `frame`?
    fn classify_open_hand(&mut self, frame: &Frame) -> Result<bool>;

    /// Optional warm-up hook, called once before the task loop starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Violence classifier. Owns all temporal/tracking state, keyed by location,
/// and annotates the frame it is handed.
pub trait ViolenceDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn process(&mut self, frame: Frame, location: &str) -> Result<ViolenceAnalysis>;

    /// Optional warm-up hook, called once before the task loop starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Annotated frame plus the incident it revealed, if any.
#[derive(Debug)]
pub struct ViolenceAnalysis {
    pub frame: Frame,
    pub incident: Option<Incident>,
}

impl ViolenceAnalysis {
    pub fn quiet(frame: Frame) -> Self {
        Self {
            frame,
            incident: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Incident {
    /// Short description of what was detected, e.g. "rapid motion".
    pub action: String,
    /// Backend-specific score that crossed its threshold.
    pub score: f32,
}
