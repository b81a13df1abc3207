use anyhow::Result;

use crate::detect::backend::{GestureDetector, ViolenceAnalysis, ViolenceDetector};
use crate::frame::Frame;

/// Stub gesture backend for testing. Reports a fixed answer for every frame.
pub struct StubGestureDetector {
    open: bool,
}

impl StubGestureDetector {
    pub fn new(open: bool) -> Self {
        Self { open }
    }
}

impl Default for StubGestureDetector {
    fn default() -> Self {
        Self::new(false)
    }
}

impl GestureDetector for StubGestureDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classify_open_hand(&mut self, _frame: &Frame) -> Result<bool> {
        Ok(self.open)
    }
}

/// Stub violence backend for testing. Passes frames through untouched.
#[derive(Default)]
pub struct StubViolenceDetector;

impl StubViolenceDetector {
    pub fn new() -> Self {
        Self
    }
}

impl ViolenceDetector for StubViolenceDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn process(&mut self, frame: Frame, _location: &str) -> Result<ViolenceAnalysis> {
        Ok(ViolenceAnalysis::quiet(frame))
    }
}
