pub mod cpu;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use cpu::{MotionViolenceDetector, SkinToneGestureDetector};
pub use stub::{StubGestureDetector, StubViolenceDetector};

#[cfg(feature = "backend-tract")]
pub use tract::TractGestureDetector;
