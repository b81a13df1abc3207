mod backend;
mod backends;
mod registry;

pub use backend::{GestureDetector, Incident, ViolenceAnalysis, ViolenceDetector};
pub use backends::{
    MotionViolenceDetector, SkinToneGestureDetector, StubGestureDetector, StubViolenceDetector,
};
#[cfg(feature = "backend-tract")]
pub use backends::TractGestureDetector;
pub use registry::{DetectorRegistry, GestureFactory, ViolenceFactory};
