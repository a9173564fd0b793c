mod backend;
mod backends;
mod result;
mod slot;

pub use backend::{Detector, DetectorFactory};
pub use backends::{StubDetector, StubDetectorFactory, UnavailableDetectorFactory};
#[cfg(feature = "backend-tract")]
pub use backends::{TractDetectorFactory, TractFaceDetector};
pub use result::{non_maximum_suppression, BoundingBox, DetectionResult};
pub use slot::DetectorSlot;
