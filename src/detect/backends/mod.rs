pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

use anyhow::{anyhow, Result};

use crate::detect::backend::{Detector, DetectorFactory};

pub use stub::{StubDetector, StubDetectorFactory};

#[cfg(feature = "backend-tract")]
pub use self::tract::{TractDetectorFactory, TractFaceDetector};

/// Factory whose load always fails, leaving supervisors in no-detection mode.
#[derive(Clone, Debug)]
pub struct UnavailableDetectorFactory {
    reason: String,
}

impl UnavailableDetectorFactory {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl DetectorFactory for UnavailableDetectorFactory {
    fn load(&self) -> Result<Box<dyn Detector>> {
        Err(anyhow!("{}", self.reason))
    }
}
