use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::Frame;

/// Detector backend trait.
///
/// Implementations return every candidate they consider plausible; the
/// caller applies the configured confidence threshold. Inference errors are
/// per-frame failures and end the current streaming session.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult>;
}

/// Builds a detector on first use.
///
/// `load` is attempted at most once per supervisor; a failure disables
/// detection for the rest of that supervisor's lifetime.
pub trait DetectorFactory: Send + Sync {
    fn load(&self) -> Result<Box<dyn Detector>>;
}
