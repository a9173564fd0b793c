use anyhow::Result;
use std::sync::Arc;

use super::backend::{Detector, DetectorFactory};
use super::result::DetectionResult;
use crate::frame::Frame;

/// Lazily loaded detector owned by one supervisor.
///
/// The first `detect` call loads the backend. If loading fails the slot is
/// disabled for good and every later call returns an empty result.
pub struct DetectorSlot {
    camera_id: String,
    state: SlotState,
}

enum SlotState {
    Unloaded(Arc<dyn DetectorFactory>),
    Ready(Box<dyn Detector>),
    Disabled,
}

impl DetectorSlot {
    pub fn new(camera_id: impl Into<String>, factory: Arc<dyn DetectorFactory>) -> Self {
        Self {
            camera_id: camera_id.into(),
            state: SlotState::Unloaded(factory),
        }
    }

    /// A slot that never detects anything.
    pub fn disabled(camera_id: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            state: SlotState::Disabled,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.state, SlotState::Disabled)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, SlotState::Ready(_))
    }

    /// Detect and keep boxes scoring at least `min_confidence`.
    pub fn detect(&mut self, frame: &Frame, min_confidence: f32) -> Result<DetectionResult> {
        if let SlotState::Unloaded(factory) = &self.state {
            self.state = match factory.load() {
                Ok(detector) => {
                    log::info!("[{}] detector '{}' loaded", self.camera_id, detector.name());
                    SlotState::Ready(detector)
                }
                Err(err) => {
                    log::warn!(
                        "[{}] failed to load detector, detection disabled: {:#}",
                        self.camera_id,
                        err
                    );
                    SlotState::Disabled
                }
            };
        }

        match &mut self.state {
            SlotState::Ready(detector) => Ok(detector
                .detect(frame)?
                .retain_min_confidence(min_confidence)),
            SlotState::Unloaded(_) | SlotState::Disabled => Ok(DetectionResult::empty()),
        }
    }
}
