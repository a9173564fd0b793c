use anyhow::Result;

use crate::detect::backend::{Detector, DetectorFactory};
use crate::detect::result::{BoundingBox, DetectionResult};
use crate::frame::Frame;

/// Mean brightness above which the stub reports a region.
const BRIGHT_THRESHOLD: f32 = 128.0;

/// Stub backend for testing and demos.
///
/// In `bright_regions` mode it reports one centred box on frames whose mean
/// brightness exceeds mid-grey, which pairs with the alternating synthetic
/// source. In `fixed` mode it returns the same boxes for every frame.
pub struct StubDetector {
    mode: StubMode,
}

enum StubMode {
    Bright { confidence: f32 },
    Fixed(Vec<BoundingBox>),
}

impl StubDetector {
    pub fn bright_regions(confidence: f32) -> Self {
        Self {
            mode: StubMode::Bright { confidence },
        }
    }

    pub fn fixed(boxes: Vec<BoundingBox>) -> Self {
        Self {
            mode: StubMode::Fixed(boxes),
        }
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::bright_regions(0.9)
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        match &self.mode {
            StubMode::Fixed(boxes) => Ok(DetectionResult::new(boxes.clone())),
            StubMode::Bright { confidence } => {
                let pixels = frame.as_bytes();
                if pixels.is_empty() {
                    return Ok(DetectionResult::empty());
                }
                let sum: u64 = pixels.iter().map(|&p| p as u64).sum();
                let mean = sum as f32 / pixels.len() as f32;
                if mean <= BRIGHT_THRESHOLD {
                    return Ok(DetectionResult::empty());
                }
                let (w, h) = (frame.width(), frame.height());
                Ok(DetectionResult::new(vec![BoundingBox::new(
                    (w / 4) as i32,
                    (h / 4) as i32,
                    w / 2,
                    h / 2,
                    *confidence,
                )]))
            }
        }
    }
}

/// Factory handing out `StubDetector::bright_regions` instances.
#[derive(Clone, Copy, Debug)]
pub struct StubDetectorFactory {
    pub confidence: f32,
}

impl Default for StubDetectorFactory {
    fn default() -> Self {
        Self { confidence: 0.9 }
    }
}

impl DetectorFactory for StubDetectorFactory {
    fn load(&self) -> Result<Box<dyn Detector>> {
        Ok(Box::new(StubDetector::bright_regions(self.confidence)))
    }
}
