#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::{Detector, DetectorFactory};
use crate::detect::result::{non_maximum_suppression, BoundingBox, DetectionResult};
use crate::frame::Frame;

const INPUT_WIDTH: u32 = 320;
const INPUT_HEIGHT: u32 = 240;
/// Candidates below this score are discarded before suppression.
const CANDIDATE_FLOOR: f32 = 0.05;

/// Tract-based face detector for UltraFace-style ONNX models.
///
/// Expects outputs `scores [1, N, 2]` and `boxes [1, N, 4]` with corner
/// coordinates normalised to `0..1`. Runs fully in-process on the CPU.
pub struct TractFaceDetector {
    model: TypedRunnableModel<TypedModel>,
    nms_threshold: f32,
}

impl TractFaceDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, nms_threshold: f32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            nms_threshold,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = imageops::resize(
            frame.image(),
            INPUT_WIDTH,
            INPUT_HEIGHT,
            FilterType::Triangle,
        );
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize),
            |(_, channel, y, x)| {
                let value = resized.get_pixel(x as u32, y as u32)[channel] as f32;
                (value - 127.0) / 128.0
            },
        );
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, width: u32, height: u32) -> Result<Vec<BoundingBox>> {
        let scores = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no score output"))?
            .to_array_view::<f32>()
            .context("score tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("score tensor is not [1, N, 2]")?;
        let boxes = outputs
            .get(1)
            .ok_or_else(|| anyhow!("model produced no box output"))?
            .to_array_view::<f32>()
            .context("box tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("box tensor is not [1, N, 4]")?;

        let candidates = scores.shape()[1].min(boxes.shape()[1]);
        let (fw, fh) = (width as f32, height as f32);
        let mut found = Vec::new();
        for i in 0..candidates {
            let confidence = scores[[0, i, 1]];
            if confidence < CANDIDATE_FLOOR {
                continue;
            }
            let x1 = (boxes[[0, i, 0]] * fw).clamp(0.0, fw);
            let y1 = (boxes[[0, i, 1]] * fh).clamp(0.0, fh);
            let x2 = (boxes[[0, i, 2]] * fw).clamp(0.0, fw);
            let y2 = (boxes[[0, i, 3]] * fh).clamp(0.0, fh);
            if x2 <= x1 || y2 <= y1 {
                continue;
            }
            found.push(BoundingBox::new(
                x1 as i32,
                y1 as i32,
                (x2 - x1) as u32,
                (y2 - y1) as u32,
                confidence,
            ));
        }
        Ok(non_maximum_suppression(found, self.nms_threshold))
    }
}

impl Detector for TractFaceDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let boxes = self.decode(outputs, frame.width(), frame.height())?;
        Ok(DetectionResult::new(boxes))
    }
}

/// Loads `TractFaceDetector` from a provisioned model file.
#[derive(Clone, Debug)]
pub struct TractDetectorFactory {
    pub model_path: PathBuf,
    pub nms_threshold: f32,
}

impl DetectorFactory for TractDetectorFactory {
    fn load(&self) -> Result<Box<dyn Detector>> {
        if !self.model_path.exists() {
            return Err(anyhow!(
                "model artifact {} is not installed",
                self.model_path.display()
            ));
        }
        Ok(Box::new(TractFaceDetector::new(
            &self.model_path,
            self.nms_threshold,
        )?))
    }
}
