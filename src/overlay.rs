//! Diagnostic overlay drawn on every processed frame.

use std::fs;
use std::path::Path;
use std::time::Instant;

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detect::{BoundingBox, DetectionResult};
use crate::frame::Frame;

const BOX_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOUR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: u32 = 2;
const TEXT_SCALE: f32 = 18.0;
const TEXT_LEFT: i32 = 10;
const IDENTITY_TOP: i32 = 6;
const RATE_TOP: i32 = 30;

/// Caption font compiled into the binary; a configured font file overrides it.
static EMBEDDED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSansMono.ttf");

/// Exponentially smoothed frame rate, seeded with the first observation.
#[derive(Clone, Debug)]
pub struct FrameRateEstimator {
    last: Instant,
    smoothed: f64,
}

impl FrameRateEstimator {
    const HISTORY_WEIGHT: f64 = 0.9;

    pub fn new(started: Instant) -> Self {
        Self {
            last: started,
            smoothed: 0.0,
        }
    }

    /// Record a frame observed at `now` and return the updated estimate.
    pub fn observe(&mut self, now: Instant) -> f64 {
        let dt = now.saturating_duration_since(self.last).as_secs_f64();
        let instant = if dt > 0.0 { 1.0 / dt } else { 0.0 };
        self.smoothed = if self.smoothed == 0.0 {
            instant
        } else {
            Self::HISTORY_WEIGHT * self.smoothed + (1.0 - Self::HISTORY_WEIGHT) * instant
        };
        self.last = now;
        self.smoothed
    }

    pub fn current(&self) -> f64 {
        self.smoothed
    }
}

/// Draws detection boxes and the camera/frame-rate caption in place.
pub struct OverlayRenderer {
    font: Option<FontArc>,
}

impl Default for OverlayRenderer {
    /// Renderer using the embedded caption font.
    fn default() -> Self {
        match FontArc::try_from_slice(EMBEDDED_FONT) {
            Ok(font) => Self::with_font(font),
            Err(err) => {
                log::error!("embedded overlay font is unusable: {}; drawing boxes only", err);
                Self::boxes_only()
            }
        }
    }
}

impl OverlayRenderer {
    /// Renderer without text; only detection boxes are drawn.
    pub fn boxes_only() -> Self {
        Self { font: None }
    }

    pub fn with_font(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    /// Load the caption font from disk.
    pub fn from_font_file(path: &Path) -> Result<Self> {
        let data = fs::read(path).with_context(|| format!("read font {}", path.display()))?;
        let font = FontArc::try_from_vec(data)
            .map_err(|_| anyhow!("failed to parse font file {}", path.display()))?;
        Ok(Self::with_font(font))
    }

    /// Font-backed renderer when `path` loads, embedded font otherwise.
    pub fn from_optional_font(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::from_font_file(path) {
            Ok(renderer) => renderer,
            Err(err) => {
                log::warn!("{:#}; using the embedded overlay font", err);
                Self::default()
            }
        }
    }

    pub fn draws_text(&self) -> bool {
        self.font.is_some()
    }

    pub fn render(&self, frame: &mut Frame, camera_id: &str, detections: &DetectionResult, fps: f64) {
        let image = frame.image_mut();
        for bbox in detections.iter() {
            draw_box(image, bbox);
        }
        if let Some(font) = &self.font {
            let scale = PxScale::from(TEXT_SCALE);
            let identity = format!("Camera: {}", camera_id);
            let rate = format!("FPS: {:.1}", fps);
            draw_text_mut(image, TEXT_COLOUR, TEXT_LEFT, IDENTITY_TOP, scale, font, &identity);
            draw_text_mut(image, TEXT_COLOUR, TEXT_LEFT, RATE_TOP, scale, font, &rate);
        }
    }
}

fn draw_box(image: &mut RgbImage, bbox: &BoundingBox) {
    for inset in 0..BOX_THICKNESS {
        let width = bbox.width.saturating_sub(2 * inset);
        let height = bbox.height.saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at(bbox.x + inset as i32, bbox.y + inset as i32).of_size(width, height);
        draw_hollow_rect_mut(image, rect, BOX_COLOUR);
    }
}
