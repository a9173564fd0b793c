//! Captured frames.
//!
//! A `Frame` owns one decoded picture in packed RGB24 layout together with
//! the instant it was captured. Frames flow strictly in capture order through
//! a single camera's pipeline and are dropped as soon as the encoder and the
//! alert dispatcher are done with them.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::Instant;

/// Bytes per pixel for the packed RGB24 layout every source produces.
pub const BYTES_PER_PIXEL: usize = 3;

/// Fallback geometry used when a source cannot report its own.
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const DEFAULT_FPS: u32 = 15;

/// Geometry and nominal rate of an open stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamProperties {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl StreamProperties {
    /// Replace unknown (zero) fields with the encoder defaults.
    pub fn or_defaults(self) -> Self {
        Self {
            width: if self.width == 0 {
                DEFAULT_WIDTH
            } else {
                self.width
            },
            height: if self.height == 0 {
                DEFAULT_HEIGHT
            } else {
                self.height
            },
            fps: if self.fps == 0 { DEFAULT_FPS } else { self.fps },
        }
    }

    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

impl Default for StreamProperties {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
        }
    }
}

/// One decoded RGB24 picture.
pub struct Frame {
    image: RgbImage,
    captured_at: Instant,
}

impl Frame {
    /// Wrap packed RGB24 bytes. Fails when the buffer does not match the geometry.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(BYTES_PER_PIXEL))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("pixel buffer rejected for {}x{}", width, height))?;
        Ok(Self {
            image,
            captured_at: Instant::now(),
        })
    }

    /// Uniformly filled frame, used by synthetic sources.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, image::Rgb([value, value, value])),
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Raw packed pixel bytes, the exact layout the encoder process consumes.
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_rejects_short_buffers() {
        let err = Frame::from_rgb(4, 4, vec![0u8; 10]).unwrap_err();
        assert!(format!("{err}").contains("expected 48 RGB bytes"));
    }

    #[test]
    fn frame_bytes_are_packed_rgb() -> Result<()> {
        let frame = Frame::from_rgb(2, 1, vec![1, 2, 3, 4, 5, 6])?;
        assert_eq!(frame.as_bytes(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 1);
        Ok(())
    }

    #[test]
    fn unknown_geometry_falls_back_to_defaults() {
        let props = StreamProperties {
            width: 0,
            height: 240,
            fps: 0,
        }
        .or_defaults();
        assert_eq!(props.width, DEFAULT_WIDTH);
        assert_eq!(props.height, 240);
        assert_eq!(props.fps, DEFAULT_FPS);
        assert_eq!(props.frame_len(), 640 * 240 * 3);
    }
}
