//! Synthetic frame source (`stub://` URIs).
//!
//! `stub://<name>?frames=N&width=W&height=H&fps=F` yields a deterministic
//! stream that alternates between a dark and a bright frame. `frames=0` (or
//! no `frames` parameter) means the stream never ends.

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::CaptureSource;
use crate::frame::{Frame, StreamProperties};

const DEFAULT_STUB_WIDTH: u32 = 320;
const DEFAULT_STUB_HEIGHT: u32 = 240;
const DEFAULT_STUB_FPS: u32 = 5;

/// Parameters of a synthetic stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub name: String,
    /// Number of frames before end-of-stream; 0 = unbounded.
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            frames: 0,
            width: DEFAULT_STUB_WIDTH,
            height: DEFAULT_STUB_HEIGHT,
            fps: DEFAULT_STUB_FPS,
        }
    }
}

impl SyntheticConfig {
    pub fn from_uri(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).with_context(|| format!("parse stub uri {}", uri))?;
        if url.scheme() != "stub" {
            return Err(anyhow!("not a stub uri: {}", uri));
        }
        let mut config = Self {
            name: url.host_str().unwrap_or("synthetic").to_string(),
            ..Self::default()
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "frames" => config.frames = parse_param(&key, &value)?,
                "width" => config.width = parse_param(&key, &value)?,
                "height" => config.height = parse_param(&key, &value)?,
                "fps" => config.fps = parse_param(&key, &value)?,
                other => log::debug!("stub uri {}: ignoring parameter '{}'", uri, other),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("stub uri {} has zero frame size", uri));
        }
        Ok(config)
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("stub parameter '{}' has invalid value '{}'", key, value))
}

/// Deterministic in-process stream.
pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        log::info!(
            "SyntheticSource: connected to stub://{} ({}x{})",
            config.name,
            config.width,
            config.height
        );
        Self {
            config,
            frame_count: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

impl CaptureSource for SyntheticSource {
    fn properties(&self) -> StreamProperties {
        StreamProperties {
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
        }
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.config.frames != 0 && self.frame_count >= self.config.frames {
            return Ok(None);
        }
        let value = if self.frame_count % 2 == 0 { 0 } else { 255 };
        self.frame_count += 1;
        Ok(Some(Frame::filled(
            self.config.width,
            self.config.height,
            value,
        )))
    }
}
