//! Frame capture sources.
//!
//! Capture is an injected capability: a `CaptureFactory` opens one
//! `CaptureSource` per streaming session and the supervisor drops it when the
//! session ends. Backends:
//! - Synthetic `stub://` streams (testing, demos)
//! - GStreamer decode of live URIs and local files (feature: capture-gstreamer)
//!
//! A source yields frames strictly in capture order. `Ok(None)` means the
//! stream ended; callers treat that like a read failure.

#[cfg(feature = "capture-gstreamer")]
mod gstreamer;
pub mod synthetic;

use anyhow::Result;
use std::path::PathBuf;

use crate::frame::{Frame, StreamProperties};

#[cfg(feature = "capture-gstreamer")]
pub use self::gstreamer::GstreamerSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Where a camera's frames come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Network URI (`rtsp://`, `http://`, `stub://`, ...).
    Live(String),
    /// Local video file.
    File(PathBuf),
}

impl SourceDescriptor {
    /// Pick the test file when one is configured, otherwise the live URI.
    pub fn from_parts(live: Option<&str>, test_file: Option<&str>) -> Option<Self> {
        if let Some(path) = test_file.map(str::trim).filter(|p| !p.is_empty()) {
            if path.starts_with("stub://") {
                return Some(Self::Live(path.to_string()));
            }
            return Some(Self::File(PathBuf::from(path)));
        }
        live.map(str::trim)
            .filter(|uri| !uri.is_empty())
            .map(|uri| Self::Live(uri.to_string()))
    }

    pub fn is_stub(&self) -> bool {
        matches!(self, Self::Live(uri) if uri.starts_with("stub://"))
    }
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live(uri) => write!(f, "{}", uri),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// An open capture handle. Dropping it releases the underlying stream.
pub trait CaptureSource: Send {
    /// Geometry of the decoded frames; zero fields mean "unknown".
    fn properties(&self) -> StreamProperties;

    /// Block until the next frame is decoded.
    fn read_frame(&mut self) -> Result<Option<Frame>>;
}

/// Opens capture handles. Shared by every supervisor in the process.
pub trait CaptureFactory: Send + Sync {
    fn open(&self, source: &SourceDescriptor) -> Result<Box<dyn CaptureSource>>;
}

/// Default factory: synthetic streams for `stub://`, GStreamer for everything else.
#[derive(Clone, Debug, Default)]
pub struct DefaultCaptureFactory;

impl CaptureFactory for DefaultCaptureFactory {
    fn open(&self, source: &SourceDescriptor) -> Result<Box<dyn CaptureSource>> {
        if let SourceDescriptor::Live(uri) = source {
            if uri.starts_with("stub://") {
                let config = SyntheticConfig::from_uri(uri)?;
                return Ok(Box::new(SyntheticSource::new(config)));
            }
        }
        #[cfg(feature = "capture-gstreamer")]
        {
            Ok(Box::new(GstreamerSource::open(source)?))
        }
        #[cfg(not(feature = "capture-gstreamer"))]
        {
            anyhow::bail!(
                "capturing {} requires the capture-gstreamer feature",
                source
            )
        }
    }
}
