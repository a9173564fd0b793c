//! GStreamer capture backend.
//!
//! Pipeline: `uridecodebin ! videoconvert ! video/x-raw,format=RGB ! appsink`.
//! Live URIs drop late buffers; file sources keep every frame. The first
//! sample is pulled while opening so the stream geometry is known before the
//! encoder is started.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::time::Duration;

use super::{CaptureSource, SourceDescriptor};
use crate::frame::{Frame, StreamProperties};

const OPEN_TIMEOUT: Duration = Duration::from_secs(10);
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

pub struct GstreamerSource {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    properties: StreamProperties,
    pending: Option<Frame>,
    description: String,
}

impl GstreamerSource {
    pub fn open(source: &SourceDescriptor) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let (uri, live) = match source {
            SourceDescriptor::Live(uri) => (uri.clone(), true),
            SourceDescriptor::File(path) => {
                let absolute = std::fs::canonicalize(path)
                    .with_context(|| format!("resolve video file {}", path.display()))?;
                let uri = url::Url::from_file_path(&absolute)
                    .map_err(|_| anyhow!("cannot build file uri for {}", absolute.display()))?;
                (uri.to_string(), false)
            }
        };

        let pipeline_description = format!(
            "uridecodebin uri=\"{}\" ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers={} drop={}",
            uri,
            if live { 1 } else { 4 },
            live
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build capture pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("capture pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set capture pipeline to Playing")?;

        let mut source = Self {
            pipeline,
            appsink,
            properties: StreamProperties {
                width: 0,
                height: 0,
                fps: 0,
            },
            pending: None,
            description: source.to_string(),
        };

        let first = source
            .pull(OPEN_TIMEOUT)?
            .ok_or_else(|| anyhow!("no frame from {} within {:?}", source.description, OPEN_TIMEOUT))?;
        source.pending = Some(first);
        log::info!(
            "GstreamerSource: connected to {} ({}x{} @ {} fps)",
            source.description,
            source.properties.width,
            source.properties.height,
            source.properties.fps
        );
        Ok(source)
    }

    fn pull(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        self.check_bus()?;
        let timeout = gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if self.appsink.is_eos() {
                return Ok(None);
            }
            return Err(anyhow!("capture stream {} stalled", self.description));
        };
        let (pixels, properties) = sample_to_pixels(&sample)?;
        self.properties = properties;
        Frame::from_rgb(properties.width, properties.height, pixels).map(Some)
    }

    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            if let MessageView::Error(err) = message.view() {
                return Err(anyhow!(
                    "gstreamer error from {:?}: {}",
                    err.src().map(|s| s.path_string()),
                    err.error()
                ));
            }
        }
        Ok(())
    }
}

impl CaptureSource for GstreamerSource {
    fn properties(&self) -> StreamProperties {
        self.properties
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.pull(FRAME_TIMEOUT)
    }
}

impl Drop for GstreamerSource {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::debug!("GstreamerSource: release {} failed: {}", self.description, err);
        }
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, StreamProperties)> {
    let buffer = sample.buffer().context("capture sample missing buffer")?;
    let caps = sample.caps().context("capture sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse capture caps as video info")?;

    let width = info.width();
    let height = info.height();
    let fps = info.fps();
    let fps = if fps.denom() > 0 {
        (fps.numer() / fps.denom()).max(0) as u32
    } else {
        0
    };
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map capture buffer")?;
    let data = map.as_slice();
    let properties = StreamProperties { width, height, fps };

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("capture buffer shorter than frame")?
            .to_vec();
        return Ok((pixels, properties));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("capture buffer row is out of bounds")?,
        );
    }

    Ok((pixels, properties))
}
