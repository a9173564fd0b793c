//! Output publishing.
//!
//! A `FrameSink` receives the raw RGB24 bytes of each processed frame while a
//! stream is open. The production sink pipes them into an external encoder
//! process; an in-memory sink records them for tests.

mod ffmpeg;
mod memory;

use anyhow::Result;

use crate::frame::StreamProperties;

pub use ffmpeg::{EncoderSettings, FfmpegEncoderFactory, FfmpegSink};
pub use memory::{MemorySink, MemorySinkFactory, SinkRecord};

/// One open output for one stream.
pub trait FrameSink: Send {
    /// Write one frame. An error means the sink is broken and the stream must
    /// be torn down.
    fn write(&mut self, frame: &[u8]) -> Result<()>;

    /// Release the sink. Teardown problems are logged, never returned.
    fn close(&mut self);
}

/// Opens sinks for newly connected streams.
pub trait FrameSinkFactory: Send + Sync {
    fn open(&self, properties: StreamProperties, target: &str) -> Result<Box<dyn FrameSink>>;
}

/// Closes the wrapped sink when dropped, on every exit path.
pub struct SinkGuard {
    sink: Option<Box<dyn FrameSink>>,
}

impl SinkGuard {
    pub fn new(sink: Box<dyn FrameSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn write(&mut self, frame: &[u8]) -> Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.write(frame),
            None => Ok(()),
        }
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_closes_on_drop() -> Result<()> {
        let factory = MemorySinkFactory::default();
        {
            let sink = factory.open(StreamProperties::default(), "rtmp://out/live")?;
            let mut guard = SinkGuard::new(sink);
            guard.write(&[1, 2, 3])?;
            assert_eq!(factory.open_sinks(), 1);
        }
        assert_eq!(factory.open_sinks(), 0);
        let records = factory.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frames, 1);
        assert!(records[0].closed);
        Ok(())
    }
}
