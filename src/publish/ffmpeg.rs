use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use super::{FrameSink, FrameSinkFactory};
use crate::frame::StreamProperties;

const DEFAULT_PROGRAM: &str = "ffmpeg";
const DEFAULT_PRESET: &str = "veryfast";
const DEFAULT_FORMAT: &str = "flv";
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);
const TEARDOWN_POLL: Duration = Duration::from_millis(20);

/// Encoder command line knobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderSettings {
    pub program: String,
    pub preset: String,
    pub format: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            format: DEFAULT_FORMAT.to_string(),
        }
    }
}

impl EncoderSettings {
    /// Arguments for raw RGB24 frames on stdin, H.264 into `format` at `target`.
    pub fn args(&self, properties: StreamProperties, target: &str) -> Vec<String> {
        let properties = properties.or_defaults();
        vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-s".into(),
            format!("{}x{}", properties.width, properties.height),
            "-r".into(),
            properties.fps.to_string(),
            "-i".into(),
            "-".into(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            self.preset.clone(),
            "-tune".into(),
            "zerolatency".into(),
            "-f".into(),
            self.format.clone(),
            target.to_string(),
        ]
    }
}

/// Spawns one encoder process per open stream.
#[derive(Clone, Debug, Default)]
pub struct FfmpegEncoderFactory {
    settings: EncoderSettings,
}

impl FfmpegEncoderFactory {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }
}

impl FrameSinkFactory for FfmpegEncoderFactory {
    fn open(&self, properties: StreamProperties, target: &str) -> Result<Box<dyn FrameSink>> {
        let args = self.settings.args(properties, target);
        let mut child = Command::new(&self.settings.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn encoder '{}'", self.settings.program))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("encoder stdin was not captured"))?;
        log::debug!(
            "encoder pid {} publishing to {} ({:?})",
            child.id(),
            target,
            properties.or_defaults()
        );
        Ok(Box::new(FfmpegSink {
            child,
            stdin: Some(stdin),
            target: target.to_string(),
        }))
    }
}

/// Running encoder process fed through its stdin.
pub struct FfmpegSink {
    child: Child,
    stdin: Option<ChildStdin>,
    target: String,
}

impl FrameSink for FfmpegSink {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("encoder input already closed"))?;
        stdin
            .write_all(frame)
            .with_context(|| format!("encoder pipe to {} broken", self.target))
    }

    fn close(&mut self) {
        // Closing stdin lets the encoder flush and exit on its own.
        drop(self.stdin.take());
        let deadline = Instant::now() + TEARDOWN_TIMEOUT;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    log::debug!("encoder for {} exited with {}", self.target, status);
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(TEARDOWN_POLL),
                Ok(None) => break,
                Err(err) => {
                    log::debug!("encoder wait for {} failed: {}", self.target, err);
                    break;
                }
            }
        }
        if let Err(err) = self.child.kill() {
            log::debug!("encoder kill for {} failed: {}", self.target, err);
        }
        let _ = self.child.wait();
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            self.close();
        }
    }
}
