//! Per-camera supervision.
//!
//! A `CameraSupervisor` owns one camera for the lifetime of the process:
//!
//! ```text
//! Disconnected -> Connecting -> Streaming -> Error -> (backoff) -> Connecting
//!                                  any state -> Stopped
//! ```
//!
//! Entering `Streaming` opens the capture handle and, when an output target is
//! configured, the encoder sink; both are released on every exit path. Stops
//! are observed at the top of the outer loop, the top of each frame and
//! during the backoff wait.

mod backoff;
mod state;
mod stop;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::alert::{AlertDispatcher, AlertRouting};
use crate::config::{CameraConfig, SupervisorSettings};
use crate::detect::{DetectorFactory, DetectorSlot};
use crate::ingest::CaptureFactory;
use crate::overlay::{FrameRateEstimator, OverlayRenderer};
use crate::publish::{FrameSinkFactory, SinkGuard};
use crate::sampler::FrameSampler;

pub use backoff::Backoff;
pub use state::{StateCell, SupervisorState, WorkerState, WorkerSummary};
pub use stop::StopToken;

const DEFAULT_FRAME_PACING: Duration = Duration::from_millis(1);

/// Injected collaborators shared by every supervisor in the process.
#[derive(Clone)]
pub struct Capabilities {
    pub capture: Arc<dyn CaptureFactory>,
    pub detector: Arc<dyn DetectorFactory>,
    pub encoder: Arc<dyn FrameSinkFactory>,
    pub alerts: Arc<dyn AlertRouting>,
    pub overlay: Arc<OverlayRenderer>,
    pub settings: SupervisorSettings,
    /// Yield after each processed frame.
    pub frame_pacing: Duration,
}

impl Capabilities {
    pub fn new(
        capture: Arc<dyn CaptureFactory>,
        detector: Arc<dyn DetectorFactory>,
        encoder: Arc<dyn FrameSinkFactory>,
        alerts: Arc<dyn AlertRouting>,
    ) -> Self {
        Self {
            capture,
            detector,
            encoder,
            alerts,
            overlay: Arc::new(OverlayRenderer::default()),
            settings: SupervisorSettings::default(),
            frame_pacing: DEFAULT_FRAME_PACING,
        }
    }

    pub fn with_overlay(mut self, overlay: OverlayRenderer) -> Self {
        self.overlay = Arc::new(overlay);
        self
    }

    pub fn with_settings(mut self, settings: SupervisorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_frame_pacing(mut self, pacing: Duration) -> Self {
        self.frame_pacing = pacing;
        self
    }
}

pub struct CameraSupervisor {
    config: CameraConfig,
    capture: Arc<dyn CaptureFactory>,
    encoder: Arc<dyn FrameSinkFactory>,
    detector: DetectorSlot,
    sampler: FrameSampler,
    overlay: Arc<OverlayRenderer>,
    alerts: AlertDispatcher,
    frame_pacing: Duration,
    state: WorkerState,
    status: StateCell,
    reconnects: u64,
    errors: u64,
}

impl CameraSupervisor {
    pub fn new(config: CameraConfig, caps: &Capabilities, stop: StopToken) -> Self {
        let backoff = Backoff::new(caps.settings.backoff_initial, caps.settings.backoff_max);
        Self {
            detector: DetectorSlot::new(config.id.clone(), caps.detector.clone()),
            sampler: FrameSampler::new(config.skip_frames),
            alerts: caps.alerts.dispatcher_for(&config),
            capture: caps.capture.clone(),
            encoder: caps.encoder.clone(),
            overlay: caps.overlay.clone(),
            frame_pacing: caps.frame_pacing,
            state: WorkerState::new(stop, backoff),
            status: StateCell::default(),
            reconnects: 0,
            errors: 0,
            config,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.config.id
    }

    /// Handle for observing the state from another thread.
    pub fn state_cell(&self) -> StateCell {
        self.status.clone()
    }

    pub fn stop_token(&self) -> StopToken {
        self.state.running.clone()
    }

    /// Supervise until stopped. Never fails; problems are logged and counted.
    pub fn run(mut self) -> WorkerSummary {
        log::info!("[{}] supervisor started for {}", self.config.id, self.config.source);
        while self.state.is_running() {
            self.transition(SupervisorState::Connecting);
            match self.stream_once() {
                Ok(()) => {
                    self.state.backoff.reset();
                }
                Err(err) => {
                    self.errors += 1;
                    self.transition(SupervisorState::Error);
                    log::warn!("[{}] stream error: {:#}", self.config.id, err);
                    let delay = self.state.backoff.next_delay();
                    log::debug!("[{}] reconnecting in {:?}", self.config.id, delay);
                    if self.state.running.wait_timeout(delay) {
                        break;
                    }
                    self.reconnects += 1;
                }
            }
        }
        self.transition(SupervisorState::Stopped);
        let summary = WorkerSummary {
            camera_id: self.config.id.clone(),
            processed: self.state.processed,
            reconnects: self.reconnects,
            errors: self.errors,
            backoff: self.state.backoff.current(),
            fps: self.state.fps,
        };
        log::info!("{} stopped", summary);
        summary
    }

    /// One streaming session. `Ok` means a requested, clean stop.
    fn stream_once(&mut self) -> Result<()> {
        let mut source = self
            .capture
            .open(&self.config.source)
            .with_context(|| format!("failed to open {}", self.config.source))?;
        let properties = source.properties().or_defaults();
        let mut sink = match &self.config.output {
            Some(target) => Some(SinkGuard::new(
                self.encoder
                    .open(properties, target)
                    .with_context(|| format!("failed to start encoder for {}", target))?,
            )),
            None => None,
        };
        self.transition(SupervisorState::Streaming);
        log::info!(
            "[{}] streaming {}x{} @ {} fps",
            self.config.id,
            properties.width,
            properties.height,
            properties.fps
        );

        let mut index: u64 = 0;
        let mut rate = FrameRateEstimator::new(Instant::now());
        loop {
            if !self.state.is_running() {
                return Ok(());
            }
            let mut frame = source
                .read_frame()?
                .ok_or_else(|| anyhow!("frame read failed: end of stream"))?;
            index += 1;
            if !self.sampler.should_process(index) {
                continue;
            }

            let started = Instant::now();
            let detections = self.detector.detect(&frame, self.config.min_confidence)?;
            let fps = rate.observe(started);
            self.state.fps = fps;
            self.state.last_frame = Some(frame.captured_at());

            self.overlay
                .render(&mut frame, &self.config.id, &detections, fps);
            if let Some(sink) = sink.as_mut() {
                sink.write(frame.as_bytes())?;
            }
            if !detections.is_empty() {
                self.alerts.dispatch(&self.config.id, &frame, &detections);
            }

            self.state.processed += 1;
            if self.config.max_frames > 0 && self.state.processed >= self.config.max_frames {
                log::info!(
                    "[{}] frame cap {} reached, stopping",
                    self.config.id,
                    self.config.max_frames
                );
                self.state.running.stop();
                return Ok(());
            }
            if !self.frame_pacing.is_zero() {
                thread::sleep(self.frame_pacing);
            }
        }
    }

    fn transition(&self, next: SupervisorState) {
        let previous = self.status.set(next);
        if previous != next {
            log::debug!("[{}] {} -> {}", self.config.id, previous, next);
        }
    }
}
