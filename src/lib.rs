//! camwatch: per-camera stream supervision
//!
//! Each configured camera gets one supervisor thread that pulls frames from a
//! capture source, runs face detection on a sampled subset, draws a
//! diagnostic overlay, forwards the annotated frames to an external encoder
//! and fans alerts out to snapshot storage, a message broker and an HTTP
//! backend. Failures of a stream are contained to that camera: it backs off
//! and reconnects while every other camera keeps running.
//!
//! # Module Structure
//!
//! - `config`: process configuration document and per-camera settings
//! - `frame`: RGB24 frames and stream geometry
//! - `ingest`: capture capability (synthetic `stub://`, GStreamer)
//! - `sampler`: frame-skip policy
//! - `detect`: detector capability, lazy per-camera slot, backends
//! - `provision`: model download and checksum verification
//! - `overlay`: boxes, caption and frame-rate estimate
//! - `publish`: frame sinks (external encoder process)
//! - `alert`: alert record and sink fan-out
//! - `supervisor`: reconnect/backoff state machine
//! - `registry`: supervisor threads and orderly shutdown

use std::time::{SystemTime, UNIX_EPOCH};

pub mod alert;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod provision;
pub mod publish;
pub mod registry;
pub mod sampler;
pub mod supervisor;

pub use alert::{Alert, AlertDispatcher, AlertRouting, DispatchReport, SinkOutcome};
pub use config::{CameraConfig, CamwatchConfig};
pub use detect::{BoundingBox, DetectionResult, Detector, DetectorFactory};
pub use frame::{Frame, StreamProperties};
pub use ingest::{CaptureFactory, CaptureSource, SourceDescriptor};
pub use provision::{ModelArtifact, ModelProvisioner, ProvisionStatus};
pub use registry::WorkerRegistry;
pub use supervisor::{Capabilities, CameraSupervisor, StopToken, SupervisorState, WorkerSummary};

/// Current Unix time in whole seconds.
pub fn now_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
