//! Alert fan-out.
//!
//! Every frame with at least one detection becomes one `Alert`. The snapshot
//! is persisted (object store, else local directory when enabled), then the
//! serialised alert is handed to the broker and to the HTTP backend. Each
//! sink is attempted on its own; a failing sink is logged and reported in the
//! `DispatchReport` but never stops the others or the frame loop.

mod backend;
mod broker;
mod routing;
mod store;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use serde::{Deserialize, Serialize};

use crate::detect::DetectionResult;
use crate::frame::Frame;

pub use backend::{AlertBackend, HttpAlertBackend};
pub use broker::{
    parse_mqtt_endpoint, topic_for, Broker, MemoryBroker, MqttBroker, MqttEndpoint,
    PublishedMessage,
};
pub use routing::{AlertRouting, ConfiguredAlerts};
pub use store::{HttpObjectStore, LocalObjectStore, ObjectAcl, ObjectStore};

const JPEG_QUALITY: u8 = 85;

/// Wire record shared by the broker message body and the backend POST body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub camera_id: String,
    /// Unix seconds.
    pub timestamp: u64,
    pub faces: usize,
    pub snapshot_b64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_url: Option<String>,
}

impl Alert {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("serialize alert")
    }
}

/// What happened to one sink during a dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkOutcome {
    Skipped,
    Delivered,
    Failed(String),
}

impl SinkOutcome {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::Delivered,
            Err(err) => Self::Failed(format!("{:#}", err)),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Clone, Debug)]
pub struct DispatchReport {
    pub alert: Alert,
    pub snapshot: SinkOutcome,
    pub broker: SinkOutcome,
    pub backend: SinkOutcome,
}

/// Where snapshots are persisted, if anywhere.
pub enum SnapshotTarget {
    ObjectStore {
        store: Arc<dyn ObjectStore>,
        bucket: String,
        public_base_url: Option<String>,
    },
    LocalDir(PathBuf),
    None,
}

struct BrokerRoute {
    broker: Arc<dyn Broker>,
    exchange: String,
    routing_key: String,
}

/// Per-camera fan-out of alerts to the configured sinks.
pub struct AlertDispatcher {
    snapshots: SnapshotTarget,
    broker: Option<BrokerRoute>,
    backend: Option<Arc<dyn AlertBackend>>,
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertDispatcher {
    /// Dispatcher with no sinks; alerts are built and dropped.
    pub fn new() -> Self {
        Self {
            snapshots: SnapshotTarget::None,
            broker: None,
            backend: None,
        }
    }

    pub fn with_snapshots(mut self, target: SnapshotTarget) -> Self {
        self.snapshots = target;
        self
    }

    /// Attach a broker, declaring `exchange` first when it is named.
    ///
    /// A failed declaration leaves the dispatcher without a broker sink.
    pub fn with_broker(
        mut self,
        broker: Arc<dyn Broker>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        let exchange = exchange.into();
        if !exchange.is_empty() {
            if let Err(err) = broker.declare_exchange(&exchange) {
                log::warn!("failed to declare exchange '{}': {:#}; broker disabled", exchange, err);
                return self;
            }
        }
        self.broker = Some(BrokerRoute {
            broker,
            exchange,
            routing_key: routing_key.into(),
        });
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn AlertBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn has_broker(&self) -> bool {
        self.broker.is_some()
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Build and deliver one alert. Never fails; outcomes are in the report.
    pub fn dispatch(
        &self,
        camera_id: &str,
        frame: &Frame,
        detections: &DetectionResult,
    ) -> DispatchReport {
        let timestamp = crate::now_s();
        let jpeg = match encode_jpeg(frame) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("[{}] snapshot encoding failed: {:#}", camera_id, err);
                Vec::new()
            }
        };

        let (snapshot, snapshot_url) = if jpeg.is_empty() {
            (SinkOutcome::Skipped, None)
        } else {
            self.persist_snapshot(camera_id, timestamp, &jpeg)
        };

        let alert = Alert {
            camera_id: camera_id.to_string(),
            timestamp,
            faces: detections.len(),
            snapshot_b64: base64::engine::general_purpose::STANDARD.encode(&jpeg),
            snapshot_url,
        };

        let (broker, backend) = match alert.to_json() {
            Ok(body) => (self.publish(camera_id, &body), self.post(camera_id, &body)),
            Err(err) => {
                log::warn!("[{}] {:#}", camera_id, err);
                let failed = SinkOutcome::Failed(format!("{:#}", err));
                (failed.clone(), failed)
            }
        };

        log::debug!(
            "[{}] alert with {} detection(s): broker {:?}, backend {:?}",
            camera_id,
            alert.faces,
            broker,
            backend
        );
        DispatchReport {
            alert,
            snapshot,
            broker,
            backend,
        }
    }

    fn persist_snapshot(
        &self,
        camera_id: &str,
        timestamp: u64,
        jpeg: &[u8],
    ) -> (SinkOutcome, Option<String>) {
        match &self.snapshots {
            SnapshotTarget::ObjectStore {
                store,
                bucket,
                public_base_url,
            } => {
                let key = snapshot_key(camera_id, timestamp);
                match store.put(bucket, &key, jpeg, ObjectAcl::PublicRead) {
                    Ok(location) => {
                        let url = match public_base_url {
                            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
                            None => location,
                        };
                        (SinkOutcome::Delivered, Some(url))
                    }
                    Err(err) => {
                        log::warn!("[{}] snapshot upload failed: {:#}", camera_id, err);
                        (SinkOutcome::Failed(format!("{:#}", err)), None)
                    }
                }
            }
            SnapshotTarget::LocalDir(dir) => {
                let path = dir.join(format!("{}_{}.jpg", camera_id, timestamp));
                let written = fs::create_dir_all(dir)
                    .with_context(|| format!("create {}", dir.display()))
                    .and_then(|_| {
                        fs::write(&path, jpeg).with_context(|| format!("write {}", path.display()))
                    });
                match written {
                    Ok(()) => (SinkOutcome::Delivered, Some(path.display().to_string())),
                    Err(err) => {
                        log::warn!("[{}] local snapshot failed: {:#}", camera_id, err);
                        (SinkOutcome::Failed(format!("{:#}", err)), None)
                    }
                }
            }
            SnapshotTarget::None => (SinkOutcome::Skipped, None),
        }
    }

    fn publish(&self, camera_id: &str, body: &[u8]) -> SinkOutcome {
        let Some(route) = &self.broker else {
            return SinkOutcome::Skipped;
        };
        let outcome = SinkOutcome::from_result(route.broker.publish(
            &route.exchange,
            &route.routing_key,
            body,
        ));
        if let SinkOutcome::Failed(reason) = &outcome {
            log::warn!("[{}] MQ publish failed: {}", camera_id, reason);
        }
        outcome
    }

    fn post(&self, camera_id: &str, body: &[u8]) -> SinkOutcome {
        let Some(backend) = &self.backend else {
            return SinkOutcome::Skipped;
        };
        let outcome = SinkOutcome::from_result(backend.post(body));
        if let SinkOutcome::Failed(reason) = &outcome {
            log::warn!("[{}] failed to post alert: {}", camera_id, reason);
        }
        outcome
    }
}

/// Object key for a snapshot: `snapshots/{camera_id}_{unix_ts}.jpg`.
pub fn snapshot_key(camera_id: &str, timestamp: u64) -> String {
    format!("snapshots/{}_{}.jpg", camera_id, timestamp)
}

fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder
        .encode(
            frame.as_bytes(),
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgb8,
        )
        .context("encode snapshot JPEG")?;
    Ok(out)
}
