use std::path::PathBuf;
use std::sync::Arc;

use super::{
    AlertBackend, AlertDispatcher, HttpAlertBackend, HttpObjectStore, LocalObjectStore,
    MemoryBroker, MqttBroker, ObjectStore, SnapshotTarget,
};
use crate::config::{BrokerKind, BrokerSettings, CameraConfig, CamwatchConfig, StoreKind};

/// Builds the alert dispatcher for each camera at supervisor construction.
pub trait AlertRouting: Send + Sync {
    fn dispatcher_for(&self, camera: &CameraConfig) -> AlertDispatcher;
}

impl<F> AlertRouting for F
where
    F: Fn(&CameraConfig) -> AlertDispatcher + Send + Sync,
{
    fn dispatcher_for(&self, camera: &CameraConfig) -> AlertDispatcher {
        self(camera)
    }
}

struct StoreRoute {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    public_base_url: Option<String>,
}

/// Sinks derived from the process configuration.
///
/// The object store and backend client are shared; MQTT brokers get one
/// client per camera so a stalled connection only affects its own camera.
pub struct ConfiguredAlerts {
    store: Option<StoreRoute>,
    snapshot_dir: PathBuf,
    broker: Option<BrokerSettings>,
    memory_broker: MemoryBroker,
    backend: Option<Arc<dyn AlertBackend>>,
}

impl ConfiguredAlerts {
    pub fn from_config(cfg: &CamwatchConfig) -> Self {
        let store = cfg.snapshot_store.as_ref().map(|settings| {
            let store: Arc<dyn ObjectStore> = match settings.kind {
                StoreKind::Http => Arc::new(HttpObjectStore::new(
                    settings.endpoint.as_deref(),
                    settings.region.as_deref(),
                    settings
                        .access_key
                        .clone()
                        .zip(settings.secret_key.clone()),
                    cfg.backend
                        .as_ref()
                        .map(|backend| backend.timeout)
                        .unwrap_or(std::time::Duration::from_secs(5)),
                )),
                StoreKind::Local => Arc::new(LocalObjectStore::new(settings.local_root.clone())),
            };
            StoreRoute {
                store,
                bucket: settings.bucket.clone(),
                public_base_url: settings.public_base_url.clone(),
            }
        });
        let backend = cfg.backend.as_ref().map(|backend| {
            Arc::new(HttpAlertBackend::new(backend.url.clone(), backend.timeout))
                as Arc<dyn AlertBackend>
        });
        Self {
            store,
            snapshot_dir: cfg.snapshot_dir.clone(),
            broker: cfg.broker.clone(),
            memory_broker: MemoryBroker::default(),
            backend,
        }
    }

    /// The in-process broker used when `broker.kind` is `memory`.
    pub fn memory_broker(&self) -> &MemoryBroker {
        &self.memory_broker
    }
}

impl AlertRouting for ConfiguredAlerts {
    fn dispatcher_for(&self, camera: &CameraConfig) -> AlertDispatcher {
        let snapshots = match &self.store {
            Some(route) => SnapshotTarget::ObjectStore {
                store: route.store.clone(),
                bucket: route.bucket.clone(),
                public_base_url: route.public_base_url.clone(),
            },
            None if camera.save_snapshots => SnapshotTarget::LocalDir(self.snapshot_dir.clone()),
            None => SnapshotTarget::None,
        };
        let mut dispatcher = AlertDispatcher::new().with_snapshots(snapshots);

        if let Some(settings) = &self.broker {
            match settings.kind {
                BrokerKind::Memory => {
                    dispatcher = dispatcher.with_broker(
                        Arc::new(self.memory_broker.clone()),
                        settings.exchange.clone(),
                        settings.routing_key.clone(),
                    );
                }
                BrokerKind::Mqtt => {
                    let client_id = format!("{}-{}", settings.client_id_prefix, camera.id);
                    match MqttBroker::connect(
                        &settings.url,
                        &client_id,
                        settings.username.as_deref(),
                        settings.password.as_deref(),
                    ) {
                        Ok(broker) => {
                            dispatcher = dispatcher.with_broker(
                                Arc::new(broker),
                                settings.exchange.clone(),
                                settings.routing_key.clone(),
                            );
                        }
                        Err(err) => {
                            log::warn!("[{}] broker unavailable: {:#}", camera.id, err);
                        }
                    }
                }
            }
        }

        if let Some(backend) = &self.backend {
            dispatcher = dispatcher.with_backend(backend.clone());
        }
        dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, DetectionResult};
    use crate::frame::Frame;
    use anyhow::Result;

    #[test]
    fn local_snapshots_only_for_flagged_cameras() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let raw = format!(
            r#"{{
                "snapshot_dir": {:?},
                "broker": {{"kind": "memory", "exchange": "alerts", "routing_key": "faces"}},
                "cameras": [
                    {{"id": "keep", "rtsp": "stub://a", "save_snapshots": true}},
                    {{"id": "skip", "rtsp": "stub://b"}}
                ]
            }}"#,
            dir.path().display().to_string()
        );
        let cfg = CamwatchConfig::from_json_str(&raw)?;
        let routing = ConfiguredAlerts::from_config(&cfg);
        let cameras = cfg.cameras();
        let detections = DetectionResult::new(vec![BoundingBox::new(0, 0, 2, 2, 0.9)]);

        let keep = routing
            .dispatcher_for(&cameras[0])
            .dispatch("keep", &Frame::filled(8, 8, 50), &detections);
        assert!(keep.alert.snapshot_url.is_some());

        let skip = routing
            .dispatcher_for(&cameras[1])
            .dispatch("skip", &Frame::filled(8, 8, 50), &detections);
        assert!(skip.alert.snapshot_url.is_none());

        assert!(routing.memory_broker().is_declared("alerts"));
        assert_eq!(routing.memory_broker().published().len(), 2);
        Ok(())
    }
}
