use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use base64::Engine;

use camwatch::alert::{
    Alert, AlertBackend, AlertDispatcher, Broker, LocalObjectStore, MemoryBroker, MqttBroker,
    ObjectAcl, ObjectStore, SinkOutcome, SnapshotTarget,
};
use camwatch::detect::{BoundingBox, DetectionResult};
use camwatch::frame::Frame;

#[derive(Default)]
struct RecordingBackend {
    bodies: Mutex<Vec<Vec<u8>>>,
    fail: bool,
}

impl RecordingBackend {
    fn failing() -> Self {
        Self {
            bodies: Mutex::default(),
            fail: true,
        }
    }

    fn attempts(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }
}

impl AlertBackend for RecordingBackend {
    fn post(&self, payload: &[u8]) -> Result<()> {
        self.bodies.lock().unwrap().push(payload.to_vec());
        if self.fail {
            bail!("503 Service Unavailable");
        }
        Ok(())
    }
}

struct FailingStore {
    calls: AtomicUsize,
}

impl ObjectStore for FailingStore {
    fn put(&self, _bucket: &str, _key: &str, _bytes: &[u8], _acl: ObjectAcl) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("access denied")
    }
}

struct FailingDeclareBroker;

impl Broker for FailingDeclareBroker {
    fn declare_exchange(&self, _exchange: &str) -> Result<()> {
        bail!("channel closed")
    }

    fn publish(&self, _exchange: &str, _routing_key: &str, _payload: &[u8]) -> Result<()> {
        panic!("publish must not be reached without a declared exchange")
    }
}

fn two_faces() -> DetectionResult {
    DetectionResult::new(vec![
        BoundingBox::new(1, 1, 4, 4, 0.9),
        BoundingBox::new(8, 8, 4, 4, 0.7),
    ])
}

#[test]
fn broker_failure_does_not_block_backend() {
    let broker = MemoryBroker::failing();
    let backend = Arc::new(RecordingBackend::default());
    let dispatcher = AlertDispatcher::new()
        .with_broker(Arc::new(broker.clone()), "alerts", "faces")
        .with_backend(backend.clone());

    let report = dispatcher.dispatch("gate", &Frame::filled(16, 16, 90), &two_faces());

    assert!(report.broker.is_failed());
    assert_eq!(report.backend, SinkOutcome::Delivered);
    assert_eq!(broker.attempts(), 1);
    assert_eq!(backend.attempts(), 1);
    let posted: Alert = serde_json::from_slice(&backend.bodies.lock().unwrap()[0]).unwrap();
    assert_eq!(posted, report.alert);
    assert_eq!(posted.faces, 2);
}

#[test]
fn backend_failure_does_not_block_broker() {
    let broker = MemoryBroker::default();
    let backend = Arc::new(RecordingBackend::failing());
    let dispatcher = AlertDispatcher::new()
        .with_broker(Arc::new(broker.clone()), "alerts", "faces")
        .with_backend(backend.clone());

    let report = dispatcher.dispatch("gate", &Frame::filled(16, 16, 90), &two_faces());

    assert_eq!(report.broker, SinkOutcome::Delivered);
    assert!(report.backend.is_failed());
    assert_eq!(broker.published().len(), 1);
    assert_eq!(backend.attempts(), 1);
}

#[test]
fn broker_and_backend_receive_identical_bodies() {
    let broker = MemoryBroker::default();
    let backend = Arc::new(RecordingBackend::default());
    let dispatcher = AlertDispatcher::new()
        .with_broker(Arc::new(broker.clone()), "", "faces")
        .with_backend(backend.clone());

    dispatcher.dispatch("gate", &Frame::filled(8, 8, 200), &two_faces());

    let published = broker.published();
    assert_eq!(published[0].exchange, "");
    assert_eq!(published[0].routing_key, "faces");
    assert_eq!(published[0].payload, backend.bodies.lock().unwrap()[0]);
}

#[test]
fn upload_failure_still_sends_inline_snapshot() {
    let store = Arc::new(FailingStore {
        calls: AtomicUsize::new(0),
    });
    let broker = MemoryBroker::default();
    let backend = Arc::new(RecordingBackend::default());
    let dispatcher = AlertDispatcher::new()
        .with_snapshots(SnapshotTarget::ObjectStore {
            store: store.clone(),
            bucket: "snaps".into(),
            public_base_url: Some("https://cdn.local".into()),
        })
        .with_broker(Arc::new(broker.clone()), "alerts", "faces")
        .with_backend(backend.clone());

    let report = dispatcher.dispatch("gate", &Frame::filled(8, 8, 200), &two_faces());

    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    assert!(report.snapshot.is_failed());
    assert_eq!(report.alert.snapshot_url, None);
    let jpeg = base64::engine::general_purpose::STANDARD
        .decode(&report.alert.snapshot_b64)
        .unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    assert_eq!(broker.published().len(), 1);
    assert_eq!(backend.attempts(), 1);
}

#[test]
fn object_store_takes_precedence_over_local_snapshots() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dispatcher = AlertDispatcher::new().with_snapshots(SnapshotTarget::ObjectStore {
        store: Arc::new(LocalObjectStore::new(dir.path())),
        bucket: "snaps".into(),
        public_base_url: None,
    });

    let report = dispatcher.dispatch("gate", &Frame::filled(8, 8, 10), &two_faces());

    let key = format!("snapshots/gate_{}.jpg", report.alert.timestamp);
    let stored = dir.path().join("snaps").join(&key);
    assert!(stored.exists());
    assert_eq!(report.alert.snapshot_url, Some(stored.display().to_string()));
    Ok(())
}

#[test]
fn failed_exchange_declaration_drops_broker_sink() {
    let backend = Arc::new(RecordingBackend::default());
    let dispatcher = AlertDispatcher::new()
        .with_broker(Arc::new(FailingDeclareBroker), "alerts", "faces")
        .with_backend(backend.clone());
    assert!(!dispatcher.has_broker());

    let report = dispatcher.dispatch("gate", &Frame::filled(8, 8, 10), &two_faces());
    assert_eq!(report.broker, SinkOutcome::Skipped);
    assert_eq!(report.backend, SinkOutcome::Delivered);
}

#[test]
fn unreachable_mqtt_broker_does_not_stall_dispatch() -> Result<()> {
    let backend = Arc::new(RecordingBackend::default());
    let broker = MqttBroker::connect("mqtt://127.0.0.1:1", "camwatch-gate", None, None)?;
    let dispatcher = AlertDispatcher::new()
        .with_broker(Arc::new(broker), "alerts", "faces")
        .with_backend(backend.clone());

    let started = Instant::now();
    let reports: Vec<_> = (0..30)
        .map(|_| dispatcher.dispatch("gate", &Frame::filled(8, 8, 10), &two_faces()))
        .collect();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(reports.iter().any(|report| report.broker.is_failed()));
    assert!(reports
        .iter()
        .all(|report| report.backend == SinkOutcome::Delivered));
    assert_eq!(backend.attempts(), 30);

    let dropped = Instant::now();
    drop(dispatcher);
    assert!(dropped.elapsed() < Duration::from_secs(5));
    Ok(())
}
