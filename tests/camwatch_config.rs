use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use camwatch::config::{BrokerKind, CamwatchConfig, DetectorBackend, StoreKind};
use camwatch::ingest::SourceDescriptor;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAMWATCH_CONFIG",
        "CAMWATCH_BACKEND_ALERT_URL",
        "CAMWATCH_MIN_CONFIDENCE",
        "CAMWATCH_SKIP_FRAMES",
        "CAMWATCH_MODEL_DIR",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "backend_alert_url": "http://backend.local/api/alerts",
            "backend_timeout_secs": 3,
            "snapshot_store": {
                "enabled": true,
                "kind": "local",
                "bucket": "snaps",
                "public_base_url": "https://cdn.local/snaps",
                "local_root": "/var/lib/camwatch/store"
            },
            "broker": {
                "url": "mqtt://broker.local:1883",
                "exchange": "alerts",
                "routing_key": "faces",
                "username": "camwatch",
                "password": "secret"
            },
            "detection": {"backend": "stub", "min_confidence": 0.6, "skip_frames": 1},
            "models": {"dir": "/opt/models", "base_url": "https://mirror/models"},
            "supervisor": {"backoff_initial_ms": 250, "backoff_max_ms": 8000},
            "cameras": [
                {"id": "door", "rtsp": "rtsp://cam/door", "ffmpeg_output": "rtmp://mediamtx/door", "max_frames": 100},
                {"id": "yard", "rtsp": "rtsp://cam/yard", "test_video": "stub://yard?frames=10", "save_snapshots": true, "min_confidence": 0.8}
            ]
        }"#,
    );

    std::env::set_var("CAMWATCH_CONFIG", file.path());
    std::env::set_var("CAMWATCH_MIN_CONFIDENCE", "0.3");
    std::env::set_var("CAMWATCH_SKIP_FRAMES", "4");
    std::env::set_var("CAMWATCH_MODEL_DIR", "/srv/models");

    let cfg = CamwatchConfig::load().expect("load config");

    let backend = cfg.backend.clone().unwrap();
    assert_eq!(backend.url, "http://backend.local/api/alerts");
    assert_eq!(backend.timeout, Duration::from_secs(3));

    let store = cfg.snapshot_store.clone().unwrap();
    assert_eq!(store.kind, StoreKind::Local);
    assert_eq!(store.bucket, "snaps");
    assert_eq!(store.local_root, PathBuf::from("/var/lib/camwatch/store"));

    let broker = cfg.broker.clone().unwrap();
    assert_eq!(broker.kind, BrokerKind::Mqtt);
    assert_eq!(broker.exchange, "alerts");
    assert_eq!(broker.client_id_prefix, "camwatch");

    assert_eq!(cfg.detection.backend, DetectorBackend::Stub);
    assert_eq!(cfg.detection.min_confidence, 0.3);
    assert_eq!(cfg.detection.skip_frames, 4);
    assert_eq!(cfg.models.dir, PathBuf::from("/srv/models"));
    assert_eq!(cfg.models.base_url.as_deref(), Some("https://mirror/models"));
    assert_eq!(cfg.supervisor.backoff_initial, Duration::from_millis(250));
    assert_eq!(cfg.supervisor.backoff_max, Duration::from_millis(8000));

    let cameras = cfg.cameras();
    assert_eq!(cameras.len(), 2);
    assert_eq!(cameras[0].output.as_deref(), Some("rtmp://mediamtx/door"));
    assert_eq!(cameras[0].max_frames, 100);
    assert_eq!(cameras[0].min_confidence, 0.3);
    assert_eq!(cameras[0].skip_frames, 4);
    assert_eq!(cameras[1].source, SourceDescriptor::Live("stub://yard?frames=10".into()));
    assert!(cameras[1].save_snapshots);
    assert_eq!(cameras[1].min_confidence, 0.8);

    clear_env();
}

#[test]
fn backend_url_can_come_from_env_alone() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{"cameras":[{"id":"a","rtsp":"stub://a"}]}"#);
    std::env::set_var("CAMWATCH_CONFIG", file.path());
    std::env::set_var("CAMWATCH_BACKEND_ALERT_URL", "http://127.0.0.1:8080/alerts");

    let cfg = CamwatchConfig::load().expect("load config");
    let backend = cfg.backend.unwrap();
    assert_eq!(backend.url, "http://127.0.0.1:8080/alerts");
    assert_eq!(backend.timeout, Duration::from_secs(5));

    clear_env();
}

#[test]
fn invalid_env_override_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{"cameras":[{"id":"a","rtsp":"stub://a"}]}"#);
    std::env::set_var("CAMWATCH_CONFIG", file.path());
    std::env::set_var("CAMWATCH_MIN_CONFIDENCE", "high");
    assert!(CamwatchConfig::load().is_err());

    std::env::set_var("CAMWATCH_MIN_CONFIDENCE", "1.5");
    assert!(CamwatchConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_or_malformed_file_is_fatal() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAMWATCH_CONFIG", "/nonexistent/camwatch.json");
    assert!(CamwatchConfig::load().is_err());

    let file = write_config("{ not json");
    std::env::set_var("CAMWATCH_CONFIG", file.path());
    assert!(CamwatchConfig::load().is_err());

    clear_env();
}

#[test]
fn bundled_sample_loads_by_default() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CamwatchConfig::load().expect("load bundled sample");
    let cameras = cfg.cameras();
    assert!(!cameras.is_empty());
    assert!(cameras.iter().all(|camera| camera.source.is_stub()));
    assert_eq!(cfg.detection.backend, DetectorBackend::Stub);
    assert!(cfg.snapshot_store.is_none());
    assert!(cfg.backend.is_none());
    assert!(cfg.broker.is_none());
    assert!(cfg.overlay.font_path.is_none());
}
