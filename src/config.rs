use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::SourceDescriptor;
use crate::publish::EncoderSettings;

pub const CONFIG_ENV: &str = "CAMWATCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/cameras.sample.json";

const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 5;
const DEFAULT_SNAPSHOT_DIR: &str = "snapshots";
const DEFAULT_STORE_ROOT: &str = "object-store";
const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_SKIP_FRAMES: u32 = 0;
const DEFAULT_NMS_THRESHOLD: f32 = 0.3;
const DEFAULT_MODEL_DIR: &str = "models";
const DEFAULT_CLIENT_ID_PREFIX: &str = "camwatch";
const DEFAULT_BACKOFF_INITIAL_MS: u64 = 1_000;
const DEFAULT_BACKOFF_MAX_MS: u64 = 60_000;

#[derive(Debug, Deserialize, Default)]
struct CamwatchConfigFile {
    backend_alert_url: Option<String>,
    backend_timeout_secs: Option<u64>,
    snapshot_store: Option<SnapshotStoreConfigFile>,
    snapshot_dir: Option<PathBuf>,
    broker: Option<BrokerConfigFile>,
    detection: Option<DetectionConfigFile>,
    models: Option<ModelsConfigFile>,
    overlay: Option<OverlayConfigFile>,
    encoder: Option<EncoderConfigFile>,
    supervisor: Option<SupervisorConfigFile>,
    cameras: Option<Vec<CameraConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotStoreConfigFile {
    enabled: Option<bool>,
    kind: Option<String>,
    bucket: Option<String>,
    region: Option<String>,
    endpoint: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
    public_base_url: Option<String>,
    local_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct BrokerConfigFile {
    kind: Option<String>,
    url: Option<String>,
    exchange: Option<String>,
    routing_key: Option<String>,
    username: Option<String>,
    password: Option<String>,
    client_id_prefix: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    backend: Option<String>,
    min_confidence: Option<f32>,
    skip_frames: Option<u32>,
    nms_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsConfigFile {
    dir: Option<PathBuf>,
    base_url: Option<String>,
    model: Option<String>,
    model_sha256: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct EncoderConfigFile {
    program: Option<String>,
    preset: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SupervisorConfigFile {
    backoff_initial_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    id: Option<String>,
    rtsp: Option<String>,
    test_video: Option<String>,
    ffmpeg_output: Option<String>,
    max_frames: Option<u64>,
    save_snapshots: Option<bool>,
    min_confidence: Option<f32>,
    skip_frames: Option<u32>,
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct CamwatchConfig {
    pub backend: Option<BackendSettings>,
    pub snapshot_store: Option<SnapshotStoreSettings>,
    pub snapshot_dir: PathBuf,
    pub broker: Option<BrokerSettings>,
    pub detection: DetectionSettings,
    pub models: ModelSettings,
    pub overlay: OverlaySettings,
    pub encoder: EncoderSettings,
    pub supervisor: SupervisorSettings,
    cameras: Vec<CameraEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Http,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotStoreSettings {
    pub kind: StoreKind,
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub public_base_url: Option<String>,
    pub local_root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    Mqtt,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub kind: BrokerKind,
    pub url: String,
    pub exchange: String,
    pub routing_key: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id_prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorBackend {
    Tract,
    Stub,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub backend: DetectorBackend,
    pub min_confidence: f32,
    pub skip_frames: u32,
    pub nms_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSettings {
    pub dir: PathBuf,
    pub base_url: Option<String>,
    pub model: String,
    pub model_sha256: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlaySettings {
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            backoff_initial: Duration::from_millis(DEFAULT_BACKOFF_INITIAL_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
        }
    }
}

/// Immutable per-camera settings handed to its supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    pub id: String,
    pub source: SourceDescriptor,
    /// Encoder target; `None` disables publishing.
    pub output: Option<String>,
    pub save_snapshots: bool,
    pub min_confidence: f32,
    pub skip_frames: u32,
    /// Stop cleanly after this many processed frames; 0 means unbounded.
    pub max_frames: u64,
}

impl CameraConfig {
    pub fn new(id: impl Into<String>, source: SourceDescriptor) -> Self {
        Self {
            id: id.into(),
            source,
            output: None,
            save_snapshots: false,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            skip_frames: DEFAULT_SKIP_FRAMES,
            max_frames: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct CameraEntry {
    id: String,
    source: SourceDescriptor,
    output: Option<String>,
    save_snapshots: bool,
    max_frames: u64,
    min_confidence: Option<f32>,
    skip_frames: Option<u32>,
}

impl CamwatchConfig {
    /// Load from `CAMWATCH_CONFIG` (or the bundled sample), then apply env overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a document without consulting the environment.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: CamwatchConfigFile =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolved per-camera settings, in document order.
    pub fn cameras(&self) -> Vec<CameraConfig> {
        self.cameras
            .iter()
            .map(|entry| CameraConfig {
                id: entry.id.clone(),
                source: entry.source.clone(),
                output: entry.output.clone(),
                save_snapshots: entry.save_snapshots,
                min_confidence: entry
                    .min_confidence
                    .unwrap_or(self.detection.min_confidence),
                skip_frames: entry.skip_frames.unwrap_or(self.detection.skip_frames),
                max_frames: entry.max_frames,
            })
            .collect()
    }

    fn from_file(file: CamwatchConfigFile) -> Result<Self> {
        let backend = non_empty(file.backend_alert_url).map(|url| BackendSettings {
            url,
            timeout: Duration::from_secs(
                file.backend_timeout_secs
                    .unwrap_or(DEFAULT_BACKEND_TIMEOUT_SECS),
            ),
        });

        let snapshot_store = match file.snapshot_store {
            Some(store) if store.enabled.unwrap_or(false) => Some(SnapshotStoreSettings {
                kind: parse_store_kind(store.kind.as_deref())?,
                bucket: store.bucket.unwrap_or_default(),
                region: non_empty(store.region),
                endpoint: non_empty(store.endpoint),
                access_key: non_empty(store.access_key),
                secret_key: non_empty(store.secret_key),
                public_base_url: non_empty(store.public_base_url),
                local_root: store
                    .local_root
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_ROOT)),
            }),
            _ => None,
        };

        let broker = match file.broker {
            Some(broker) => {
                let kind = parse_broker_kind(broker.kind.as_deref())?;
                let url = broker.url.unwrap_or_default();
                if kind == BrokerKind::Mqtt && url.trim().is_empty() {
                    None
                } else {
                    Some(BrokerSettings {
                        kind,
                        url,
                        exchange: broker.exchange.unwrap_or_default(),
                        routing_key: broker.routing_key.unwrap_or_default(),
                        username: non_empty(broker.username),
                        password: broker.password,
                        client_id_prefix: non_empty(broker.client_id_prefix)
                            .unwrap_or_else(|| DEFAULT_CLIENT_ID_PREFIX.to_string()),
                    })
                }
            }
            None => None,
        };

        let detection_file = file.detection.unwrap_or_default();
        let detection = DetectionSettings {
            backend: parse_detector_backend(detection_file.backend.as_deref())?,
            min_confidence: detection_file
                .min_confidence
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
            skip_frames: detection_file.skip_frames.unwrap_or(DEFAULT_SKIP_FRAMES),
            nms_threshold: detection_file
                .nms_threshold
                .unwrap_or(DEFAULT_NMS_THRESHOLD),
        };

        let models_file = file.models.unwrap_or_default();
        let models = ModelSettings {
            dir: models_file
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
            base_url: non_empty(models_file.base_url),
            model: non_empty(models_file.model)
                .unwrap_or_else(|| crate::provision::DEFAULT_MODEL_NAME.to_string()),
            model_sha256: non_empty(models_file.model_sha256),
        };

        let overlay = OverlaySettings {
            font_path: file
                .overlay
                .and_then(|overlay| overlay.font_path)
                .filter(|path| !path.as_os_str().is_empty()),
        };

        let encoder_file = file.encoder.unwrap_or_default();
        let defaults = EncoderSettings::default();
        let encoder = EncoderSettings {
            program: non_empty(encoder_file.program).unwrap_or(defaults.program),
            preset: non_empty(encoder_file.preset).unwrap_or(defaults.preset),
            format: non_empty(encoder_file.format).unwrap_or(defaults.format),
        };

        let supervisor_file = file.supervisor.unwrap_or_default();
        let supervisor = SupervisorSettings {
            backoff_initial: Duration::from_millis(
                supervisor_file
                    .backoff_initial_ms
                    .unwrap_or(DEFAULT_BACKOFF_INITIAL_MS),
            ),
            backoff_max: Duration::from_millis(
                supervisor_file
                    .backoff_max_ms
                    .unwrap_or(DEFAULT_BACKOFF_MAX_MS),
            ),
        };

        let cameras = file
            .cameras
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, camera)| {
                let id = camera.id.unwrap_or_default().trim().to_string();
                let source = SourceDescriptor::from_parts(
                    camera.rtsp.as_deref(),
                    camera.test_video.as_deref(),
                )
                .ok_or_else(|| {
                    anyhow!(
                        "camera #{} ('{}') needs an rtsp URI or a test_video path",
                        index,
                        id
                    )
                })?;
                Ok(CameraEntry {
                    id,
                    source,
                    output: non_empty(camera.ffmpeg_output),
                    save_snapshots: camera.save_snapshots.unwrap_or(false),
                    max_frames: camera.max_frames.unwrap_or(0),
                    min_confidence: camera.min_confidence,
                    skip_frames: camera.skip_frames,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            backend,
            snapshot_store,
            snapshot_dir: file
                .snapshot_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            broker,
            detection,
            models,
            overlay,
            encoder,
            supervisor,
            cameras,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("CAMWATCH_BACKEND_ALERT_URL") {
            if !url.trim().is_empty() {
                let timeout = self
                    .backend
                    .as_ref()
                    .map(|backend| backend.timeout)
                    .unwrap_or(Duration::from_secs(DEFAULT_BACKEND_TIMEOUT_SECS));
                self.backend = Some(BackendSettings { url, timeout });
            }
        }
        if let Ok(value) = std::env::var("CAMWATCH_MIN_CONFIDENCE") {
            self.detection.min_confidence = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAMWATCH_MIN_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Ok(value) = std::env::var("CAMWATCH_SKIP_FRAMES") {
            self.detection.skip_frames = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAMWATCH_SKIP_FRAMES must be a non-negative integer"))?;
        }
        if let Ok(dir) = std::env::var("CAMWATCH_MODEL_DIR") {
            if !dir.trim().is_empty() {
                self.models.dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(anyhow!("at least one camera must be configured"));
        }
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            validate_camera_id(&camera.id)?;
            if !seen.insert(camera.id.as_str()) {
                return Err(anyhow!("duplicate camera id '{}'", camera.id));
            }
            if let Some(value) = camera.min_confidence {
                validate_confidence(value)
                    .map_err(|e| anyhow!("camera '{}': {}", camera.id, e))?;
            }
        }
        validate_confidence(self.detection.min_confidence)?;
        if !(0.0..=1.0).contains(&self.detection.nms_threshold) {
            return Err(anyhow!("nms_threshold must be within [0, 1]"));
        }
        if let Some(store) = &self.snapshot_store {
            if store.bucket.trim().is_empty() {
                return Err(anyhow!("snapshot_store.bucket is required when enabled"));
            }
        }
        if self.supervisor.backoff_initial.is_zero() {
            return Err(anyhow!("backoff_initial_ms must be greater than zero"));
        }
        if self.supervisor.backoff_max < self.supervisor.backoff_initial {
            return Err(anyhow!("backoff_max_ms must not be below backoff_initial_ms"));
        }
        Ok(())
    }
}

/// Camera ids name snapshot files, object keys and MQTT client ids, so they
/// are limited to `[A-Za-z0-9_.-]` and may not start with a dot.
fn validate_camera_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("camera id must not be empty"));
    }
    if id.starts_with('.')
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(anyhow!(
            "camera id '{}' may only contain letters, digits, '_', '-' and '.', and must not start with '.'",
            id
        ));
    }
    Ok(())
}

fn validate_confidence(value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("min_confidence {} must be within [0, 1]", value));
    }
    Ok(())
}

fn parse_store_kind(kind: Option<&str>) -> Result<StoreKind> {
    match kind.map(str::trim).unwrap_or("http") {
        "http" | "s3" => Ok(StoreKind::Http),
        "local" => Ok(StoreKind::Local),
        other => Err(anyhow!("unknown snapshot_store.kind '{}'", other)),
    }
}

fn parse_broker_kind(kind: Option<&str>) -> Result<BrokerKind> {
    match kind.map(str::trim).unwrap_or("mqtt") {
        "mqtt" => Ok(BrokerKind::Mqtt),
        "memory" => Ok(BrokerKind::Memory),
        other => Err(anyhow!("unknown broker.kind '{}'", other)),
    }
}

fn parse_detector_backend(kind: Option<&str>) -> Result<DetectorBackend> {
    match kind.map(str::trim).unwrap_or("tract") {
        "tract" => Ok(DetectorBackend::Tract),
        "stub" => Ok(DetectorBackend::Stub),
        "none" => Ok(DetectorBackend::None),
        other => Err(anyhow!("unknown detection.backend '{}'", other)),
    }
}

fn read_config_file(path: &Path) -> Result<CamwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
