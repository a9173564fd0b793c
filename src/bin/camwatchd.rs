//! camwatchd - camera supervision daemon
//!
//! This daemon:
//! 1. Loads the camera configuration (fatal on error)
//! 2. Provisions the detector model, degrading to no-detection on failure
//! 3. Starts one supervisor thread per camera
//! 4. Stops every camera on Ctrl-C / SIGTERM, or exits once all have stopped

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use camwatch::{
    alert::ConfiguredAlerts,
    config::{CamwatchConfig, DetectorBackend, DEFAULT_CONFIG_PATH},
    detect::{DetectorFactory, StubDetectorFactory, UnavailableDetectorFactory},
    ingest::DefaultCaptureFactory,
    overlay::OverlayRenderer,
    provision::{ModelArtifact, ModelProvisioner, ProvisionStatus},
    publish::FfmpegEncoderFactory,
    Capabilities, WorkerRegistry,
};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(author, version, about = "Supervise camera streams with face detection and alerts")]
struct Args {
    /// Path to the JSON configuration document.
    #[arg(long, env = "CAMWATCH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Download/verify the detector model and exit.
    #[arg(long)]
    provision_only: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = CamwatchConfig::load_from(&args.config)?;
    log::info!(
        "loaded {} camera(s) from {}",
        config.cameras().len(),
        args.config.display()
    );

    if args.provision_only {
        if let ProvisionStatus::Degraded(reason) = provision(&config) {
            bail!("model provisioning failed: {}", reason);
        }
        return Ok(());
    }

    // Before any worker starts, so a signal during startup still reaches stop_all.
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let detector = detector_factory(&config);
    let overlay = OverlayRenderer::from_optional_font(config.overlay.font_path.as_deref());
    let caps = Capabilities::new(
        Arc::new(DefaultCaptureFactory),
        detector,
        Arc::new(FfmpegEncoderFactory::new(config.encoder.clone())),
        Arc::new(ConfiguredAlerts::from_config(&config)),
    )
    .with_overlay(overlay)
    .with_settings(config.supervisor);

    let mut registry = WorkerRegistry::start(config.cameras(), &caps)?;

    log::info!("camwatchd running; waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) => {
                log::info!("shutdown signal received, stopping cameras...");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if registry.all_finished() {
                    log::info!("all cameras stopped");
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    registry.stop_all();
    for summary in registry.join_all() {
        log::info!("{}", summary);
    }
    Ok(())
}

fn detector_factory(config: &CamwatchConfig) -> Arc<dyn DetectorFactory> {
    match config.detection.backend {
        DetectorBackend::None => {
            log::info!("detection disabled by configuration");
            Arc::new(UnavailableDetectorFactory::new("detection disabled"))
        }
        DetectorBackend::Stub => Arc::new(StubDetectorFactory::default()),
        DetectorBackend::Tract => tract_factory(config),
    }
}

fn model_artifact(config: &CamwatchConfig) -> ModelArtifact {
    ModelArtifact::resolve(
        &config.models.dir,
        config.models.base_url.as_deref(),
        &config.models.model,
        config.models.model_sha256.as_deref(),
    )
}

fn provision(config: &CamwatchConfig) -> ProvisionStatus {
    ModelProvisioner::http().ensure(&model_artifact(config))
}

#[cfg(feature = "backend-tract")]
fn tract_factory(config: &CamwatchConfig) -> Arc<dyn DetectorFactory> {
    match provision(config) {
        ProvisionStatus::Degraded(reason) => {
            log::error!("detector model unavailable; cameras will run without detection");
            Arc::new(UnavailableDetectorFactory::new(reason))
        }
        ProvisionStatus::Present | ProvisionStatus::Installed => {
            Arc::new(camwatch::detect::TractDetectorFactory {
                model_path: model_artifact(config).path,
                nms_threshold: config.detection.nms_threshold,
            })
        }
    }
}

#[cfg(not(feature = "backend-tract"))]
fn tract_factory(config: &CamwatchConfig) -> Arc<dyn DetectorFactory> {
    log::warn!(
        "tract detection requires the backend-tract feature; {} will not be loaded",
        model_artifact(config).path.display()
    );
    // Provisioned regardless of the feature.
    if let ProvisionStatus::Degraded(reason) = provision(config) {
        log::warn!("model provisioning degraded: {}", reason);
    }
    Arc::new(UnavailableDetectorFactory::new(
        "tract detection requires the backend-tract feature",
    ))
}
