//! Detector model provisioning.
//!
//! Ensures each required model artifact exists locally before any detector is
//! loaded. Missing artifacts are downloaded into a temporary file next to the
//! destination, verified against an optional SHA-256 checksum, and renamed
//! into place. Failures never propagate: they are logged and reported as
//! `ProvisionStatus::Degraded`, and supervisors then run without detection.

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MODEL_NAME: &str = "version-RFB-320.onnx";
pub const DEFAULT_MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// A model file that must exist before inference can run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelArtifact {
    pub name: String,
    pub path: PathBuf,
    pub url: String,
    /// Expected hex SHA-256; `None` skips verification.
    pub sha256: Option<String>,
}

impl ModelArtifact {
    /// Resolve the artifact location and source URL.
    ///
    /// With a base URL the source is `{base_url}/{name}`; otherwise the
    /// built-in default URL is used.
    pub fn resolve(dir: &Path, base_url: Option<&str>, name: &str, sha256: Option<&str>) -> Self {
        let url = match base_url.map(|b| b.trim_end_matches('/')).filter(|b| !b.is_empty()) {
            Some(base) => format!("{}/{}", base, name),
            None => DEFAULT_MODEL_URL.to_string(),
        };
        Self {
            name: name.to_string(),
            path: dir.join(name),
            url,
            sha256: sha256
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }
}

/// Outcome of provisioning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProvisionStatus {
    /// Already on disk; nothing was fetched.
    Present,
    /// Downloaded, verified and installed.
    Installed,
    /// Not installed; detection will run disabled.
    Degraded(String),
}

impl ProvisionStatus {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Degraded(_))
    }
}

/// Downloads artifact bytes.
pub trait ArtifactFetcher: Send + Sync {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64>;
}

/// Blocking HTTP(S) fetcher.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT)
    }
}

impl ArtifactFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64> {
        let response = ureq::get(url)
            .timeout(self.timeout)
            .call()
            .with_context(|| format!("download {}", url))?;
        let mut reader = response.into_reader();
        let copied = io::copy(&mut reader, dest).with_context(|| format!("read body of {}", url))?;
        Ok(copied)
    }
}

pub struct ModelProvisioner {
    fetcher: Box<dyn ArtifactFetcher>,
}

impl ModelProvisioner {
    pub fn new(fetcher: Box<dyn ArtifactFetcher>) -> Self {
        Self { fetcher }
    }

    pub fn http() -> Self {
        Self::new(Box::new(HttpFetcher::default()))
    }

    /// Make sure `artifact` exists locally. Never fails.
    pub fn ensure(&self, artifact: &ModelArtifact) -> ProvisionStatus {
        if artifact.path.exists() {
            log::debug!("model {} present at {}", artifact.name, artifact.path.display());
            return ProvisionStatus::Present;
        }
        log::info!("fetching model {} from {}", artifact.name, artifact.url);
        match self.install(artifact) {
            Ok(bytes) => {
                log::info!(
                    "installed model {} ({} bytes) at {}",
                    artifact.name,
                    bytes,
                    artifact.path.display()
                );
                ProvisionStatus::Installed
            }
            Err(err) => {
                log::warn!(
                    "failed to download/verify {}: {:#}; detection will be disabled",
                    artifact.url,
                    err
                );
                ProvisionStatus::Degraded(format!("{:#}", err))
            }
        }
    }

    /// Ensure every artifact; degraded if any one of them is.
    pub fn ensure_all(&self, artifacts: &[ModelArtifact]) -> ProvisionStatus {
        let mut overall = ProvisionStatus::Present;
        for artifact in artifacts {
            match self.ensure(artifact) {
                ProvisionStatus::Present => {}
                ProvisionStatus::Installed => {
                    if overall == ProvisionStatus::Present {
                        overall = ProvisionStatus::Installed;
                    }
                }
                degraded @ ProvisionStatus::Degraded(_) => {
                    if overall.is_ok() {
                        overall = degraded;
                    }
                }
            }
        }
        overall
    }

    fn install(&self, artifact: &ModelArtifact) -> Result<u64> {
        let dir = match artifact.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("create model directory {}", dir.display()))?;

        // Dropping the temp file on any early return removes the partial download.
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("create temporary file in {}", dir.display()))?;
        let bytes = self.fetcher.fetch(&artifact.url, tmp.as_file_mut())?;
        tmp.as_file_mut().sync_all()?;

        if let Some(expected) = &artifact.sha256 {
            let got = sha256_file(tmp.path())?;
            if !got.eq_ignore_ascii_case(expected) {
                return Err(anyhow!(
                    "checksum mismatch for {}: expected {}, got {}",
                    artifact.url,
                    expected,
                    got
                ));
            }
        }

        tmp.persist(&artifact.path)
            .with_context(|| format!("install {}", artifact.path.display()))?;
        Ok(bytes)
    }
}

/// Hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).with_context(|| format!("hash {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}
