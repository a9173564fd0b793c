use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::Engine;

/// Canned access policy applied to an uploaded object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectAcl {
    Private,
    PublicRead,
}

impl ObjectAcl {
    pub fn as_header(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::PublicRead => "public-read",
        }
    }
}

/// Object storage for alert snapshots.
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `bucket/key` and return where they landed.
    fn put(&self, bucket: &str, key: &str, bytes: &[u8], acl: ObjectAcl) -> Result<String>;
}

/// Plain HTTP `PUT` against an S3-compatible endpoint.
pub struct HttpObjectStore {
    endpoint: String,
    credentials: Option<(String, String)>,
    timeout: Duration,
}

impl HttpObjectStore {
    pub fn new(
        endpoint: Option<&str>,
        region: Option<&str>,
        credentials: Option<(String, String)>,
        timeout: Duration,
    ) -> Self {
        let endpoint = match endpoint.map(str::trim).filter(|e| !e.is_empty()) {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => match region.map(str::trim).filter(|r| !r.is_empty()) {
                Some(region) => format!("https://s3.{}.amazonaws.com", region),
                None => "https://s3.amazonaws.com".to_string(),
            },
        };
        Self {
            endpoint,
            credentials,
            timeout,
        }
    }

    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, bucket, key)
    }
}

impl ObjectStore for HttpObjectStore {
    fn put(&self, bucket: &str, key: &str, bytes: &[u8], acl: ObjectAcl) -> Result<String> {
        let url = self.object_url(bucket, key);
        let mut request = ureq::put(&url)
            .timeout(self.timeout)
            .set("Content-Type", "image/jpeg")
            .set("x-amz-acl", acl.as_header());
        if let Some((access, secret)) = &self.credentials {
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", access, secret));
            request = request.set("Authorization", &format!("Basic {}", token));
        }
        request
            .send_bytes(bytes)
            .map_err(|err| anyhow!("upload to {} failed: {}", url, err))?;
        Ok(url)
    }
}

/// Local-disk stand-in writing `{root}/{bucket}/{key}`.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(&self, bucket: &str, key: &str, bytes: &[u8], _acl: ObjectAcl) -> Result<String> {
        let path = self.root.join(bucket).join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))?;
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_store_writes_under_bucket() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalObjectStore::new(dir.path());
        let location = store.put("alerts", "snapshots/cam_1.jpg", b"jpeg", ObjectAcl::PublicRead)?;
        let expected = dir.path().join("alerts").join("snapshots").join("cam_1.jpg");
        assert_eq!(location, expected.display().to_string());
        assert_eq!(fs::read(expected)?, b"jpeg");
        Ok(())
    }

    #[test]
    fn http_store_derives_endpoint_from_region() {
        let store = HttpObjectStore::new(None, Some("eu-west-1"), None, Duration::from_secs(5));
        assert_eq!(
            store.object_url("b", "snapshots/x.jpg"),
            "https://s3.eu-west-1.amazonaws.com/b/snapshots/x.jpg"
        );
        let store = HttpObjectStore::new(Some("http://minio:9000/"), Some("eu-west-1"), None, Duration::from_secs(5));
        assert_eq!(store.object_url("b", "k"), "http://minio:9000/b/k");
    }
}
