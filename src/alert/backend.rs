use std::time::Duration;

use anyhow::{anyhow, Result};

/// Remote service receiving each serialised alert.
pub trait AlertBackend: Send + Sync {
    fn post(&self, payload: &[u8]) -> Result<()>;
}

/// JSON `POST` with a bounded timeout. Any non-2xx answer is a failure.
#[derive(Clone, Debug)]
pub struct HttpAlertBackend {
    url: String,
    timeout: Duration,
}

impl HttpAlertBackend {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl AlertBackend for HttpAlertBackend {
    fn post(&self, payload: &[u8]) -> Result<()> {
        ureq::post(&self.url)
            .timeout(self.timeout)
            .set("Content-Type", "application/json")
            .send_bytes(payload)
            .map_err(|err| anyhow!("POST {} failed: {}", self.url, err))?;
        Ok(())
    }
}
