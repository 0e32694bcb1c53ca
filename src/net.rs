//! Download transport and HTTP health probe.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::error::ProvisionError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound HTTP, abstracted so the fetch retry loop and the verifier probe
/// can run against a scripted transport in tests.
pub trait Transport: Send + Sync {
    /// Fetch `url` into `dest`, overwriting. An `Err` leaves `dest` in an
    /// unspecified state; callers download to a temporary name and rename.
    fn download(&self, url: &str, dest: &Path) -> Result<()>;

    /// HEAD-equivalent probe returning the response status code without
    /// following redirects.
    fn probe(&self, url: &str) -> Result<u16>;
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ProvisionError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("znuny-provision/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProvisionError::Download(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {url}"))?;
        if !response.status().is_success() {
            return Err(anyhow!("GET {url} returned {}", response.status()));
        }
        let mut file = File::create(dest)
            .with_context(|| format!("create {}", dest.display()))?;
        response
            .copy_to(&mut file)
            .with_context(|| format!("write {}", dest.display()))?;
        Ok(())
    }

    fn probe(&self, url: &str) -> Result<u16> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("probe {url}"))?;
        Ok(response.status().as_u16())
    }
}
