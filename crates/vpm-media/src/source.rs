//! Turns an `image_reference` into bytes.
//!
//! - `http://` / `https://` references are fetched with a bounded timeout.
//! - References starting with `/` or `\` are relative to the image root.
//! - Anything else is expanded (`~`, `$VAR`) and resolved against the root.

use image::DynamicImage;
use reqwest::blocking::Client;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use vpm_core::config::{resolve_with_base, AppConfig, FetchConfig};
use vpm_core::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef<'a> {
    Remote(&'a str),
    Local(PathBuf),
}

pub struct ImageResolver {
    image_root: PathBuf,
    timeout: Duration,
    user_agent: String,
    // Built on first remote fetch so purely local runs never start the HTTP client.
    client: OnceLock<std::result::Result<Client, String>>,
}

impl ImageResolver {
    pub fn new(image_root: impl Into<PathBuf>, fetch: &FetchConfig) -> Self {
        Self {
            image_root: image_root.into(),
            timeout: Duration::from_secs(fetch.timeout_secs),
            user_agent: fetch.user_agent.clone(),
            client: OnceLock::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self { Self::new(config.image_root(), &config.fetch) }

    pub fn image_root(&self) -> &Path { &self.image_root }

    pub fn classify<'a>(&self, reference: &'a str) -> ImageRef<'a> {
        let trimmed = reference.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return ImageRef::Remote(trimmed);
        }
        if trimmed.starts_with('/') || trimmed.starts_with('\\') {
            return ImageRef::Local(self.image_root.join(trimmed.trim_start_matches(['/', '\\'])));
        }
        ImageRef::Local(resolve_with_base(&self.image_root, trimmed))
    }

    /// Raw bytes behind `reference`. Missing files are [`Error::ImageNotFound`];
    /// remote failures are [`Error::RemoteFetch`] or [`Error::Timeout`].
    pub fn read_bytes(&self, reference: &str) -> Result<Vec<u8>> {
        match self.classify(reference) {
            ImageRef::Remote(url) => self.fetch(url),
            ImageRef::Local(path) => read_local(reference, &path),
        }
    }

    /// Read and decode in one step.
    pub fn load_image(&self, reference: &str) -> Result<DynamicImage> {
        decode(&self.read_bytes(reference)?)
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .get_or_init(|| {
                Client::builder()
                    .timeout(self.timeout)
                    .user_agent(self.user_agent.clone())
                    .build()
                    .map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|e| Error::RemoteFetch(format!("cannot build HTTP client: {e}")))
    }

    /// GET `url` and return the body of a 2xx response.
    pub fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "fetching image");
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                Error::Timeout(format!("fetching {url} exceeded {}s", self.timeout.as_secs()))
            } else {
                Error::RemoteFetch(format!("{url}: {e}"))
            }
        };
        let response = self.client()?.get(url).send().map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::RemoteFetch(format!("{url}: HTTP {status}")));
        }
        Ok(response.bytes().map_err(classify)?.to_vec())
    }
}

fn read_local(reference: &str, path: &Path) -> Result<Vec<u8>> {
    if !path.is_file() {
        return Err(Error::ImageNotFound(format!("{reference} (looked at {})", path.display())));
    }
    fs::read(path).map_err(|e| Error::ImageNotFound(format!("{reference}: cannot read {}: {e}", path.display())))
}

/// Decode bytes in any enabled format, guessing it from the content.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| Error::ImageDecode(e.to_string()))
}
