//! Artifact storage drivers
//!
//! A [`Store`] wraps one storage backend behind the [`StorageDriver`]
//! trait. Drivers are selected by the spec URL's scheme; the composite
//! `intoto+<url>` and `spdx+<url>` schemes interpret an existing
//! attestation or SBOM as a synthetic snapshot. The registry is the
//! single point of extensibility: the watcher never names a backend.

pub mod actions;
pub mod directory;
pub mod download;
pub mod gcb;
pub mod gcs;
pub mod github;
pub mod intoto;
pub mod oci;
pub mod spdx;

use std::io;

use thiserror::Error;
use url::Url;

use crate::gcp::GcpError;
use crate::github::GitHubError;
use crate::run::Artifact;
use crate::snapshot::Snapshot;
use download::DownloadError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} is not a storage URL")]
    UnknownDriver(String),

    #[error("parsing storage spec URL {url}: {reason}")]
    ParseUrl { url: String, reason: String },

    #[error(transparent)]
    Gcp(#[from] GcpError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("missing field {field} in backend response")]
    MissingField { field: &'static str },

    #[error("executing request to {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("backend returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("decoding backend response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("walking directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    fn parse(url: &str, reason: impl Into<String>) -> Self {
        Self::ParseUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// A backend that can capture its current state as a snapshot.
pub trait StorageDriver: Send + Sync {
    fn snap(&self) -> Result<Snapshot, StoreError>;
}

/// One configured artifact storage location.
pub struct Store {
    /// Spec URL the store was created from. Identity of the store in
    /// persisted snapshot state.
    pub spec_url: String,

    driver: Box<dyn StorageDriver>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("spec_url", &self.spec_url).finish()
    }
}

impl Store {
    /// Select a driver by the spec URL's scheme.
    pub fn new(spec_url: &str) -> Result<Self, StoreError> {
        let driver = new_driver(spec_url)?;
        Ok(Self {
            spec_url: spec_url.to_string(),
            driver,
        })
    }

    /// Capture the backend's current state.
    pub fn snap(&self) -> Result<Snapshot, StoreError> {
        self.driver.snap()
    }

    /// Read the backend's artifacts in deterministic order.
    pub fn read_artifacts(&self) -> Result<Vec<Artifact>, StoreError> {
        Ok(self.snap()?.artifacts())
    }
}

fn new_driver(spec_url: &str) -> Result<Box<dyn StorageDriver>, StoreError> {
    let scheme = spec_url
        .split_once(':')
        .map(|(scheme, _)| scheme)
        .ok_or_else(|| StoreError::parse(spec_url, "missing scheme"))?;

    // Composite schemes carry the synthetic format before the first
    // `+`; the remainder is a nested URL for the universal downloader.
    if let Some((format, _)) = scheme.split_once('+') {
        let nested = &spec_url[format.len() + 1..];
        return match format {
            "intoto" => Ok(Box::new(intoto::IntotoDriver::new(nested)?)),
            "spdx" => Ok(Box::new(spdx::SpdxDriver::new(nested)?)),
            _ => Err(StoreError::UnknownDriver(spec_url.to_string())),
        };
    }

    match scheme {
        "file" => Ok(Box::new(directory::DirectoryDriver::new(spec_url)?)),
        "gs" => Ok(Box::new(gcs::GcsDriver::new(spec_url)?)),
        "oci" => Ok(Box::new(oci::OciDriver::new(spec_url)?)),
        "actions" => Ok(Box::new(actions::ActionsDriver::new(spec_url)?)),
        "gcb" => Ok(Box::new(gcb::GcbDriver::new(spec_url)?)),
        "github" => Ok(Box::new(github::GitHubReleaseDriver::new(spec_url)?)),
        _ => Err(StoreError::UnknownDriver(spec_url.to_string())),
    }
}

/// Parse a spec URL, surfacing failures as store errors.
pub(crate) fn parse_spec_url(spec_url: &str) -> Result<Url, StoreError> {
    Url::parse(spec_url).map_err(|e| StoreError::parse(spec_url, e.to_string()))
}

/// Path component of a spec URL, URL-decoded once and stripped of
/// enclosing slashes.
pub(crate) fn decoded_path(url: &Url) -> String {
    percent_encoding::percent_decode_str(url.path())
        .decode_utf8_lossy()
        .trim_matches('/')
        .to_string()
}
