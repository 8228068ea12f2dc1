//! Release-asset storage driver (`github://`)
//!
//! Downloads every asset of one release tag and hashes it. Signature
//! material published next to the artifacts (certs, sigs, pem files)
//! is skipped by default so it does not show up as a build product.
//! Identity is the asset's basename.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::github::{GitHubClient, API_BASE};
use crate::run::Artifact;
use crate::snapshot::Snapshot;

use super::directory::sha256_for_file;
use super::{StorageDriver, StoreError};

/// Asset name suffixes excluded from snapshots.
#[derive(Debug, Clone)]
pub struct GitHubReleaseOptions {
    pub ignore_extensions: Vec<String>,
}

impl Default for GitHubReleaseOptions {
    fn default() -> Self {
        Self {
            ignore_extensions: [".pem", ".sig", ".cert"]
                .map(String::from)
                .to_vec(),
        }
    }
}

pub struct GitHubReleaseDriver {
    owner: String,
    repository: String,
    tag: String,
    options: GitHubReleaseOptions,
    client: GitHubClient,
}

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,

    #[serde(rename = "browser_download_url")]
    browser_download_url: String,

    #[serde(rename = "updated_at", default)]
    updated_at: Option<DateTime<Utc>>,
}

impl GitHubReleaseDriver {
    pub fn new(spec_url: &str) -> Result<Self, StoreError> {
        let url = super::parse_spec_url(spec_url)?;
        url.host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| StoreError::parse(spec_url, "missing host"))?;

        let path = super::decoded_path(&url);
        let parts: Vec<&str> = path.split('/').collect();
        let [owner, repository, tag] = parts.as_slice() else {
            return Err(StoreError::parse(
                spec_url,
                "unable to find owner/repo/tag in spec URL",
            ));
        };

        Ok(Self {
            owner: owner.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
            options: GitHubReleaseOptions::default(),
            client: GitHubClient::new(),
        })
    }

    fn is_ignored(&self, name: &str) -> bool {
        self.options
            .ignore_extensions
            .iter()
            .any(|ext| name.ends_with(ext.as_str()))
    }
}

impl StorageDriver for GitHubReleaseDriver {
    fn snap(&self) -> Result<Snapshot, StoreError> {
        let url = format!(
            "{API_BASE}/repos/{}/{}/releases/tags/{}",
            self.owner, self.repository, self.tag
        );
        let release: Release = serde_json::from_value(self.client.get_json(&url)?)?;

        let mut snap = Snapshot::new();
        for asset in &release.assets {
            if self.is_ignored(&asset.name) {
                debug!(asset = %asset.name, "skipping ignored asset extension");
                continue;
            }

            let mut scratch = tempfile::NamedTempFile::new()?;
            self.client
                .download(&asset.browser_download_url, &mut scratch)?;
            let digest = sha256_for_file(scratch.path())?;

            let mut artifact = Artifact::with_checksum(&asset.name, "SHA256", &digest);
            artifact.time = asset.updated_at;
            snap.insert(artifact);
        }
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_url_parsing() {
        let driver = GitHubReleaseDriver::new("github://github.com/acme/widget/v2.1.0").unwrap();
        assert_eq!(driver.owner, "acme");
        assert_eq!(driver.repository, "widget");
        assert_eq!(driver.tag, "v2.1.0");
    }

    #[test]
    fn test_missing_tag_fails() {
        assert!(GitHubReleaseDriver::new("github://github.com/acme/widget").is_err());
    }

    #[test]
    fn test_default_ignore_set() {
        let driver = GitHubReleaseDriver::new("github://github.com/acme/widget/v1").unwrap();
        assert!(driver.is_ignored("checksums.txt.sig"));
        assert!(driver.is_ignored("signer.pem"));
        assert!(driver.is_ignored("signer.cert"));
        assert!(!driver.is_ignored("widget-linux-amd64.tar.gz"));
    }
}
