//! OCI registry storage driver (`oci://`)
//!
//! Lists the tags of one image and emits a pure existence map: one
//! artifact per tag, no checksums, no time. Comparing two snapshots of
//! the same image therefore reveals exactly which tags appeared.

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use crate::run::Artifact;
use crate::snapshot::Snapshot;

use super::{StorageDriver, StoreError};

pub struct OciDriver {
    registry: String,
    repository: String,
    image: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Vec<String>,
}

impl OciDriver {
    pub fn new(spec_url: &str) -> Result<Self, StoreError> {
        let url = super::parse_spec_url(spec_url)?;
        let registry = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| StoreError::parse(spec_url, "missing registry host"))?
            .to_string();

        let path = super::decoded_path(&url);
        if path.is_empty() {
            return Err(StoreError::parse(spec_url, "missing repository/image"));
        }
        let (repository, image) = match path.rsplit_once('/') {
            Some((repository, image)) => (repository.to_string(), image.to_string()),
            None => (String::new(), path),
        };

        Ok(Self {
            registry,
            repository,
            image,
            http: Client::builder()
                .user_agent(concat!("provwatch/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("building http client with static configuration"),
        })
    }

    fn image_name(&self) -> String {
        if self.repository.is_empty() {
            self.image.clone()
        } else {
            format!("{}/{}", self.repository, self.image)
        }
    }
}

impl StorageDriver for OciDriver {
    fn snap(&self) -> Result<Snapshot, StoreError> {
        let url = format!(
            "https://{}/v2/{}/tags/list",
            self.registry,
            self.image_name()
        );
        debug!(url, "listing registry tags");

        let response = self.http.get(&url).send().map_err(|source| StoreError::Request {
            url: url.clone(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                url: url.clone(),
            });
        }
        let listing: TagList = response.json().map_err(|source| StoreError::Request {
            url: url.clone(),
            source,
        })?;

        let mut snap = Snapshot::new();
        for tag in listing.tags {
            snap.insert(Artifact {
                path: format!(
                    "oci://{}/{}:{}",
                    self.registry,
                    self.image_name(),
                    tag
                ),
                checksum: Default::default(),
                time: None,
            });
        }
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_url_parsing() {
        let driver = OciDriver::new("oci://registry.example.com/org/team/app").unwrap();
        assert_eq!(driver.registry, "registry.example.com");
        assert_eq!(driver.repository, "org/team");
        assert_eq!(driver.image, "app");
        assert_eq!(driver.image_name(), "org/team/app");
    }

    #[test]
    fn test_single_segment_image() {
        let driver = OciDriver::new("oci://registry.example.com/app").unwrap();
        assert_eq!(driver.repository, "");
        assert_eq!(driver.image_name(), "app");
    }

    #[test]
    fn test_missing_image_fails() {
        assert!(OciDriver::new("oci://registry.example.com").is_err());
        assert!(OciDriver::new("oci://registry.example.com/").is_err());
    }
}
