//! SBOM-as-snapshot driver (`spdx+<url>`)
//!
//! Reads the top-level packages of an SPDX JSON document as a
//! synthetic snapshot. Package identity is, in order of preference,
//! the purl external reference, the download location, or the package
//! name; packages without checksums cannot participate in deltas and
//! are skipped with a warning.
//!
//! Only the handful of fields the driver consumes are deserialized;
//! full SBOM tooling is someone else's job.

use serde::Deserialize;
use tracing::{info, warn};

use crate::run::Artifact;
use crate::snapshot::Snapshot;

use super::download::download_bytes;
use super::{StorageDriver, StoreError};

pub struct SpdxDriver {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SpdxDocument {
    #[serde(default)]
    packages: Vec<SpdxPackage>,
}

#[derive(Debug, Deserialize)]
struct SpdxPackage {
    #[serde(default)]
    name: String,

    #[serde(rename = "downloadLocation", default)]
    download_location: Option<String>,

    #[serde(rename = "externalRefs", default)]
    external_refs: Vec<ExternalRef>,

    #[serde(default)]
    checksums: Vec<Checksum>,
}

#[derive(Debug, Deserialize)]
struct ExternalRef {
    #[serde(rename = "referenceType", default)]
    reference_type: String,

    #[serde(rename = "referenceLocator", default)]
    reference_locator: String,
}

#[derive(Debug, Deserialize)]
struct Checksum {
    algorithm: String,

    #[serde(rename = "checksumValue")]
    checksum_value: String,
}

impl SpdxDriver {
    pub fn new(nested_url: &str) -> Result<Self, StoreError> {
        info!(url = nested_url, "initialized SPDX SBOM storage backend");
        Ok(Self {
            url: nested_url.to_string(),
        })
    }
}

impl SpdxPackage {
    /// purl, then download location, then name.
    fn identifier(&self) -> Option<String> {
        if let Some(purl) = self
            .external_refs
            .iter()
            .find(|r| r.reference_type == "purl")
        {
            return Some(purl.reference_locator.clone());
        }
        match self.download_location.as_deref() {
            Some(location) if !location.is_empty() && location != "NOASSERTION" => {
                return Some(location.to_string());
            }
            _ => {}
        }
        if self.name.is_empty() {
            None
        } else {
            Some(self.name.clone())
        }
    }
}

impl StorageDriver for SpdxDriver {
    fn snap(&self) -> Result<Snapshot, StoreError> {
        let raw = download_bytes(&self.url)?;
        let document: SpdxDocument = serde_json::from_slice(&raw)?;

        let mut snap = Snapshot::new();
        for package in &document.packages {
            let Some(identifier) = package.identifier() else {
                warn!("SPDX package with no usable identifier, skipping");
                continue;
            };

            if package.checksums.is_empty() {
                warn!(package = %identifier, "SPDX package has no checksum");
                continue;
            }

            let mut artifact = Artifact {
                path: identifier,
                checksum: Default::default(),
                time: None,
            };
            for checksum in &package.checksums {
                artifact
                    .checksum
                    .insert(checksum.algorithm.clone(), checksum.checksum_value.clone());
            }
            snap.insert(artifact);
        }
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_sbom(value: serde_json::Value) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sbom.spdx.json");
        fs::write(&path, value.to_string()).unwrap();
        let url = format!("file://{}", path.display());
        (dir, url)
    }

    #[test]
    fn test_purl_preferred_over_download_location_and_name() {
        let (_dir, url) = write_sbom(serde_json::json!({
            "spdxVersion": "SPDX-2.3",
            "packages": [{
                "name": "widget",
                "downloadLocation": "https://example.com/widget.tar.gz",
                "externalRefs": [
                    {"referenceCategory": "PACKAGE-MANAGER",
                     "referenceType": "purl",
                     "referenceLocator": "pkg:generic/widget@1.0.0"}
                ],
                "checksums": [{"algorithm": "SHA256", "checksumValue": "aa00"}]
            }]
        }));

        let snap = SpdxDriver::new(&url).unwrap().snap().unwrap();
        let artifact = snap.get("pkg:generic/widget@1.0.0").unwrap();
        assert_eq!(artifact.checksum["SHA256"], "aa00");
    }

    #[test]
    fn test_download_location_fallback_then_name() {
        let (_dir, url) = write_sbom(serde_json::json!({
            "packages": [
                {
                    "name": "first",
                    "downloadLocation": "https://example.com/first.tgz",
                    "checksums": [{"algorithm": "SHA1", "checksumValue": "11"}]
                },
                {
                    "name": "second",
                    "downloadLocation": "NOASSERTION",
                    "checksums": [{"algorithm": "SHA1", "checksumValue": "22"}]
                }
            ]
        }));

        let snap = SpdxDriver::new(&url).unwrap().snap().unwrap();
        assert!(snap.get("https://example.com/first.tgz").is_some());
        assert!(snap.get("second").is_some());
    }

    #[test]
    fn test_packages_without_checksums_are_skipped() {
        let (_dir, url) = write_sbom(serde_json::json!({
            "packages": [
                {"name": "no-sums"},
                {"name": "with-sums",
                 "checksums": [{"algorithm": "SHA256", "checksumValue": "cc"}]}
            ]
        }));

        let snap = SpdxDriver::new(&url).unwrap().snap().unwrap();
        assert_eq!(snap.len(), 1);
        assert!(snap.get("with-sums").is_some());
    }
}
