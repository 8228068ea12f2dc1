//! Cloud Build storage driver (`gcb://`)
//!
//! A Cloud Build job records the objects it uploaded in an artifact
//! manifest stored next to them. The driver reads that manifest and
//! hashes each listed object; a build with no manifest simply has no
//! artifacts.

use std::sync::Mutex;
use std::thread;

use serde::Deserialize;
use tracing::{debug, info};

use crate::gcp::{CloudBuildClient, GcsClient};
use crate::run::Artifact;
use crate::snapshot::Snapshot;

use super::directory::sha256_for_file;
use super::{StorageDriver, StoreError};

const MAX_CONCURRENT_DOWNLOADS: usize = 8;

pub struct GcbDriver {
    project: String,
    build_id: String,
    gcs: GcsClient,
    cloudbuild: CloudBuildClient,
}

/// One line of the build's artifact manifest.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    location: String,
}

impl GcbDriver {
    pub fn new(spec_url: &str) -> Result<Self, StoreError> {
        let url = super::parse_spec_url(spec_url)?;
        let project = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| StoreError::parse(spec_url, "missing project"))?
            .to_string();
        let build_id = super::decoded_path(&url);
        if build_id.is_empty() {
            return Err(StoreError::parse(spec_url, "missing build id"));
        }
        Ok(Self {
            project,
            build_id,
            gcs: GcsClient::new(),
            cloudbuild: CloudBuildClient::new(),
        })
    }

    /// Download the JSONL manifest and return the listed locations.
    fn read_manifest(&self, manifest_url: &str) -> Result<Vec<String>, StoreError> {
        let mut buffer = Vec::new();
        self.gcs.download_object(manifest_url, &mut buffer)?;

        let mut locations = Vec::new();
        for line in String::from_utf8_lossy(&buffer).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: ManifestEntry = serde_json::from_str(line)?;
            locations.push(entry.location);
        }
        Ok(locations)
    }

    fn hash_artifact(&self, location: &str) -> Result<Artifact, StoreError> {
        // Scratch file is removed when it drops, even on error paths.
        let mut scratch = tempfile::NamedTempFile::new()?;
        self.gcs.download_object(location, &mut scratch)?;
        let digest = sha256_for_file(scratch.path())?;

        let attrs = self.gcs.object_attrs(location)?;
        let mut artifact = Artifact::with_checksum(location, "SHA256", &digest);
        artifact.time = attrs.updated;
        Ok(artifact)
    }
}

impl StorageDriver for GcbDriver {
    fn snap(&self) -> Result<Snapshot, StoreError> {
        let build = self.cloudbuild.get_build(&self.project, &self.build_id)?;
        let manifest = build
            .pointer("/results/artifactManifest")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        if manifest.is_empty() {
            info!("no artifact manifest in run, assuming no artifacts");
            return Ok(Snapshot::new());
        }
        info!(manifest, "pulling artifact manifest");

        let locations = self.read_manifest(manifest)?;
        debug!(count = locations.len(), "artifact manifest entries");

        let collected: Mutex<Vec<Artifact>> = Mutex::new(Vec::new());
        let failures: Mutex<Vec<StoreError>> = Mutex::new(Vec::new());
        for chunk in locations.chunks(MAX_CONCURRENT_DOWNLOADS) {
            let collected = &collected;
            let failures = &failures;
            thread::scope(|scope| {
                for location in chunk {
                    scope.spawn(move || match self.hash_artifact(location) {
                        Ok(artifact) => collected.lock().unwrap().push(artifact),
                        Err(error) => failures.lock().unwrap().push(error),
                    });
                }
            });
            if let Some(error) = failures.lock().unwrap().drain(..).next() {
                return Err(error);
            }
        }

        Ok(collected.into_inner().unwrap().into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_url_parsing() {
        let driver =
            GcbDriver::new("gcb://my-project/ba067a55-6090-4080-bc1a-6d1ff944fd60").unwrap();
        assert_eq!(driver.project, "my-project");
        assert_eq!(driver.build_id, "ba067a55-6090-4080-bc1a-6d1ff944fd60");
    }

    #[test]
    fn test_spec_url_without_build_id_fails() {
        assert!(GcbDriver::new("gcb://my-project").is_err());
        assert!(GcbDriver::new("gcb://my-project/").is_err());
    }

    #[test]
    fn test_manifest_entry_parses_location() {
        let entry: ManifestEntry =
            serde_json::from_str(r#"{"location":"gs://bucket/out.bin","file_hash":[]}"#).unwrap();
        assert_eq!(entry.location, "gs://bucket/out.bin");
    }
}
