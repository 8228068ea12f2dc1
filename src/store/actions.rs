//! Workflow-run artifact storage driver (`actions://`)
//!
//! Reads the artifacts a GitHub Actions run uploaded, downloads each
//! archive and hashes it locally. Identity is the artifacts endpoint
//! URL with the artifact name appended, so two runs never collide.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::github::{GitHubClient, API_BASE};
use crate::run::Artifact;
use crate::snapshot::Snapshot;

use super::directory::sha256_for_file;
use super::{StorageDriver, StoreError};

pub struct ActionsDriver {
    owner: String,
    repository: String,
    run_id: u64,
    client: GitHubClient,
}

#[derive(Debug, Deserialize)]
struct ArtifactListing {
    #[serde(default)]
    artifacts: Vec<RunArtifact>,
}

#[derive(Debug, Deserialize)]
struct RunArtifact {
    name: String,

    #[serde(rename = "archive_download_url")]
    archive_download_url: String,

    #[serde(default)]
    expired: bool,

    #[serde(rename = "updated_at", default)]
    updated_at: Option<DateTime<Utc>>,
}

impl ActionsDriver {
    pub fn new(spec_url: &str) -> Result<Self, StoreError> {
        let url = super::parse_spec_url(spec_url)?;
        url.host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| StoreError::parse(spec_url, "missing host"))?;

        let path = super::decoded_path(&url);
        let parts: Vec<&str> = path.split('/').collect();
        let [owner, repository, run_id] = parts.as_slice() else {
            return Err(StoreError::parse(
                spec_url,
                "expected actions://host/owner/repo/run-id",
            ));
        };
        let run_id = run_id
            .parse()
            .map_err(|_| StoreError::parse(spec_url, "unable to read run id"))?;

        Ok(Self {
            owner: owner.to_string(),
            repository: repository.to_string(),
            run_id,
            client: GitHubClient::new(),
        })
    }

    fn artifacts_url(&self) -> String {
        format!(
            "{API_BASE}/repos/{}/{}/actions/runs/{}/artifacts",
            self.owner, self.repository, self.run_id
        )
    }
}

impl StorageDriver for ActionsDriver {
    fn snap(&self) -> Result<Snapshot, StoreError> {
        let run_url = self.artifacts_url();
        let listing: ArtifactListing =
            serde_json::from_value(self.client.get_json(&run_url)?)?;

        let mut snap = Snapshot::new();
        for entry in &listing.artifacts {
            if entry.expired {
                continue;
            }

            let mut scratch = tempfile::NamedTempFile::new()?;
            self.client
                .download(&entry.archive_download_url, &mut scratch)?;
            let digest = sha256_for_file(scratch.path())?;

            let mut artifact = Artifact::with_checksum(
                &format!("{run_url}/{}", entry.name),
                "SHA256",
                &digest,
            );
            artifact.time = entry.updated_at;
            snap.insert(artifact);
        }
        info!(
            count = snap.len(),
            run_id = self.run_id,
            "artifacts collected from run"
        );
        Ok(snap)
    }
}
