//! Attestation-as-snapshot driver (`intoto+<url>`)
//!
//! Treats the subjects of an existing in-toto statement as a synthetic
//! snapshot: every subject becomes an artifact carrying the subject's
//! digest set verbatim, with no modification time.

use serde::Deserialize;
use tracing::info;

use crate::attestation::DigestSet;
use crate::run::Artifact;
use crate::snapshot::Snapshot;

use super::download::download_bytes;
use super::{StorageDriver, StoreError};

pub struct IntotoDriver {
    url: String,
}

#[derive(Debug, Deserialize)]
struct StatementHeader {
    #[serde(default)]
    subject: Vec<StatementSubject>,
}

#[derive(Debug, Deserialize)]
struct StatementSubject {
    name: String,

    #[serde(default)]
    digest: DigestSet,
}

impl IntotoDriver {
    pub fn new(nested_url: &str) -> Result<Self, StoreError> {
        info!(url = nested_url, "initialized in-toto attestation storage backend");
        Ok(Self {
            url: nested_url.to_string(),
        })
    }
}

impl StorageDriver for IntotoDriver {
    fn snap(&self) -> Result<Snapshot, StoreError> {
        let raw = download_bytes(&self.url)?;
        let header: StatementHeader = serde_json::from_slice(&raw)?;

        let mut snap = Snapshot::new();
        for subject in header.subject {
            snap.insert(Artifact {
                path: subject.name.clone(),
                checksum: subject.digest,
                time: None,
            });
        }
        Ok(snap)
    }
}
