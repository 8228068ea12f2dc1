//! Directory storage driver (`file://`)
//!
//! Walks a local tree, hashes every regular file with SHA-256 and
//! records its modification time. Identity is the path relative to the
//! walked root, so two snapshots of the same tree compare cleanly no
//! matter where the root lives.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::run::Artifact;
use crate::snapshot::Snapshot;

use super::{StorageDriver, StoreError};

pub struct DirectoryDriver {
    path: PathBuf,
}

impl DirectoryDriver {
    pub fn new(spec_url: &str) -> Result<Self, StoreError> {
        let url = super::parse_spec_url(spec_url)?;
        let path = url
            .to_file_path()
            .map_err(|()| StoreError::parse(spec_url, "not a local directory path"))?;
        Ok(Self::with_path(path))
    }

    /// Snapshot an existing local tree without going through a spec
    /// URL. Used by drivers that sync remote state into a temp tree.
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageDriver for DirectoryDriver {
    fn snap(&self) -> Result<Snapshot, StoreError> {
        let mut snap = Snapshot::new();

        for entry in WalkDir::new(&self.path).follow_links(false) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.path)
                .map_err(|_| {
                    StoreError::parse(
                        &self.path.display().to_string(),
                        format!("{} is not under the walked root", entry.path().display()),
                    )
                })?
                .to_string_lossy()
                .to_string();

            let digest = sha256_for_file(entry.path())?;
            let time = entry
                .metadata()?
                .modified()
                .ok()
                .map(DateTime::<Utc>::from);

            let mut artifact = Artifact::with_checksum(&relative, "SHA256", &digest);
            artifact.time = time;
            snap.insert(artifact);
        }

        Ok(snap)
    }
}

/// Hex SHA-256 of a file's contents, streamed.
pub fn sha256_for_file(path: &Path) -> Result<String, StoreError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
