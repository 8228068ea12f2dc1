//! Object-bucket storage driver (`gs://`)
//!
//! Lists every object under the configured prefix, syncs the contents
//! into a scratch tree, and reuses the directory driver to hash them.
//! Artifact identities are rewritten back into `gs://bucket/...` form
//! and modification times come from object attributes rather than the
//! local copies.

use std::fs::{self, File};
use std::sync::Mutex;
use std::thread;

use tracing::debug;

use crate::gcp::{GcsClient, GcsObject};
use crate::snapshot::Snapshot;

use super::directory::DirectoryDriver;
use super::{StorageDriver, StoreError};

/// Upper bound on simultaneous object downloads.
const MAX_CONCURRENT_DOWNLOADS: usize = 8;

pub struct GcsDriver {
    bucket: String,
    prefix: String,
    client: GcsClient,
}

impl GcsDriver {
    pub fn new(spec_url: &str) -> Result<Self, StoreError> {
        let url = super::parse_spec_url(spec_url)?;
        let bucket = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| StoreError::parse(spec_url, "gcs store has no bucket defined"))?
            .to_string();
        Ok(Self {
            bucket,
            prefix: super::decoded_path(&url),
            client: GcsClient::new(),
        })
    }

    /// Directory markers are zero-length text objects; they carry no
    /// content worth hashing, and prefixes themselves are not objects.
    fn is_marker(object: &GcsObject) -> bool {
        object.name.ends_with('/')
            || (object.size_bytes() == 0
                && object.content_type.as_deref() == Some("text/plain"))
    }
}

impl StorageDriver for GcsDriver {
    fn snap(&self) -> Result<Snapshot, StoreError> {
        let objects: Vec<GcsObject> = self
            .client
            .list_objects(&self.bucket, &self.prefix)?
            .into_iter()
            .filter(|object| !Self::is_marker(object))
            .collect();
        debug!(bucket = %self.bucket, prefix = %self.prefix, count = objects.len(), "listed bucket objects");

        let workdir = tempfile::tempdir()?;

        // Fan the downloads out behind a bounded group; the first
        // failure aborts the snapshot, there is no partial contract.
        let failures: Mutex<Vec<StoreError>> = Mutex::new(Vec::new());
        let workdir_path = workdir.path();
        for chunk in objects.chunks(MAX_CONCURRENT_DOWNLOADS) {
            let failures = &failures;
            thread::scope(|scope| {
                for object in chunk {
                    scope.spawn(move || {
                        if let Err(error) = self.sync_object(workdir_path, object) {
                            failures.lock().unwrap().push(error);
                        }
                    });
                }
            });
            if let Some(error) = failures.lock().unwrap().drain(..).next() {
                return Err(error);
            }
        }

        let local = DirectoryDriver::with_path(workdir.path().to_path_buf()).snap()?;

        let mut snap = Snapshot::new();
        for object in &objects {
            let Some(hashed) = local.get(&object.name) else {
                continue;
            };
            let mut artifact = hashed.clone();
            artifact.path = format!("gs://{}/{}", self.bucket, object.name);
            artifact.time = object.updated;
            snap.insert(artifact);
        }
        Ok(snap)
    }
}

impl GcsDriver {
    fn sync_object(&self, workdir: &std::path::Path, object: &GcsObject) -> Result<(), StoreError> {
        let local_path = workdir.join(&object.name);
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&local_path)?;
        let object_url = format!("gs://{}/{}", self.bucket, object.name);
        self.client.download_object(&object_url, &mut file)?;
        Ok(())
    }
}
