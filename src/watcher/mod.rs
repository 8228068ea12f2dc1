//! Watcher orchestration
//!
//! The watcher composes a build driver with a list of storage drivers:
//! it polls the run until the backend reports completion, snapshots
//! every store, reconciles pre/post snapshots into the run's artifact
//! list, and assembles the final statement — continuing a draft
//! attestation when one was loaded from an earlier phase.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::attestation::{AttestationError, SlsaVersion, Statement};
use crate::builder::{Builder, BuilderError};
use crate::run::Run;
use crate::snapshot::SnapshotSet;
use crate::store::{Store, StoreError};

use thiserror::Error;

/// Fixed poll interval while a run is still executing.
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Granularity at which the poll sleep re-checks cancellation.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("watch cancelled")]
    Cancelled,

    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error("store has an empty spec url")]
    EmptyStoreUrl,

    #[error("snapshot state does not match configured stores: {0}")]
    SnapshotMismatch(String),

    #[error("no snapshot recorded for store {0}")]
    MissingSnapshot(String),

    #[error("reading or writing snapshot state: {0}")]
    Io(#[from] io::Error),

    #[error("decoding snapshot state: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cooperative cancellation handle shared with the caller. Cloning
/// yields another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Watcher behavior knobs.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Poll a still-running build until it finishes. When off, a
    /// single refresh is performed and the watcher moves on.
    pub wait_for_build: bool,

    /// Predicate generation for freshly-created predicates.
    pub slsa_version: SlsaVersion,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            wait_for_build: true,
            slsa_version: SlsaVersion::V02,
        }
    }
}

/// Orchestrates one attestation: build driver, storage drivers,
/// snapshot ticks and the optional draft.
pub struct Watcher {
    pub builder: Builder,
    pub options: WatcherOptions,
    stores: Vec<Store>,
    snapshots: Vec<SnapshotSet>,
    draft: Option<Statement>,
}

impl Watcher {
    /// Create a watcher for the run at `spec_url`.
    pub fn new(spec_url: &str) -> Result<Self, WatcherError> {
        Ok(Self {
            builder: Builder::new(spec_url)?,
            options: WatcherOptions::default(),
            stores: Vec::new(),
            snapshots: Vec::new(),
            draft: None,
        })
    }

    /// Register a storage location to monitor for artifacts.
    pub fn add_artifact_source(&mut self, spec_url: &str) -> Result<(), WatcherError> {
        self.stores.push(Store::new(spec_url)?);
        Ok(())
    }

    /// Spec URLs of the configured stores, in declaration order.
    pub fn store_specs(&self) -> Vec<String> {
        self.stores.iter().map(|s| s.spec_url.clone()).collect()
    }

    /// Fetch the run from the build system.
    pub fn get_run(&self) -> Result<Run, WatcherError> {
        Ok(self.builder.get_run()?)
    }

    /// Poll the run until it leaves the running state, refreshing it on
    /// every tick. Honors `cancel` between refreshes and mid-sleep;
    /// a cancelled watch returns without touching the run again.
    pub fn watch(&self, run: &mut Run, cancel: &CancellationToken) -> Result<(), WatcherError> {
        if !self.options.wait_for_build {
            self.builder.refresh_run(run)?;
            warn!("not waiting for build to finish, attesting current state");
            return Ok(());
        }

        loop {
            if cancel.is_cancelled() {
                return Err(WatcherError::Cancelled);
            }
            self.builder.refresh_run(run)?;
            if !run.is_running {
                info!(spec_url = %run.spec_url, success = run.is_success, "run finished");
                return Ok(());
            }
            info!(spec_url = %run.spec_url, "run still executing, waiting");

            let mut slept = Duration::ZERO;
            while slept < POLL_INTERVAL {
                if cancel.is_cancelled() {
                    return Err(WatcherError::Cancelled);
                }
                thread::sleep(CANCEL_CHECK_INTERVAL);
                slept += CANCEL_CHECK_INTERVAL;
            }
        }
    }

    /// Snapshot every configured store, appending one set in store
    /// declaration order.
    pub fn snap(&mut self) -> Result<(), WatcherError> {
        let mut set = SnapshotSet::new();
        for store in &self.stores {
            if store.spec_url.is_empty() {
                return Err(WatcherError::EmptyStoreUrl);
            }
            info!(store = %store.spec_url, "snapshotting storage");
            set.insert(&store.spec_url, store.snap()?);
        }
        self.snapshots.push(set);
        Ok(())
    }

    /// Persist all snapshot sets. An empty list writes nothing.
    pub fn save_snapshots(&self, path: &Path) -> Result<(), WatcherError> {
        if self.snapshots.is_empty() {
            return Ok(());
        }
        let mut data = serde_json::to_vec_pretty(&self.snapshots)?;
        data.push(b'\n');
        fs::write(path, data)?;
        info!(path = %path.display(), sets = self.snapshots.len(), "saved snapshot state");
        Ok(())
    }

    /// Load snapshot sets saved by an earlier phase, validating each
    /// set positionally against the configured stores. Any mismatch in
    /// length, order or spec URL aborts the load.
    pub fn load_snapshots(&mut self, path: &Path) -> Result<(), WatcherError> {
        let data = fs::read(path)?;
        let sets: Vec<SnapshotSet> = serde_json::from_slice(&data)?;

        for (tick, set) in sets.iter().enumerate() {
            if set.len() != self.stores.len() {
                return Err(WatcherError::SnapshotMismatch(format!(
                    "set {} holds {} stores, {} configured",
                    tick,
                    set.len(),
                    self.stores.len()
                )));
            }
            for (position, (stored, configured)) in
                set.keys().zip(self.stores.iter()).enumerate()
            {
                if stored != configured.spec_url {
                    return Err(WatcherError::SnapshotMismatch(format!(
                        "set {tick} position {position}: stored {stored}, configured {}",
                        configured.spec_url
                    )));
                }
            }
        }

        info!(path = %path.display(), sets = sets.len(), "loaded snapshot state");
        self.snapshots = sets;
        Ok(())
    }

    /// Read the run's artifacts: each configured store contributes the
    /// delta between the first recorded tick and a fresh one, and the
    /// builder's native stores contribute everything they hold.
    /// Overwrites `run.artifacts` in collection order.
    pub fn collect_artifacts(&mut self, run: &mut Run) -> Result<(), WatcherError> {
        self.collect_store_artifacts(run)?;

        for spec_url in self.builder.artifact_stores() {
            let store = Store::new(&spec_url)?;
            let native = store.read_artifacts()?;
            info!(store = %spec_url, count = native.len(), "collected native artifacts");
            run.artifacts.extend(native);
        }

        info!(total = run.artifacts.len(), "run produced artifacts");
        Ok(())
    }

    /// The configured-stores half of collection: snapshot every store
    /// once more and take each store's delta against the first
    /// recorded tick. With no earlier tick the delta degenerates to
    /// the full listing.
    pub fn collect_store_artifacts(&mut self, run: &mut Run) -> Result<(), WatcherError> {
        self.snap()?;

        let pre = match self.snapshots.len() {
            0 | 1 => None,
            _ => self.snapshots.first(),
        };
        let Some(post) = self.snapshots.last() else {
            return Err(WatcherError::MissingSnapshot("<no ticks>".to_string()));
        };

        let mut artifacts = Vec::new();
        for store in &self.stores {
            let post_snap = post
                .get(&store.spec_url)
                .ok_or_else(|| WatcherError::MissingSnapshot(store.spec_url.clone()))?;
            let collected = match pre.and_then(|set| set.get(&store.spec_url)) {
                Some(pre_snap) => pre_snap.delta(post_snap),
                None => post_snap.artifacts(),
            };
            info!(store = %store.spec_url, count = collected.len(), "collected artifacts");
            artifacts.extend(collected);
        }

        run.artifacts = artifacts;
        Ok(())
    }

    /// Load a draft attestation written by an earlier phase. An empty
    /// path is a no-op. The draft's predicate is coerced to the
    /// configured SLSA version.
    pub fn load_attestation(&mut self, path: &Path) -> Result<(), WatcherError> {
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        let data = fs::read(path)?;
        let statement = Statement::from_json(&data, self.options.slsa_version)?;
        info!(path = %path.display(), "loaded draft attestation");
        self.draft = Some(statement);
        Ok(())
    }

    pub fn has_draft(&self) -> bool {
        self.draft.is_some()
    }

    /// Assemble the final statement: drive the predicate (continuing
    /// the draft when one is loaded) and bind every run artifact as a
    /// subject in collection order.
    pub fn attest_run(&self, run: &Run) -> Result<Statement, WatcherError> {
        let draft_predicate = self.draft.as_ref().map(|s| s.predicate.clone());
        let predicate =
            self.builder
                .build_predicate(run, draft_predicate, self.options.slsa_version)?;

        let mut statement = Statement::new(predicate);
        for artifact in &run.artifacts {
            statement.add_subject(&artifact.path, artifact.checksum.clone());
        }
        Ok(statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn watcher_with_stores(dirs: &[&Path]) -> Watcher {
        let mut watcher = Watcher::new("gcb://project/build-1").unwrap();
        for dir in dirs {
            watcher
                .add_artifact_source(&format!("file://{}", dir.display()))
                .unwrap();
        }
        watcher
    }

    #[test]
    fn test_snapshot_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();

        let mut watcher = watcher_with_stores(&[dir.path()]);
        watcher.snap().unwrap();

        let state = dir.path().join("state.storage-snap.json");
        watcher.save_snapshots(&state).unwrap();

        let mut reloaded = watcher_with_stores(&[dir.path()]);
        reloaded.load_snapshots(&state).unwrap();
        assert_eq!(reloaded.snapshots, watcher.snapshots);
    }

    #[test]
    fn test_save_empty_snapshots_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher_with_stores(&[dir.path()]);
        let state = dir.path().join("state.json");
        watcher.save_snapshots(&state).unwrap();
        assert!(!state.exists());
    }

    #[test]
    fn test_load_snapshots_rejects_store_count_mismatch() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let mut saved = watcher_with_stores(&[dir_a.path()]);
        saved.snap().unwrap();
        let state = dir_a.path().join("state.json");
        saved.save_snapshots(&state).unwrap();

        let mut loaded = watcher_with_stores(&[dir_a.path(), dir_b.path()]);
        let err = loaded.load_snapshots(&state).unwrap_err();
        assert!(matches!(err, WatcherError::SnapshotMismatch(_)));
    }

    #[test]
    fn test_load_snapshots_rejects_reordered_stores() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let mut saved = watcher_with_stores(&[dir_a.path(), dir_b.path()]);
        saved.snap().unwrap();
        let state = dir_a.path().join("state.json");
        saved.save_snapshots(&state).unwrap();

        let mut loaded = watcher_with_stores(&[dir_b.path(), dir_a.path()]);
        let err = loaded.load_snapshots(&state).unwrap_err();
        assert!(matches!(err, WatcherError::SnapshotMismatch(_)));
    }

    #[test]
    fn test_store_collection_uses_delta_against_first_tick() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("before.txt"), "old").unwrap();

        let mut watcher = watcher_with_stores(&[dir.path()]);
        watcher.snap().unwrap();

        fs::write(dir.path().join("built.bin"), "new artifact").unwrap();

        let mut run = Run::new("gcb://project/build-1");
        watcher.collect_store_artifacts(&mut run).unwrap();

        let paths: Vec<_> = run.artifacts.iter().map(|a| a.path.as_str()).collect();
        assert!(paths.contains(&"built.bin"));
        assert!(!paths.contains(&"before.txt"));
    }

    #[test]
    fn test_store_collection_without_pre_tick_lists_everything() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();

        let mut watcher = watcher_with_stores(&[dir.path()]);
        let mut run = Run::new("gcb://project/build-1");
        watcher.collect_store_artifacts(&mut run).unwrap();
        assert_eq!(run.artifacts.len(), 2);
    }

    #[test]
    fn test_cancelled_token_stops_watch() {
        let watcher = watcher_with_stores(&[]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut run = Run::new("gcb://project/build-1");
        run.is_running = true;
        let err = watcher.watch(&mut run, &cancel).unwrap_err();
        assert!(matches!(err, WatcherError::Cancelled));
        // The run was not refreshed or mutated on the way out.
        assert!(run.is_running);
    }
}
