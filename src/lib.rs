//! provwatch - remote build observer and provenance emitter
//!
//! provwatch watches builds that run in hosted CI/CD systems and emits
//! a signed in-toto/SLSA provenance attestation describing what went
//! in, what the build did, and which artifacts came out. Builds are
//! addressed by a spec URL; the scheme selects a driver that knows how
//! to query that backend and where its artifacts land.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`run`] | Canonical record of one build execution |
//! | [`snapshot`] | Content-addressed storage snapshots and deltas |
//! | [`store`] | Storage drivers, one per artifact location scheme |
//! | [`builder`] | Build-system drivers and the dispatch facade |
//! | [`attestation`] | in-toto statements, SLSA v0.2/v1 predicates, DSSE signing |
//! | [`watcher`] | Orchestration: poll, snapshot, collect, attest |
//! | [`git`] | Working-tree probe for the start-phase material |
//! | [`github`] / [`gcp`] | Thin REST clients for the hosted backends |

pub mod attestation;
pub mod builder;
pub mod gcp;
pub mod git;
pub mod github;
pub mod run;
pub mod snapshot;
pub mod store;
pub mod watcher;

pub use attestation::{
    AttestationError, DigestSet, Predicate, ResourceDescriptor, SlsaVersion, Statement, Subject,
};
pub use builder::{classify_dependency, Builder, BuilderError, DependencyKind};
pub use run::{Artifact, Run, Step};
pub use snapshot::{Snapshot, SnapshotSet};
pub use store::{Store, StoreError};
pub use watcher::{CancellationToken, Watcher, WatcherError, WatcherOptions};
