//! Run data model
//!
//! A [`Run`] is the canonical record of one build execution on a remote
//! build system, normalized across backends. Build drivers create a run
//! from a spec URL and refresh it in place until the backend reports a
//! terminal state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attestation::ResourceDescriptor;

/// One execution of a build backend, identified by its spec URL.
///
/// `spec_url` is set at construction and never reassigned; all other
/// fields are owned by the driver's refresh operation. A terminal run
/// (`!is_running`) has both timestamps populated when the backend
/// reports them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Canonical URI of the run (`gcb://project/build-id`,
    /// `github://host/owner/repo/run-id`).
    pub spec_url: String,

    /// Whether the run completed successfully. Implies `!is_running`.
    pub is_success: bool,

    /// Whether the backend still reports the run as executing.
    pub is_running: bool,

    /// Build parameters as ordered `KEY=value` strings.
    pub params: Vec<String>,

    /// Ordered build steps.
    pub steps: Vec<Step>,

    /// Artifacts attributed to the run after collection.
    pub artifacts: Vec<Artifact>,

    /// When the backend started executing the run.
    pub start_time: Option<DateTime<Utc>>,

    /// When the run reached a terminal state.
    pub end_time: Option<DateTime<Utc>>,

    /// Backend-specific payload, carried through without interpretation.
    /// Only the driver that produced it may read it back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_data: Option<serde_json::Value>,

    /// Resource descriptor identifying the source commit the run built,
    /// when the backend reveals one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_point: Option<ResourceDescriptor>,
}

impl Run {
    /// Create an empty run for `spec_url`, to be populated by a driver
    /// refresh.
    pub fn new(spec_url: &str) -> Self {
        Self {
            spec_url: spec_url.to_string(),
            is_success: false,
            is_running: false,
            params: Vec::new(),
            steps: Vec::new(),
            artifacts: Vec::new(),
            start_time: None,
            end_time: None,
            system_data: None,
            build_point: None,
        }
    }

    /// A run is terminal once the backend stops reporting it as running.
    pub fn is_terminal(&self) -> bool {
        !self.is_running
    }
}

/// Ordered element of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step {
    /// Command the step executed, when the backend exposes one.
    pub command: String,

    /// Container image or runner the step executed in.
    pub image: String,

    /// Whether the step completed successfully.
    pub is_success: bool,

    /// Step arguments.
    pub params: Vec<String>,

    /// When the step started.
    pub start_time: Option<DateTime<Utc>>,

    /// When the step finished.
    pub end_time: Option<DateTime<Utc>>,

    /// Step environment variables.
    pub environment: BTreeMap<String, String>,
}

/// A monitored artifact: a file, object, tag, or synthetic entry.
///
/// Identity for deduplication is `path`. The serialized field names
/// (`Path`, `Checksum`, `Time`) are the persisted snapshot-state
/// format and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Absolute URI or root-relative path identifying the artifact.
    #[serde(rename = "Path")]
    pub path: String,

    /// Checksums keyed by algorithm name, hex-encoded values. Algorithm
    /// names are preserved exactly as the originating driver wrote them.
    #[serde(rename = "Checksum")]
    pub checksum: BTreeMap<String, String>,

    /// Modification instant; `None` when the backend has no notion of
    /// one (registry tags, attestation subjects).
    #[serde(rename = "Time", default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

impl Artifact {
    /// Convenience constructor for an artifact with a single checksum.
    pub fn with_checksum(path: &str, algo: &str, value: &str) -> Self {
        let mut checksum = BTreeMap::new();
        checksum.insert(algo.to_string(), value.to_string());
        Self {
            path: path.to_string(),
            checksum,
            time: None,
        }
    }
}
