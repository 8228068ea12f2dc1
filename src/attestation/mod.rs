//! in-toto statements and SLSA provenance predicates
//!
//! A [`Statement`] binds a list of subjects (artifacts with digest
//! sets) to a [`Predicate`] carrying the build provenance. Two
//! generations of the SLSA schema are supported behind one set of
//! semantic setters; see [`predicate`].

pub mod predicate;
pub mod sign;
pub mod slsa02;
pub mod slsa1;

use std::collections::BTreeMap;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use predicate::{Predicate, SlsaVersion};

/// in-toto statement type emitted by this crate.
pub const STATEMENT_TYPE: &str = "https://in-toto.io/Statement/v0.1";

/// Checksums keyed by algorithm name.
pub type DigestSet = BTreeMap<String, String>;

/// Errors from statement assembly and serialization.
#[derive(Debug, Error)]
pub enum AttestationError {
    #[error("serializing statement: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("parsing statement JSON: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("statement has no predicate")]
    MissingPredicate,

    #[error("unknown SLSA version {0:?} (expected 0.2, 1 or 1.0)")]
    UnknownVersion(String),

    #[error("reading attestation file: {0}")]
    Io(#[from] io::Error),
}

/// A named artifact and its digest set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub digest: DigestSet,
}

/// Addressable resource: a dependency, build point, or config source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,

    #[serde(default)]
    pub digest: DigestSet,

    #[serde(rename = "downloadLocation", skip_serializing_if = "Option::is_none")]
    pub download_location: Option<String>,
}

impl ResourceDescriptor {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            digest: DigestSet::new(),
            download_location: None,
        }
    }
}

/// An in-toto statement: header plus provenance predicate.
#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    #[serde(rename = "_type")]
    pub statement_type: String,

    pub subject: Vec<Subject>,

    #[serde(rename = "predicateType")]
    pub predicate_type: String,

    pub predicate: Predicate,
}

impl Statement {
    /// Wrap a predicate in a statement with no subjects yet. The
    /// predicate type URI is taken from the predicate itself so the two
    /// can never disagree.
    pub fn new(predicate: Predicate) -> Self {
        Self {
            statement_type: STATEMENT_TYPE.to_string(),
            subject: Vec::new(),
            predicate_type: predicate.type_uri().to_string(),
            predicate,
        }
    }

    /// Bind an artifact as a subject.
    pub fn add_subject(&mut self, name: &str, digest: DigestSet) {
        self.subject.push(Subject {
            name: name.to_string(),
            digest,
        });
    }

    /// Canonical serialization: two-space-indented JSON with a trailing
    /// newline. `serde_json` performs no HTML escaping.
    pub fn to_json(&self) -> Result<Vec<u8>, AttestationError> {
        let mut out = serde_json::to_vec_pretty(self).map_err(AttestationError::Serialize)?;
        out.push(b'\n');
        Ok(out)
    }

    /// Parse a statement, coercing the predicate to `version`.
    ///
    /// Drafts written by an earlier phase may carry a predicate of a
    /// different generation; those are accepted by re-creating the
    /// predicate at the requested version and copying the semantic
    /// fields over.
    pub fn from_json(data: &[u8], version: SlsaVersion) -> Result<Self, AttestationError> {
        #[derive(Deserialize)]
        struct RawStatement {
            #[serde(rename = "_type", default)]
            statement_type: Option<String>,
            #[serde(default)]
            subject: Vec<Subject>,
            predicate: Option<serde_json::Value>,
        }

        let raw: RawStatement = serde_json::from_slice(data).map_err(AttestationError::Parse)?;
        let predicate_value = raw.predicate.ok_or(AttestationError::MissingPredicate)?;
        let predicate = Predicate::from_value(predicate_value, version)?;

        Ok(Self {
            statement_type: raw
                .statement_type
                .unwrap_or_else(|| STATEMENT_TYPE.to_string()),
            subject: raw.subject,
            predicate_type: predicate.type_uri().to_string(),
            predicate,
        })
    }
}
