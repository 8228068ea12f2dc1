//! Build-system drivers and the builder facade
//!
//! A [`Builder`] owns the driver selected by the run spec URL's scheme
//! and decorates the predicates it produces: declared dependency URIs
//! are classified and appended, and the run's build point (when the
//! backend revealed one) is recorded as a dependency too.

pub mod gcb;
pub mod github;

use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::attestation::{DigestSet, Predicate, ResourceDescriptor, SlsaVersion};
use crate::gcp::GcpError;
use crate::github::GitHubError;
use crate::run::Run;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("unable to get driver for scheme {0}")]
    UnknownDriver(String),

    #[error("parsing run spec URL {url}: {reason}")]
    ParseUrl { url: String, reason: String },

    #[error(transparent)]
    Gcp(#[from] GcpError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error("missing field {field} in backend response")]
    MissingField { field: &'static str },

    #[error("backend reported unknown build status {0:?}")]
    UnknownStatus(String),

    #[error("run carries no backend payload; refresh it before building a predicate")]
    MissingSystemData,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BuilderError {
    fn parse(url: &str, reason: impl Into<String>) -> Self {
        Self::ParseUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// Adapter to one build backend.
pub trait BuildDriver {
    /// One-shot fetch: a fresh run, already refreshed once.
    fn get_run(&self) -> Result<Run, BuilderError>;

    /// Re-query the backend and overwrite the run's status, steps and
    /// timing in place. Idempotent for an unchanged backend state.
    fn refresh_run(&self, run: &mut Run) -> Result<(), BuilderError>;

    /// Produce (or enrich, when `draft` is given) a provenance
    /// predicate from the run. A fresh predicate uses `version`; a
    /// draft keeps its own generation.
    fn build_predicate(
        &self,
        run: &Run,
        draft: Option<Predicate>,
        version: SlsaVersion,
    ) -> Result<Predicate, BuilderError>;

    /// Spec URLs of the backend's native artifact stores.
    fn artifact_stores(&self) -> Vec<String>;
}

/// Select a build driver by the spec URL's scheme.
pub fn new_driver(spec_url: &str) -> Result<Box<dyn BuildDriver>, BuilderError> {
    let url = Url::parse(spec_url).map_err(|e| BuilderError::parse(spec_url, e.to_string()))?;
    match url.scheme() {
        "gcb" => Ok(Box::new(gcb::GcbDriver::new(spec_url)?)),
        "github" => Ok(Box::new(github::GithubDriver::new(spec_url)?)),
        other => Err(BuilderError::UnknownDriver(other.to_string())),
    }
}

/// How a declared dependency URI's `@` suffix was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    /// 40 hex characters: a git commit.
    Git40,
    /// `shaNNN:value`: a digest string.
    DigestColon,
    /// Anything else: the whole string is the URI.
    PlainUri,
}

/// Classify a declared dependency string per its `@` suffix.
pub fn classify_dependency(raw: &str) -> DependencyKind {
    let Some((_, suffix)) = raw.split_once('@') else {
        return DependencyKind::PlainUri;
    };
    if suffix.len() == 40 && suffix.bytes().all(|b| b.is_ascii_hexdigit()) {
        return DependencyKind::Git40;
    }
    if suffix.to_lowercase().starts_with("sha") && suffix.contains(':') {
        return DependencyKind::DigestColon;
    }
    DependencyKind::PlainUri
}

/// Resolve a declared dependency string into a resource descriptor.
pub fn dependency_descriptor(raw: &str) -> ResourceDescriptor {
    match classify_dependency(raw) {
        DependencyKind::Git40 => {
            let (uri, commit) = raw.split_once('@').expect("classified with a suffix");
            ResourceDescriptor {
                uri: uri.to_string(),
                digest: DigestSet::from([
                    ("sha1".to_string(), commit.to_string()),
                    ("gitCommit".to_string(), commit.to_string()),
                ]),
                download_location: Some(raw.to_string()),
            }
        }
        DependencyKind::DigestColon => {
            let (uri, suffix) = raw.split_once('@').expect("classified with a suffix");
            let (algo, value) = suffix.split_once(':').expect("classified with a colon");
            ResourceDescriptor {
                uri: uri.to_string(),
                digest: DigestSet::from([(algo.to_lowercase(), value.to_string())]),
                download_location: Some(raw.to_string()),
            }
        }
        DependencyKind::PlainUri => {
            if !raw.contains('@') {
                warn!(uri = raw, "unable to read commit from vcs url");
            }
            ResourceDescriptor::new(raw)
        }
    }
}

/// Build-driver facade bound to one run spec URL.
pub struct Builder {
    pub spec_url: String,

    /// Dependencies declared on the command line, appended to every
    /// predicate this builder produces.
    pub dependency_uris: Vec<String>,

    driver: Box<dyn BuildDriver>,
}

impl Builder {
    pub fn new(spec_url: &str) -> Result<Self, BuilderError> {
        Ok(Self {
            spec_url: spec_url.to_string(),
            dependency_uris: Vec::new(),
            driver: new_driver(spec_url)?,
        })
    }

    pub fn get_run(&self) -> Result<Run, BuilderError> {
        self.driver.get_run()
    }

    pub fn refresh_run(&self, run: &mut Run) -> Result<(), BuilderError> {
        self.driver.refresh_run(run)
    }

    /// Delegate to the driver, then append declared dependencies and
    /// the run's build point.
    pub fn build_predicate(
        &self,
        run: &Run,
        draft: Option<Predicate>,
        version: SlsaVersion,
    ) -> Result<Predicate, BuilderError> {
        let mut predicate = self.driver.build_predicate(run, draft, version)?;

        for uri in &self.dependency_uris {
            predicate.add_dependency(dependency_descriptor(uri));
        }

        if let Some(point) = &run.build_point {
            predicate.add_dependency(ResourceDescriptor {
                uri: point.uri.clone(),
                digest: point.digest.clone(),
                download_location: None,
            });
        }

        Ok(predicate)
    }

    pub fn artifact_stores(&self) -> Vec<String> {
        self.driver.artifact_stores()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_registry_dispatch() {
        assert!(new_driver("gcb://project/build-id").is_ok());
        assert!(new_driver("github://github.com/org/repo/123").is_ok());
        assert!(matches!(
            new_driver("jenkins://host/job/7"),
            Err(BuilderError::UnknownDriver(scheme)) if scheme == "jenkins"
        ));
    }

    #[test]
    fn test_classify_git_commit() {
        let raw = "git+https://github.com/org/repo@0123456789abcdef0123456789abcdef01234567";
        assert_eq!(classify_dependency(raw), DependencyKind::Git40);

        let descriptor = dependency_descriptor(raw);
        assert_eq!(descriptor.uri, "git+https://github.com/org/repo");
        assert_eq!(
            descriptor.digest["sha1"],
            "0123456789abcdef0123456789abcdef01234567"
        );
        assert_eq!(
            descriptor.digest["gitCommit"],
            "0123456789abcdef0123456789abcdef01234567"
        );
        assert_eq!(descriptor.download_location.as_deref(), Some(raw));
    }

    #[test]
    fn test_classify_digest_string() {
        let raw = "oci://registry/image@sha256:00112233";
        assert_eq!(classify_dependency(raw), DependencyKind::DigestColon);

        let descriptor = dependency_descriptor(raw);
        assert_eq!(descriptor.uri, "oci://registry/image");
        assert_eq!(descriptor.digest["sha256"], "00112233");
        assert_eq!(descriptor.download_location.as_deref(), Some(raw));
    }

    #[test]
    fn test_classify_digest_string_uppercase_algo() {
        let raw = "https://example.com/blob@SHA512:ff";
        assert_eq!(classify_dependency(raw), DependencyKind::DigestColon);
        assert_eq!(dependency_descriptor(raw).digest["sha512"], "ff");
    }

    #[test]
    fn test_classify_plain_uris() {
        // No suffix at all
        assert_eq!(
            classify_dependency("https://example.com/dep"),
            DependencyKind::PlainUri
        );
        // 40 chars but not hex
        assert_eq!(
            classify_dependency("uri@zzzz567890abcdef0123456789abcdef01234567"),
            DependencyKind::PlainUri
        );
        // 39 hex chars
        assert_eq!(
            classify_dependency("uri@123456789abcdef0123456789abcdef0123456"),
            DependencyKind::PlainUri
        );
        // sha prefix but no colon
        assert_eq!(
            classify_dependency("uri@sha256-00112233"),
            DependencyKind::PlainUri
        );

        // The whole string is kept as the URI
        let descriptor = dependency_descriptor("uri@v1.2.3");
        assert_eq!(descriptor.uri, "uri@v1.2.3");
        assert!(descriptor.digest.is_empty());
        assert!(descriptor.download_location.is_none());
    }
}
