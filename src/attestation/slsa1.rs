//! SLSA provenance v1 predicate body
//!
//! The v1 schema splits the document into a `buildDefinition` (what
//! was asked for) and `runDetails` (what the builder did). The legacy
//! `buildConfig` has no home here; the setter accepts the call and
//! drops the value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ResourceDescriptor;

/// Predicate type URI for this generation.
pub const PREDICATE_TYPE: &str = "https://slsa.dev/provenance/v1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceV1 {
    pub build_definition: BuildDefinition,
    pub run_details: RunDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDefinition {
    pub build_type: String,

    pub external_parameters: serde_json::Map<String, serde_json::Value>,

    pub internal_parameters: serde_json::Map<String, serde_json::Value>,

    pub resolved_dependencies: Vec<ResourceDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    pub builder: Builder,
    pub metadata: BuildMetadata,
    pub byproducts: Vec<ResourceDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Builder {
    pub id: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub version: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMetadata {
    pub invocation_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_on: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<DateTime<Utc>>,
}

impl ProvenanceV1 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the config source as the `source` external parameter,
    /// composed as `uri@sha1` when a sha1 digest is present.
    pub fn set_config_source(&mut self, source: &ResourceDescriptor) {
        let mut locator = source.uri.clone();
        if let Some(sha) = source.digest.get("sha1") {
            if !sha.is_empty() {
                locator.push('@');
                locator.push_str(sha);
            }
        }
        self.build_definition
            .external_parameters
            .insert("source".to_string(), serde_json::Value::String(locator));
    }

    /// Upsert a resolved dependency by URI.
    pub fn add_dependency(&mut self, dependency: ResourceDescriptor) {
        let deps = &mut self.build_definition.resolved_dependencies;
        if let Some(existing) = deps.iter_mut().find(|d| d.uri == dependency.uri) {
            *existing = dependency;
        } else {
            deps.push(dependency);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::DigestSet;

    #[test]
    fn test_config_source_composes_uri_and_sha1() {
        let mut predicate = ProvenanceV1::new();
        let mut source = ResourceDescriptor::new("git+https://example.com/repo");
        source.digest = DigestSet::from([("sha1".into(), "abc123".into())]);
        predicate.set_config_source(&source);

        assert_eq!(
            predicate.build_definition.external_parameters["source"],
            serde_json::json!("git+https://example.com/repo@abc123")
        );
    }

    #[test]
    fn test_config_source_without_sha1_is_plain_uri() {
        let mut predicate = ProvenanceV1::new();
        predicate.set_config_source(&ResourceDescriptor::new("oci://registry/image"));
        assert_eq!(
            predicate.build_definition.external_parameters["source"],
            serde_json::json!("oci://registry/image")
        );
    }

    #[test]
    fn test_add_dependency_upserts_by_uri() {
        let mut predicate = ProvenanceV1::new();
        let mut first = ResourceDescriptor::new("https://example.com/dep");
        first.digest = DigestSet::from([("sha256".into(), "00".into())]);
        predicate.add_dependency(first);

        let mut replacement = ResourceDescriptor::new("https://example.com/dep");
        replacement.digest = DigestSet::from([("sha256".into(), "ff".into())]);
        predicate.add_dependency(replacement);

        let deps = &predicate.build_definition.resolved_dependencies;
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].digest["sha256"], "ff");
    }

    #[test]
    fn test_wire_field_names() {
        let mut predicate = ProvenanceV1::new();
        predicate.build_definition.build_type = "https://example.com/build@v1".into();
        predicate.run_details.metadata.invocation_id = "42".into();

        let json = serde_json::to_string(&predicate).unwrap();
        assert!(json.contains("\"buildDefinition\""));
        assert!(json.contains("\"externalParameters\""));
        assert!(json.contains("\"internalParameters\""));
        assert!(json.contains("\"resolvedDependencies\""));
        assert!(json.contains("\"runDetails\""));
        assert!(json.contains("\"invocationId\":\"42\""));
    }
}
