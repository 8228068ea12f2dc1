//! SLSA provenance v0.2 predicate body
//!
//! Legacy schema: builder/buildType at the top level, invocation with
//! an inline config source, free-form `buildConfig`, and a flat
//! materials list. Kept bit-compatible with the published schema so
//! drafts produced by older emitters parse unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DigestSet, ResourceDescriptor};

/// Predicate type URI for this generation.
pub const PREDICATE_TYPE: &str = "https://slsa.dev/provenance/v0.2";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceV02 {
    pub builder: Builder,

    pub build_type: String,

    pub invocation: Invocation,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_config: Option<serde_json::Value>,

    pub metadata: Metadata,

    pub materials: Vec<Material>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Builder {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub config_source: ConfigSource,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Map<String, serde_json::Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSource {
    pub uri: String,

    #[serde(default)]
    pub digest: DigestSet,

    pub entry_point: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "buildInvocationID")]
    pub build_invocation_id: String,

    #[serde(rename = "buildStartedOn", skip_serializing_if = "Option::is_none")]
    pub build_started_on: Option<DateTime<Utc>>,

    #[serde(rename = "buildFinishedOn", skip_serializing_if = "Option::is_none")]
    pub build_finished_on: Option<DateTime<Utc>>,

    pub completeness: Completeness,

    pub reproducible: bool,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            build_invocation_id: String::new(),
            build_started_on: None,
            build_finished_on: None,
            completeness: Completeness {
                parameters: true,
                environment: false,
                materials: false,
            },
            reproducible: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completeness {
    pub parameters: bool,
    pub environment: bool,
    pub materials: bool,
}

/// Material entry: the v0.2 rendering of a resource descriptor. The
/// schema has no download location field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub uri: String,

    #[serde(default)]
    pub digest: DigestSet,
}

impl From<&ResourceDescriptor> for Material {
    fn from(descriptor: &ResourceDescriptor) -> Self {
        Self {
            uri: descriptor.uri.clone(),
            digest: descriptor.digest.clone(),
        }
    }
}

impl ProvenanceV02 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a material by URI: replace the entry with the same URI or
    /// append a new one.
    pub fn add_material(&mut self, material: Material) {
        if let Some(existing) = self.materials.iter_mut().find(|m| m.uri == material.uri) {
            *existing = material;
        } else {
            self.materials.push(material);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_material_upserts_by_uri() {
        let mut predicate = ProvenanceV02::new();
        predicate.add_material(Material {
            uri: "git+https://example.com/repo".into(),
            digest: DigestSet::from([("sha1".into(), "aaaa".into())]),
        });
        predicate.add_material(Material {
            uri: "git+https://example.com/other".into(),
            digest: DigestSet::new(),
        });
        predicate.add_material(Material {
            uri: "git+https://example.com/repo".into(),
            digest: DigestSet::from([("sha1".into(), "bbbb".into())]),
        });

        assert_eq!(predicate.materials.len(), 2);
        assert_eq!(predicate.materials[0].digest["sha1"], "bbbb");
    }

    #[test]
    fn test_wire_field_names() {
        let mut predicate = ProvenanceV02::new();
        predicate.build_type = "https://example.com/build@v1".into();
        predicate.metadata.build_invocation_id = "run-7".into();
        predicate.invocation.config_source.entry_point = "build.yaml".into();

        let json = serde_json::to_string(&predicate).unwrap();
        assert!(json.contains("\"buildType\""));
        assert!(json.contains("\"buildInvocationID\":\"run-7\""));
        assert!(json.contains("\"entryPoint\":\"build.yaml\""));
        assert!(json.contains("\"configSource\""));
        // Unset optional blocks are omitted
        assert!(!json.contains("\"buildConfig\""));
        assert!(!json.contains("\"parameters\":null"));
    }
}
