//! Schema-polymorphic provenance predicate
//!
//! Both SLSA generations are driven through the same semantic setters
//! so that build drivers never branch on the schema version. Each
//! setter has per-version semantics; the most visible divergence is
//! `set_build_config`, which v1 accepts and silently drops.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::slsa02::{self, Material, ProvenanceV02};
use super::slsa1::{self, ProvenanceV1};
use super::{AttestationError, DigestSet, ResourceDescriptor};

/// Supported SLSA provenance generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlsaVersion {
    #[default]
    V02,
    V1,
}

impl FromStr for SlsaVersion {
    type Err = AttestationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0.2" => Ok(Self::V02),
            "1" | "1.0" => Ok(Self::V1),
            other => Err(AttestationError::UnknownVersion(other.to_string())),
        }
    }
}

impl fmt::Display for SlsaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V02 => f.write_str("0.2"),
            Self::V1 => f.write_str("1.0"),
        }
    }
}

/// Provenance body under one of the two supported schema URIs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Predicate {
    SlsaV02(ProvenanceV02),
    SlsaV1(ProvenanceV1),
}

impl Predicate {
    /// A freshly-initialized predicate of the given generation.
    pub fn new(version: SlsaVersion) -> Self {
        match version {
            SlsaVersion::V02 => Self::SlsaV02(ProvenanceV02::new()),
            SlsaVersion::V1 => Self::SlsaV1(ProvenanceV1::new()),
        }
    }

    pub fn version(&self) -> SlsaVersion {
        match self {
            Self::SlsaV02(_) => SlsaVersion::V02,
            Self::SlsaV1(_) => SlsaVersion::V1,
        }
    }

    /// The predicate type URI this body serializes under.
    pub fn type_uri(&self) -> &'static str {
        match self {
            Self::SlsaV02(_) => slsa02::PREDICATE_TYPE,
            Self::SlsaV1(_) => slsa1::PREDICATE_TYPE,
        }
    }

    /// Parse a predicate value as `version`, converting from the other
    /// generation when the value does not match the requested one.
    pub fn from_value(
        value: serde_json::Value,
        version: SlsaVersion,
    ) -> Result<Self, AttestationError> {
        match version {
            SlsaVersion::V02 => {
                if let Ok(body) = serde_json::from_value::<ProvenanceV02>(value.clone()) {
                    return Ok(Self::SlsaV02(body));
                }
                let other = serde_json::from_value::<ProvenanceV1>(value)
                    .map_err(AttestationError::Parse)?;
                Ok(Self::SlsaV1(other).convert(SlsaVersion::V02))
            }
            SlsaVersion::V1 => {
                // A v0.2 body parses first: its fields are all required
                // here, while an empty object would satisfy v1's
                // defaults and lose the draft's content.
                if let Ok(body) = serde_json::from_value::<ProvenanceV02>(value.clone()) {
                    return Ok(Self::SlsaV02(body).convert(SlsaVersion::V1));
                }
                let body = serde_json::from_value::<ProvenanceV1>(value)
                    .map_err(AttestationError::Parse)?;
                Ok(Self::SlsaV1(body))
            }
        }
    }

    /// Re-create this predicate at `version`, copying the semantic
    /// fields across generations. Returns `self` when the version
    /// already matches.
    pub fn convert(self, version: SlsaVersion) -> Self {
        if self.version() == version {
            return self;
        }
        match self {
            Self::SlsaV02(old) => {
                let mut predicate = Predicate::new(SlsaVersion::V1);
                predicate.set_builder_id(&old.builder.id);
                predicate.set_build_type(&old.build_type);
                predicate.set_invocation_id(&old.metadata.build_invocation_id);
                predicate.set_started_on(old.metadata.build_started_on);
                predicate.set_finished_on(old.metadata.build_finished_on);

                let source = &old.invocation.config_source;
                if !source.uri.is_empty() {
                    predicate.set_config_source(&ResourceDescriptor {
                        uri: source.uri.clone(),
                        digest: source.digest.clone(),
                        download_location: None,
                    });
                }
                if !source.entry_point.is_empty() {
                    predicate.set_entry_point(&source.entry_point);
                }
                if let Some(parameters) = &old.invocation.parameters {
                    for (name, value) in parameters {
                        predicate.add_external_parameter(name, value.clone());
                    }
                }
                for material in &old.materials {
                    predicate.add_dependency(ResourceDescriptor {
                        uri: material.uri.clone(),
                        digest: material.digest.clone(),
                        download_location: None,
                    });
                }
                predicate
            }
            Self::SlsaV1(old) => {
                let mut predicate = Predicate::new(SlsaVersion::V02);
                predicate.set_builder_id(&old.run_details.builder.id);
                predicate.set_build_type(&old.build_definition.build_type);
                predicate.set_invocation_id(&old.run_details.metadata.invocation_id);
                predicate.set_started_on(old.run_details.metadata.started_on);
                predicate.set_finished_on(old.run_details.metadata.finished_on);

                let parameters = &old.build_definition.external_parameters;
                if let Some(serde_json::Value::String(source)) = parameters.get("source") {
                    let (uri, sha1) = match source.rsplit_once('@') {
                        Some((uri, sha1)) => (uri, Some(sha1)),
                        None => (source.as_str(), None),
                    };
                    let mut descriptor = ResourceDescriptor::new(uri);
                    if let Some(sha1) = sha1 {
                        descriptor.digest =
                            DigestSet::from([("sha1".to_string(), sha1.to_string())]);
                    }
                    predicate.set_config_source(&descriptor);
                }
                if let Some(serde_json::Value::String(entry)) = parameters.get("entryPoint") {
                    predicate.set_entry_point(entry);
                }
                for dependency in &old.build_definition.resolved_dependencies {
                    predicate.add_dependency(dependency.clone());
                }
                predicate
            }
        }
    }

    pub fn set_builder_id(&mut self, id: &str) {
        match self {
            Self::SlsaV02(p) => p.builder.id = id.to_string(),
            Self::SlsaV1(p) => p.run_details.builder.id = id.to_string(),
        }
    }

    pub fn set_build_type(&mut self, build_type: &str) {
        match self {
            Self::SlsaV02(p) => p.build_type = build_type.to_string(),
            Self::SlsaV1(p) => p.build_definition.build_type = build_type.to_string(),
        }
    }

    pub fn set_invocation_id(&mut self, id: &str) {
        match self {
            Self::SlsaV02(p) => p.metadata.build_invocation_id = id.to_string(),
            Self::SlsaV1(p) => p.run_details.metadata.invocation_id = id.to_string(),
        }
    }

    /// Record where the build configuration came from. v0.2 stores the
    /// URI and digest in the invocation block; v1 composes them into
    /// the `source` external parameter.
    pub fn set_config_source(&mut self, source: &ResourceDescriptor) {
        match self {
            Self::SlsaV02(p) => {
                p.invocation.config_source.uri = source.uri.clone();
                p.invocation.config_source.digest = source.digest.clone();
            }
            Self::SlsaV1(p) => p.set_config_source(source),
        }
    }

    pub fn set_entry_point(&mut self, entry_point: &str) {
        match self {
            Self::SlsaV02(p) => p.invocation.config_source.entry_point = entry_point.to_string(),
            Self::SlsaV1(p) => {
                p.build_definition.external_parameters.insert(
                    "entryPoint".to_string(),
                    serde_json::Value::String(entry_point.to_string()),
                );
            }
        }
    }

    /// Set the builder-controlled parameters. v0.2 carries them in the
    /// invocation environment; v1 in `internalParameters`. Non-object
    /// values are accepted on v0.2 (the legacy schema is free-form) and
    /// dropped on v1.
    pub fn set_internal_parameters(&mut self, parameters: serde_json::Value) {
        match self {
            Self::SlsaV02(p) => p.invocation.environment = Some(parameters),
            Self::SlsaV1(p) => {
                if let serde_json::Value::Object(map) = parameters {
                    p.build_definition.internal_parameters = map;
                }
            }
        }
    }

    pub fn add_external_parameter(&mut self, name: &str, value: serde_json::Value) {
        match self {
            Self::SlsaV02(p) => {
                p.invocation
                    .parameters
                    .get_or_insert_with(serde_json::Map::new)
                    .insert(name.to_string(), value);
            }
            Self::SlsaV1(p) => {
                p.build_definition
                    .external_parameters
                    .insert(name.to_string(), value);
            }
        }
    }

    /// Replace the full dependency list.
    pub fn set_resolved_dependencies(&mut self, dependencies: Vec<ResourceDescriptor>) {
        match self {
            Self::SlsaV02(p) => {
                p.materials = dependencies.iter().map(Material::from).collect();
            }
            Self::SlsaV1(p) => p.build_definition.resolved_dependencies = dependencies,
        }
    }

    /// Add one dependency, upserting by URI on both generations.
    pub fn add_dependency(&mut self, dependency: ResourceDescriptor) {
        match self {
            Self::SlsaV02(p) => p.add_material(Material::from(&dependency)),
            Self::SlsaV1(p) => p.add_dependency(dependency),
        }
    }

    /// Record the resolved build configuration. Deprecated in v1: the
    /// call is accepted and the value dropped.
    pub fn set_build_config(&mut self, config: serde_json::Value) {
        match self {
            Self::SlsaV02(p) => p.build_config = Some(config),
            Self::SlsaV1(_) => {}
        }
    }

    pub fn set_started_on(&mut self, instant: Option<DateTime<Utc>>) {
        match self {
            Self::SlsaV02(p) => p.metadata.build_started_on = instant,
            Self::SlsaV1(p) => p.run_details.metadata.started_on = instant,
        }
    }

    pub fn set_finished_on(&mut self, instant: Option<DateTime<Utc>>) {
        match self {
            Self::SlsaV02(p) => p.metadata.build_finished_on = instant,
            Self::SlsaV1(p) => p.run_details.metadata.finished_on = instant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        assert_eq!("0.2".parse::<SlsaVersion>().unwrap(), SlsaVersion::V02);
        assert_eq!("1".parse::<SlsaVersion>().unwrap(), SlsaVersion::V1);
        assert_eq!("1.0".parse::<SlsaVersion>().unwrap(), SlsaVersion::V1);
        assert!("2".parse::<SlsaVersion>().is_err());
    }

    #[test]
    fn test_build_config_dropped_on_v1() {
        let mut v1 = Predicate::new(SlsaVersion::V1);
        v1.set_build_config(serde_json::json!({"steps": []}));
        let json = serde_json::to_string(&v1).unwrap();
        assert!(!json.contains("steps"));

        let mut v02 = Predicate::new(SlsaVersion::V02);
        v02.set_build_config(serde_json::json!({"steps": []}));
        let json = serde_json::to_string(&v02).unwrap();
        assert!(json.contains("\"buildConfig\":{\"steps\":[]}"));
    }

    #[test]
    fn test_setters_land_in_version_specific_fields() {
        for version in [SlsaVersion::V02, SlsaVersion::V1] {
            let mut predicate = Predicate::new(version);
            predicate.set_builder_id("https://builder.example/@v1");
            predicate.set_build_type("https://example.com/build@v1");
            predicate.set_invocation_id("inv-1");
            predicate.set_entry_point("ci.yaml");
            predicate.set_started_on(Some("2024-03-01T00:00:00Z".parse().unwrap()));

            let json = serde_json::to_value(&predicate).unwrap();
            match version {
                SlsaVersion::V02 => {
                    assert_eq!(json["builder"]["id"], "https://builder.example/@v1");
                    assert_eq!(json["invocation"]["configSource"]["entryPoint"], "ci.yaml");
                    assert_eq!(json["metadata"]["buildInvocationID"], "inv-1");
                }
                SlsaVersion::V1 => {
                    assert_eq!(
                        json["runDetails"]["builder"]["id"],
                        "https://builder.example/@v1"
                    );
                    assert_eq!(
                        json["buildDefinition"]["externalParameters"]["entryPoint"],
                        "ci.yaml"
                    );
                    assert_eq!(json["runDetails"]["metadata"]["invocationId"], "inv-1");
                }
            }
        }
    }

    #[test]
    fn test_convert_v02_to_v1_copies_semantics() {
        let mut old = Predicate::new(SlsaVersion::V02);
        old.set_builder_id("https://builder.example");
        old.set_config_source(&ResourceDescriptor {
            uri: "git+https://example.com/repo".into(),
            digest: DigestSet::from([("sha1".into(), "abc".into())]),
            download_location: None,
        });
        old.set_entry_point("build.yaml");
        old.add_dependency(ResourceDescriptor::new("https://example.com/dep"));

        let converted = old.convert(SlsaVersion::V1);
        let json = serde_json::to_value(&converted).unwrap();
        assert_eq!(json["runDetails"]["builder"]["id"], "https://builder.example");
        assert_eq!(
            json["buildDefinition"]["externalParameters"]["source"],
            "git+https://example.com/repo@abc"
        );
        assert_eq!(
            json["buildDefinition"]["resolvedDependencies"][0]["uri"],
            "https://example.com/dep"
        );
    }

    #[test]
    fn test_convert_round_trip_preserves_dependencies() {
        let mut original = Predicate::new(SlsaVersion::V1);
        original.set_builder_id("b");
        original.add_dependency(ResourceDescriptor::new("https://example.com/a"));
        original.add_dependency(ResourceDescriptor::new("https://example.com/b"));

        let back = original
            .clone()
            .convert(SlsaVersion::V02)
            .convert(SlsaVersion::V1);
        let json = serde_json::to_value(&back).unwrap();
        assert_eq!(
            json["buildDefinition"]["resolvedDependencies"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
    }
}
