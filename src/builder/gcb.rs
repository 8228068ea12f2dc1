//! Cloud Build driver (`gcb://project/build-id`)
//!
//! Normalizes a Cloud Build job into a [`Run`]: substitutions become
//! parameters, build steps carry their image and timing, and the
//! status table maps onto the success/running pair. When the build was
//! started by a trigger, the triggers API is consulted to recover the
//! canonical repository URL; that lookup is best-effort.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::attestation::{DigestSet, Predicate, ResourceDescriptor, SlsaVersion};
use crate::gcp::CloudBuildClient;
use crate::run::{Run, Step};

use super::{BuildDriver, BuilderError};

/// Build type URI recorded in predicates.
pub const BUILD_TYPE: &str = "https://cloudbuild.googleapis.com/CloudBuildYaml@v1";

/// Builder identity for hosted Cloud Build workers.
pub const BUILDER_ID: &str = "https://cloudbuild.googleapis.com/GoogleHostedWorker@v1";

pub struct GcbDriver {
    spec_url: String,
    project: String,
    build_id: String,
    client: CloudBuildClient,
}

/// The slice of a Cloud Build record the driver consumes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Build {
    #[serde(default)]
    status: String,

    #[serde(default)]
    substitutions: BTreeMap<String, String>,

    #[serde(default)]
    steps: Vec<BuildStep>,

    #[serde(default)]
    start_time: String,

    #[serde(default)]
    finish_time: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildStep {
    #[serde(default)]
    name: String,

    #[serde(default)]
    args: Vec<String>,

    #[serde(default)]
    status: String,

    #[serde(default)]
    timing: StepTiming,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepTiming {
    #[serde(default)]
    start_time: String,

    #[serde(default)]
    end_time: String,
}

/// Map a Cloud Build status string onto `(is_success, is_running)`.
pub fn map_status(status: &str) -> Result<(bool, bool), BuilderError> {
    match status {
        "SUCCESS" => Ok((true, false)),
        "PENDING" | "QUEUED" | "WORKING" => Ok((false, true)),
        "FAILURE" | "INTERNAL_ERROR" | "TIMEOUT" | "CANCELLED" | "EXPIRED" => Ok((false, false)),
        other => Err(BuilderError::UnknownStatus(other.to_string())),
    }
}

/// Parse a backend timestamp, treating empty or malformed strings as
/// absent.
fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Overwrite `run` from a build record. Pure: all backend state
/// arrives as arguments, so the mapping is testable against canned
/// responses. `repo_url`, when present, is the canonical repository
/// URL recovered from the build's trigger.
pub fn apply_build(
    run: &mut Run,
    build: &serde_json::Value,
    repo_url: Option<&str>,
) -> Result<(), BuilderError> {
    let parsed: Build =
        serde_json::from_value(build.clone()).map_err(|_| BuilderError::MissingField {
            field: "build",
        })?;

    run.params = parsed
        .substitutions
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();

    run.steps = parsed
        .steps
        .iter()
        .map(|step| Step {
            command: String::new(),
            image: step.name.clone(),
            is_success: step.status == "SUCCESS",
            params: step.args.clone(),
            start_time: parse_time(&step.timing.start_time),
            end_time: parse_time(&step.timing.end_time),
            environment: BTreeMap::new(),
        })
        .collect();

    let (is_success, is_running) = map_status(&parsed.status)?;
    run.is_success = is_success;
    run.is_running = is_running;
    run.start_time = parse_time(&parsed.start_time);
    run.end_time = parse_time(&parsed.finish_time);

    let source_uri = repo_url
        .map(str::to_string)
        .or_else(|| parsed.substitutions.get("REPO_NAME").cloned());
    if let (Some(uri), Some(sha)) = (source_uri, parsed.substitutions.get("COMMIT_SHA")) {
        run.build_point = Some(ResourceDescriptor {
            uri,
            digest: DigestSet::from([("sha1".to_string(), sha.clone())]),
            download_location: None,
        });
    }

    run.system_data = Some(build.clone());
    Ok(())
}

impl GcbDriver {
    pub fn new(spec_url: &str) -> Result<Self, BuilderError> {
        let url = url::Url::parse(spec_url)
            .map_err(|e| BuilderError::parse(spec_url, e.to_string()))?;
        let project = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| BuilderError::parse(spec_url, "missing project"))?
            .to_string();
        let build_id = percent_encoding::percent_decode_str(url.path())
            .decode_utf8_lossy()
            .trim_matches('/')
            .to_string();
        if build_id.is_empty() {
            return Err(BuilderError::parse(spec_url, "missing build id"));
        }
        Ok(Self {
            spec_url: spec_url.to_string(),
            project,
            build_id,
            client: CloudBuildClient::new(),
        })
    }

    /// Recover the canonical repository URL from the build's trigger.
    /// Failure here only costs the enrichment.
    fn trigger_repo_url(&self, build: &serde_json::Value) -> Option<String> {
        let trigger_id = build.get("buildTriggerId")?.as_str().filter(|s| !s.is_empty())?;
        match self.client.get_trigger(&self.project, trigger_id) {
            Ok(trigger) => {
                let github = trigger.get("github")?;
                let owner = github.get("owner")?.as_str()?;
                let name = github.get("name")?.as_str()?;
                Some(format!("https://github.com/{owner}/{name}"))
            }
            Err(error) => {
                warn!(trigger_id, %error, "unable to read build trigger, skipping repo enrichment");
                None
            }
        }
    }
}

impl BuildDriver for GcbDriver {
    fn get_run(&self) -> Result<Run, BuilderError> {
        let mut run = Run::new(&self.spec_url);
        self.refresh_run(&mut run)?;
        Ok(run)
    }

    fn refresh_run(&self, run: &mut Run) -> Result<(), BuilderError> {
        let build = self.client.get_build(&self.project, &self.build_id)?;
        debug!(build_id = %self.build_id, "refreshed cloud build record");
        let repo_url = self.trigger_repo_url(&build);
        apply_build(run, &build, repo_url.as_deref())
    }

    fn build_predicate(
        &self,
        run: &Run,
        draft: Option<Predicate>,
        version: SlsaVersion,
    ) -> Result<Predicate, BuilderError> {
        let system_data = run
            .system_data
            .as_ref()
            .ok_or(BuilderError::MissingSystemData)?;
        let build: Build = serde_json::from_value(system_data.clone())
            .map_err(|_| BuilderError::MissingField { field: "build" })?;

        let mut predicate = draft.unwrap_or_else(|| Predicate::new(version));
        predicate.set_builder_id(BUILDER_ID);
        predicate.set_build_type(BUILD_TYPE);
        predicate.set_invocation_id(&self.build_id);
        predicate.set_started_on(run.start_time);
        predicate.set_finished_on(run.end_time);

        if let Some(point) = &run.build_point {
            predicate.set_config_source(point);
        }
        if let Some(entry_point) = build.substitutions.get("TRIGGER_BUILD_CONFIG_PATH") {
            if !entry_point.is_empty() {
                predicate.set_entry_point(entry_point);
            }
        }

        if !build.substitutions.is_empty() {
            predicate.add_external_parameter(
                "substitutions",
                serde_json::to_value(&build.substitutions)
                    .map_err(|_| BuilderError::MissingField { field: "substitutions" })?,
            );
        }

        let steps: Vec<serde_json::Value> = build
            .steps
            .iter()
            .map(|step| {
                serde_json::json!({
                    "image": step.name,
                    "arguments": step.args,
                })
            })
            .collect();
        predicate.set_build_config(serde_json::json!({ "steps": steps }));

        Ok(predicate)
    }

    fn artifact_stores(&self) -> Vec<String> {
        vec![format!("gcb://{}/{}", self.project, self.build_id)]
    }
}
