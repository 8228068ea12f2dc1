//! GitHub Actions workflow driver (`github://host/owner/repo/run-id`)
//!
//! Normalizes one workflow run into a [`Run`]. The two predicate
//! generations use different build-type URIs and parameter shapes: the
//! v0.2 rendering keeps the legacy environment layout (including the
//! `context.github.run_id` entry downstream consumers key on), while
//! v1 records the workflow as an external parameter and the hosted
//! runner facts as internal parameters.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::attestation::{DigestSet, Predicate, ResourceDescriptor, SlsaVersion};
use crate::github::{GitHubClient, API_BASE};
use crate::run::Run;

use super::{BuildDriver, BuilderError};

/// Build type URI recorded in v0.2 predicates.
pub const BUILD_TYPE_V02: &str = "https://github.com/Attestations/GitHubActionsWorkflow@v1";

/// Build type URI recorded in v1 predicates.
pub const BUILD_TYPE_V1: &str = "https://actions.github.io/buildtypes/workflow/v1";

/// Builder identity for hosted runners.
pub const BUILDER_ID: &str = "https://github.com/Attestations/GitHubHostedActions@v1";

pub struct GithubDriver {
    spec_url: String,
    host: String,
    owner: String,
    repository: String,
    run_id: u64,
    client: GitHubClient,
}

/// The slice of a workflow-run record the driver consumes.
#[derive(Debug, Clone, Default, Deserialize)]
struct WorkflowRun {
    #[serde(default)]
    status: String,

    #[serde(default)]
    conclusion: Option<String>,

    #[serde(default)]
    head_sha: String,

    #[serde(default)]
    path: String,

    #[serde(default)]
    event: String,

    #[serde(default)]
    created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    run_started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    repository: Option<WorkflowRepository>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WorkflowRepository {
    #[serde(default)]
    id: u64,

    #[serde(default)]
    owner: Option<WorkflowRepositoryOwner>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WorkflowRepositoryOwner {
    #[serde(default)]
    id: u64,
}

/// Overwrite `run` from a workflow-run record. Pure, so the status
/// mapping and build point are testable against canned responses.
pub fn apply_run_data(
    run: &mut Run,
    host: &str,
    owner: &str,
    repository: &str,
    data: &serde_json::Value,
) -> Result<(), BuilderError> {
    let parsed: WorkflowRun =
        serde_json::from_value(data.clone()).map_err(|_| BuilderError::MissingField {
            field: "workflow run",
        })?;

    run.is_running = parsed.status != "completed";
    match parsed.conclusion.as_deref() {
        Some("success") => run.is_success = true,
        Some("failure") | Some("cancelled") => run.is_success = false,
        _ => {}
    }

    run.start_time = parsed.run_started_at.or(parsed.created_at);
    run.end_time = parsed.updated_at;

    if !parsed.head_sha.is_empty() {
        run.build_point = Some(ResourceDescriptor {
            uri: format!(
                "git+ssh://{host}/{owner}/{repository}@{}",
                parsed.head_sha
            ),
            digest: DigestSet::from([("sha1".to_string(), parsed.head_sha.clone())]),
            download_location: None,
        });
    }

    run.system_data = Some(data.clone());
    Ok(())
}

impl GithubDriver {
    pub fn new(spec_url: &str) -> Result<Self, BuilderError> {
        let url = url::Url::parse(spec_url)
            .map_err(|e| BuilderError::parse(spec_url, e.to_string()))?;
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| BuilderError::parse(spec_url, "missing host"))?
            .to_string();

        let path = percent_encoding::percent_decode_str(url.path()).decode_utf8_lossy();
        let path = path.trim_matches('/');
        let parts: Vec<&str> = path.split('/').collect();
        let [owner, repository, run_id] = parts.as_slice() else {
            return Err(BuilderError::parse(
                spec_url,
                "expected github://host/owner/repo/run-id",
            ));
        };
        let run_id = run_id
            .parse()
            .map_err(|_| BuilderError::parse(spec_url, "parsing run ID from URL"))?;

        Ok(Self {
            spec_url: spec_url.to_string(),
            host,
            owner: owner.to_string(),
            repository: repository.to_string(),
            run_id,
            client: GitHubClient::new(),
        })
    }

    fn run_url(&self) -> String {
        format!(
            "{API_BASE}/repos/{}/{}/actions/runs/{}",
            self.owner, self.repository, self.run_id
        )
    }
}

impl BuildDriver for GithubDriver {
    fn get_run(&self) -> Result<Run, BuilderError> {
        let mut run = Run::new(&self.spec_url);
        self.refresh_run(&mut run)?;
        Ok(run)
    }

    fn refresh_run(&self, run: &mut Run) -> Result<(), BuilderError> {
        let data = self.client.get_json(&self.run_url())?;
        debug!(run_id = self.run_id, "refreshed workflow run");
        apply_run_data(run, &self.host, &self.owner, &self.repository, &data)
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
        let workflow: WorkflowRun = serde_json::from_value(system_data.clone())
            .map_err(|_| BuilderError::MissingField { field: "workflow run" })?;

        let mut predicate = draft.unwrap_or_else(|| Predicate::new(version));
        predicate.set_builder_id(BUILDER_ID);
        predicate.set_invocation_id(&self.run_id.to_string());
        predicate.set_started_on(run.start_time);
        predicate.set_finished_on(run.end_time);
        predicate.set_config_source(&ResourceDescriptor {
            uri: format!(
                "git+https://{}/{}/{}.git",
                self.host, self.owner, self.repository
            ),
            digest: DigestSet::from([("sha1".to_string(), workflow.head_sha.clone())]),
            download_location: None,
        });
        predicate.set_entry_point(&workflow.path);

        match predicate.version() {
            SlsaVersion::V02 => {
                predicate.set_build_type(BUILD_TYPE_V02);
                predicate.set_internal_parameters(serde_json::json!({
                    "arch": "",
                    "env": {},
                    "context": {
                        "github": { "run_id": self.run_id.to_string() },
                        "runner": {}
                    }
                }));
            }
            SlsaVersion::V1 => {
                predicate.set_build_type(BUILD_TYPE_V1);
                predicate.add_external_parameter(
                    "workflow",
                    serde_json::json!({
                        "path": workflow.path,
                        "repository": format!(
                            "https://{}/{}/{}",
                            self.host, self.owner, self.repository
                        ),
                    }),
                );

                let repository_id = workflow
                    .repository
                    .as_ref()
                    .map(|r| r.id.to_string())
                    .unwrap_or_default();
                let owner_id = workflow
                    .repository
                    .as_ref()
                    .and_then(|r| r.owner.as_ref())
                    .map(|o| o.id.to_string())
                    .unwrap_or_default();
                predicate.set_internal_parameters(serde_json::json!({
                    "github": {
                        "event_name": workflow.event,
                        "repository_id": repository_id,
                        "repository_owner_id": owner_id,
                        "runner_environment": "github-hosted"
                    }
                }));
            }
        }

        Ok(predicate)
    }

    fn artifact_stores(&self) -> Vec<String> {
        vec![format!(
            "actions://{}/{}/{}/{}",
            self.host, self.owner, self.repository, self.run_id
        )]
    }
}
