//! Driver status mapping and predicate assembly against canned
//! backend responses.

use provwatch::builder::gcb::{self, GcbDriver};
use provwatch::builder::github::{self, GithubDriver};
use provwatch::builder::{self, BuildDriver, BuilderError, DependencyKind};
use provwatch::{Run, SlsaVersion, Statement, Store, StoreError};

fn gcb_build_response() -> serde_json::Value {
    serde_json::json!({
        "id": "ba067a55-6090-4080-bc1a-6d1ff944fd60",
        "status": "SUCCESS",
        "startTime": "2024-04-02T10:00:00Z",
        "finishTime": "2024-04-02T10:09:30Z",
        "substitutions": {
            "COMMIT_SHA": "abc4567890abcdef0123456789abcdef01231234",
            "REPO_NAME": "widget",
            "TRIGGER_BUILD_CONFIG_PATH": "cloudbuild.yaml"
        },
        "steps": [
            {"name": "gcr.io/cloud-builders/git", "args": ["fetch"], "status": "SUCCESS",
             "timing": {"startTime": "2024-04-02T10:00:01Z", "endTime": "2024-04-02T10:00:20Z"}},
            {"name": "gcr.io/cloud-builders/docker", "args": ["build", "-t", "img", "."],
             "status": "SUCCESS",
             "timing": {"startTime": "2024-04-02T10:00:21Z", "endTime": "2024-04-02T10:08:00Z"}},
            {"name": "gcr.io/cloud-builders/docker", "args": ["push", "img"],
             "status": "SUCCESS",
             "timing": {"startTime": "2024-04-02T10:08:01Z", "endTime": "2024-04-02T10:09:00Z"}}
        ]
    })
}

#[test]
fn container_build_success_yields_v1_predicate() {
    let spec = "gcb://proj/ba067a55-6090-4080-bc1a-6d1ff944fd60";
    let driver = GcbDriver::new(spec).unwrap();

    let mut run = Run::new(spec);
    gcb::apply_build(&mut run, &gcb_build_response(), None).unwrap();

    assert!(run.is_success);
    assert!(!run.is_running);
    assert_eq!(run.steps.len(), 3);
    assert!(run.steps.iter().all(|s| s.start_time.is_some() && s.end_time.is_some()));

    let predicate = driver.build_predicate(&run, None, SlsaVersion::V1).unwrap();
    let json = serde_json::to_value(&predicate).unwrap();

    assert_eq!(
        json["buildDefinition"]["buildType"],
        "https://cloudbuild.googleapis.com/CloudBuildYaml@v1"
    );
    // Config source composed from REPO_NAME and COMMIT_SHA.
    assert_eq!(
        json["buildDefinition"]["externalParameters"]["source"],
        "widget@abc4567890abcdef0123456789abcdef01231234"
    );
    assert_eq!(
        json["buildDefinition"]["externalParameters"]["entryPoint"],
        "cloudbuild.yaml"
    );
    assert_eq!(
        json["runDetails"]["metadata"]["invocationId"],
        "ba067a55-6090-4080-bc1a-6d1ff944fd60"
    );
    assert!(json["runDetails"]["metadata"]["startedOn"]
        .as_str()
        .unwrap()
        .starts_with("2024-04-02T10:00:00"));
}

#[test]
fn container_build_v02_predicate_keeps_build_config() {
    let spec = "gcb://proj/ba067a55-6090-4080-bc1a-6d1ff944fd60";
    let driver = GcbDriver::new(spec).unwrap();

    let mut run = Run::new(spec);
    gcb::apply_build(&mut run, &gcb_build_response(), None).unwrap();

    let predicate = driver
        .build_predicate(&run, None, SlsaVersion::V02)
        .unwrap();
    let json = serde_json::to_value(&predicate).unwrap();

    assert_eq!(json["buildConfig"]["steps"].as_array().unwrap().len(), 3);
    assert_eq!(
        json["buildConfig"]["steps"][1]["image"],
        "gcr.io/cloud-builders/docker"
    );
    assert_eq!(
        json["invocation"]["configSource"]["digest"]["sha1"],
        "abc4567890abcdef0123456789abcdef01231234"
    );
}

#[test]
fn workflow_failure_maps_to_terminal_unsuccessful_run() {
    let spec = "github://github.com/org/repo/7492361110";
    let mut run = Run::new(spec);
    github::apply_run_data(
        &mut run,
        "github.com",
        "org",
        "repo",
        &serde_json::json!({
            "id": 7492361110u64,
            "status": "completed",
            "conclusion": "failure",
            "head_sha": "9bf2a4c0aa1458cd8fdb1b4a88b6b8a17be5c9e1",
            "path": ".github/workflows/ci.yml",
            "event": "push"
        }),
    )
    .unwrap();

    assert!(!run.is_success);
    assert!(!run.is_running);
    assert_eq!(
        run.build_point.as_ref().unwrap().uri,
        "git+ssh://github.com/org/repo@9bf2a4c0aa1458cd8fdb1b4a88b6b8a17be5c9e1"
    );
    assert_eq!(
        run.build_point.as_ref().unwrap().digest["sha1"],
        "9bf2a4c0aa1458cd8fdb1b4a88b6b8a17be5c9e1"
    );
}

#[test]
fn build_predicate_twice_is_byte_identical() {
    let spec = "github://github.com/org/repo/7492361110";
    let driver = GithubDriver::new(spec).unwrap();
    let mut run = Run::new(spec);
    github::apply_run_data(
        &mut run,
        "github.com",
        "org",
        "repo",
        &serde_json::json!({
            "id": 7492361110u64,
            "status": "completed",
            "conclusion": "success",
            "head_sha": "9bf2a4c0aa1458cd8fdb1b4a88b6b8a17be5c9e1",
            "path": ".github/workflows/release.yml",
            "event": "workflow_dispatch",
            "created_at": "2024-01-09T13:00:00Z",
            "updated_at": "2024-01-09T13:30:00Z",
            "repository": {"id": 9001, "owner": {"id": 42}}
        }),
    )
    .unwrap();

    for version in [SlsaVersion::V02, SlsaVersion::V1] {
        let first = Statement::new(driver.build_predicate(&run, None, version).unwrap());
        let second = Statement::new(driver.build_predicate(&run, None, version).unwrap());
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }
}

#[test]
fn build_driver_dispatch_is_total_over_known_schemes() {
    assert!(builder::new_driver("gcb://project/build").is_ok());
    assert!(builder::new_driver("github://github.com/org/repo/1").is_ok());
    for unknown in ["jenkins://x/y", "circleci://org/pipeline", "https://github.com/org"] {
        assert!(matches!(
            builder::new_driver(unknown),
            Err(BuilderError::UnknownDriver(_))
        ));
    }
}

#[test]
fn storage_driver_dispatch_is_total_over_known_schemes() {
    let known = [
        "file:///tmp/out",
        "gs://bucket/p/",
        "oci://registry/org/image",
        "actions://github.com/org/repo/1",
        "gcb://project/build",
        "github://github.com/org/repo/v1",
        "intoto+https://example.com/att.json",
        "spdx+gs://bucket/sbom.spdx.json",
    ];
    for spec in known {
        assert!(Store::new(spec).is_ok(), "driver missing for {spec}");
    }
    assert!(matches!(
        Store::new("s3://bucket/key"),
        Err(StoreError::UnknownDriver(_))
    ));
}

#[test]
fn dependency_classification_grid() {
    let cases = [
        (
            "git+https://github.com/org/repo@0123456789abcdef0123456789abcdef01234567",
            DependencyKind::Git40,
        ),
        ("oci://reg/img@sha256:aabb", DependencyKind::DigestColon),
        ("oci://reg/img@SHA512:ccdd", DependencyKind::DigestColon),
        ("https://example.com/plain", DependencyKind::PlainUri),
        ("https://example.com/rel@v1.2.3", DependencyKind::PlainUri),
        ("uri@sha256", DependencyKind::PlainUri),
        (
            "uri@0123456789abcdef0123456789abcdef0123456g",
            DependencyKind::PlainUri,
        ),
    ];
    for (input, expected) in cases {
        assert_eq!(
            provwatch::classify_dependency(input),
            expected,
            "classifying {input}"
        );
    }
}

#[test]
fn unknown_container_build_status_is_a_semantic_error() {
    let mut run = Run::new("gcb://proj/b");
    let err = gcb::apply_build(
        &mut run,
        &serde_json::json!({"status": "STATUS_UNKNOWN"}),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, BuilderError::UnknownStatus(_)));
}
