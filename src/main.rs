//! provwatch CLI
//!
//! Entry point for the `provwatch` command-line tool. Two verbs make
//! up the two-phase flow: `start attestation` writes a partial
//! attestation plus pre-build snapshots, `attest` watches the run and
//! completes the document.

use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use provwatch::attestation::sign::sign_statement;
use provwatch::{
    gcp, git, CancellationToken, DigestSet, Predicate, ResourceDescriptor, SlsaVersion, Statement,
    Watcher,
};

#[derive(Parser)]
#[command(name = "provwatch")]
#[command(about = "Observe remote builds and emit SLSA provenance attestations", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a partial document before a build launches
    Start {
        #[command(subcommand)]
        noun: StartCommands,
    },

    /// Attest to a build system run
    Attest(AttestArgs),
}

#[derive(Subcommand)]
enum StartCommands {
    /// Write a partial attestation and pre-build storage snapshots
    Attestation(StartArgs),
}

#[derive(Args)]
struct StartArgs {
    /// Run spec URL (e.g. gcb://project/build-id)
    spec_url: String,

    /// Storage URL to monitor for artifacts (repeatable)
    #[arg(long = "artifacts")]
    artifacts: Vec<String>,

    /// Write the partial attestation here instead of stdout
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Snapshot state path (default: output with a .storage-snap.json suffix)
    #[arg(long)]
    snapshots: Option<PathBuf>,

    /// Source repository URL (probed from --repo-path when omitted)
    #[arg(long = "vcs-url")]
    vcs_url: Option<String>,

    /// Path to the source checkout to probe for a VCS URL
    #[arg(long = "repo-path", default_value = ".")]
    repo_path: PathBuf,

    /// Builder identity recorded in the predicate
    #[arg(long = "builder-id")]
    builder_id: Option<String>,

    /// Config source URI recorded in the predicate
    #[arg(long = "config-source")]
    config_source: Option<String>,

    /// Config source digest as algo:value
    #[arg(long = "config-digest")]
    config_digest: Option<String>,

    /// Build entry point recorded in the predicate
    #[arg(long = "entry-point")]
    entry_point: Option<String>,

    /// Pub/Sub project to hand the start payload to
    #[arg(long = "pubsub-project", requires = "pubsub_topic")]
    pubsub_project: Option<String>,

    /// Pub/Sub topic to hand the start payload to
    #[arg(long = "pubsub-topic", requires = "pubsub_project")]
    pubsub_topic: Option<String>,
}

#[derive(Args)]
struct AttestArgs {
    /// Run spec URL (e.g. github://github.com/org/repo/run-id)
    spec_url: String,

    /// Storage URL to monitor for artifacts (repeatable)
    #[arg(long = "artifacts")]
    artifacts: Vec<String>,

    /// Dependency URI to record in the predicate (repeatable)
    #[arg(long = "dependency")]
    dependencies: Vec<String>,

    /// Path to a previously started attestation to continue
    #[arg(long = "continue", conflicts_with = "encoded_attestation")]
    continue_path: Option<PathBuf>,

    /// Base64 of a previously started attestation
    #[arg(long = "encoded-attestation", hide = true)]
    encoded_attestation: Option<String>,

    /// Base64 of the snapshot state saved by the start phase
    #[arg(long = "encoded-snapshots", hide = true, conflicts_with = "snapshots")]
    encoded_snapshots: Option<String>,

    /// Wait for a still-running build to finish
    #[arg(long, default_value_t = true, num_args = 0..=1,
          default_missing_value = "true", action = ArgAction::Set)]
    wait: bool,

    /// Wrap the statement in a signed DSSE envelope
    #[arg(long, requires = "key")]
    sign: bool,

    /// Ed25519 signing key (32 raw bytes or 64 hex chars)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Write the attestation here instead of stdout
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Snapshot state path saved by the start phase
    #[arg(long)]
    snapshots: Option<PathBuf>,

    /// SLSA predicate generation to emit
    #[arg(long, default_value = "0.2", value_parser = ["0.2", "1", "1.0"])]
    slsa: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Start {
            noun: StartCommands::Attestation(args),
        } => run_start(args),
        Commands::Attest(args) => run_attest(args),
    };

    if let Err(error) = result {
        eprintln!("Error: {}", error_chain(error.as_ref()));
        process::exit(1);
    }
}

/// Join an error with its causes into one line.
fn error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Snapshot state path derived from the output file: a trailing
/// `.json` becomes `.storage-snap.json`, anything else gets the suffix
/// appended.
fn derive_snapshot_path(output: &Path) -> PathBuf {
    let text = output.to_string_lossy();
    match text.strip_suffix(".json") {
        Some(stem) => PathBuf::from(format!("{stem}.storage-snap.json")),
        None => PathBuf::from(format!("{text}.storage-snap.json")),
    }
}

/// Emit attestation bytes to the output file, or stdout when no file
/// was requested. The file is created only here, after assembly.
fn emit(output: Option<&Path>, data: &[u8]) -> Result<(), Box<dyn Error>> {
    match output {
        Some(path) => {
            fs::write(path, data)?;
            eprintln!("Wrote: {}", path.display());
        }
        None => {
            std::io::stdout().write_all(data)?;
        }
    }
    Ok(())
}

fn run_start(args: StartArgs) -> Result<(), Box<dyn Error>> {
    // The partial document is always written at 0.2 so any completer
    // can read it; `attest --slsa 1` converts it when finishing.
    let mut watcher = Watcher::new(&args.spec_url)?;
    watcher.options.slsa_version = SlsaVersion::V02;

    for uri in &args.artifacts {
        watcher.add_artifact_source(uri)?;
    }

    eprintln!("Snapshotting {} artifact source(s)...", args.artifacts.len());
    watcher.snap()?;

    let state_path = args
        .snapshots
        .clone()
        .or_else(|| args.output.as_deref().map(derive_snapshot_path));
    if let Some(path) = &state_path {
        watcher.save_snapshots(path)?;
    }

    let mut predicate = Predicate::new(SlsaVersion::V02);
    if let Some(id) = &args.builder_id {
        predicate.set_builder_id(id);
    }
    if let Some(entry_point) = &args.entry_point {
        predicate.set_entry_point(entry_point);
    }
    if let Some(source) = &args.config_source {
        let mut descriptor = ResourceDescriptor::new(source);
        if let Some(digest) = &args.config_digest {
            if let Some((algo, value)) = digest.split_once(':') {
                descriptor
                    .digest
                    .insert(algo.to_lowercase(), value.to_string());
            }
        }
        predicate.set_config_source(&descriptor);
    }

    let vcs_url = match &args.vcs_url {
        Some(url) => Some(url.clone()),
        None => git::probe_vcs_url(&args.repo_path)?,
    };
    if let Some(vcs_url) = vcs_url {
        let mut material = ResourceDescriptor::new(&vcs_url);
        // Split on the last `@` so ssh-style remotes keep their
        // user@host intact.
        if let Some((uri, sha)) = vcs_url.rsplit_once('@') {
            material.uri = uri.to_string();
            material.digest = DigestSet::from([("sha1".to_string(), sha.to_string())]);
        }
        predicate.add_dependency(material);
    }

    let statement = Statement::new(predicate);
    let json = statement.to_json()?;
    emit(args.output.as_deref(), &json)?;

    if let (Some(project), Some(topic)) = (&args.pubsub_project, &args.pubsub_topic) {
        let snapshots_b64 = match &state_path {
            Some(path) if path.exists() => BASE64.encode(fs::read(path)?),
            _ => String::new(),
        };
        let payload = serde_json::json!({
            "specURL": args.spec_url,
            "attestation": BASE64.encode(&json),
            "snapshots": snapshots_b64,
            "artifacts": watcher.store_specs(),
        });
        gcp::publish(project, topic, payload.to_string().as_bytes())?;
        eprintln!("Published start payload to projects/{project}/topics/{topic}");
    }

    Ok(())
}

fn run_attest(args: AttestArgs) -> Result<(), Box<dyn Error>> {
    let version: SlsaVersion = args.slsa.parse()?;

    let mut watcher = Watcher::new(&args.spec_url)?;
    watcher.options.slsa_version = version;
    watcher.options.wait_for_build = args.wait;
    watcher.builder.dependency_uris = args.dependencies.clone();

    for uri in &args.artifacts {
        watcher.add_artifact_source(uri)?;
    }

    eprintln!("Fetching run {}...", args.spec_url);
    let mut run = watcher.get_run()?;

    let cancel = CancellationToken::new();
    watcher.watch(&mut run, &cancel)?;

    // Encoded inputs land in scoped temp files and flow through the
    // same paths as their on-disk equivalents.
    let mut scratch_files: Vec<tempfile::NamedTempFile> = Vec::new();
    let mut continue_path = args.continue_path.clone();
    let mut snapshots_path = args.snapshots.clone();

    if let Some(encoded) = &args.encoded_attestation {
        let mut scratch = tempfile::NamedTempFile::new()?;
        scratch.write_all(&BASE64.decode(encoded.trim())?)?;
        continue_path = Some(scratch.path().to_path_buf());
        scratch_files.push(scratch);
    }
    if let Some(encoded) = &args.encoded_snapshots {
        let mut scratch = tempfile::NamedTempFile::new()?;
        scratch.write_all(&BASE64.decode(encoded.trim())?)?;
        snapshots_path = Some(scratch.path().to_path_buf());
        scratch_files.push(scratch);
    }

    if let Some(path) = &continue_path {
        watcher.load_attestation(path)?;
    }
    if let Some(path) = &snapshots_path {
        if path.exists() {
            watcher.load_snapshots(path)?;
        }
    }

    watcher.collect_artifacts(&mut run)?;
    eprintln!("Run produced {} artifact(s)", run.artifacts.len());

    let statement = watcher.attest_run(&run)?;
    let json = statement.to_json()?;

    let output_bytes = match (args.sign, args.key.as_deref()) {
        (true, Some(key)) => sign_statement(&json, key)?.to_json()?,
        (true, None) => return Err("signing requested but no --key was provided".into()),
        (false, _) => json,
    };

    emit(args.output.as_deref(), &output_bytes)?;
    drop(scratch_files);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_snapshot_path() {
        assert_eq!(
            derive_snapshot_path(Path::new("attestation.json")),
            PathBuf::from("attestation.storage-snap.json")
        );
        assert_eq!(
            derive_snapshot_path(Path::new("out/provenance")),
            PathBuf::from("out/provenance.storage-snap.json")
        );
    }

    #[test]
    fn test_cli_parses_attest_flags() {
        let cli = Cli::parse_from([
            "provwatch",
            "attest",
            "github://github.com/org/repo/123",
            "--artifacts",
            "gs://bucket/out/",
            "--dependency",
            "git+https://github.com/org/dep@0123456789abcdef0123456789abcdef01234567",
            "--wait=false",
            "--slsa",
            "1.0",
        ]);
        let Commands::Attest(args) = cli.command else {
            panic!("expected attest command");
        };
        assert_eq!(args.spec_url, "github://github.com/org/repo/123");
        assert_eq!(args.artifacts.len(), 1);
        assert_eq!(args.dependencies.len(), 1);
        assert!(!args.wait);
        assert_eq!(args.slsa, "1.0");
    }

    #[test]
    fn test_cli_rejects_unknown_slsa_version() {
        assert!(Cli::try_parse_from([
            "provwatch",
            "attest",
            "gcb://p/b",
            "--slsa",
            "3",
        ])
        .is_err());
    }

    #[test]
    fn test_cli_sign_requires_key() {
        assert!(Cli::try_parse_from(["provwatch", "attest", "gcb://p/b", "--sign"]).is_err());
        assert!(Cli::try_parse_from([
            "provwatch",
            "attest",
            "gcb://p/b",
            "--sign",
            "--key",
            "/tmp/key"
        ])
        .is_ok());
    }
}
