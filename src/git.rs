//! Working-tree VCS probe
//!
//! The start phase records where the source being built came from. All
//! it needs is the `origin` remote URL and the current HEAD commit, so
//! the probe reads the two files that hold them instead of pulling in
//! a full git implementation. A directory that is not a repository
//! probes to `None`.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("reading repository metadata: {0}")]
    Io(#[from] io::Error),
}

/// Probe `dir` for its origin URL and HEAD commit, composed as
/// `url@sha` (or just `url` when HEAD cannot be resolved).
pub fn probe_vcs_url(dir: &Path) -> Result<Option<String>, GitError> {
    let git_dir = dir.join(".git");
    if !git_dir.is_dir() {
        debug!(dir = %dir.display(), "directory is not a git repository");
        return Ok(None);
    }

    let Some(url) = remote_origin_url(&git_dir)? else {
        debug!(dir = %dir.display(), "repository has no origin remote");
        return Ok(None);
    };

    Ok(Some(match head_commit(&git_dir)? {
        Some(sha) => format!("{url}@{sha}"),
        None => url,
    }))
}

/// `url` value of the `[remote "origin"]` section of `.git/config`.
fn remote_origin_url(git_dir: &Path) -> Result<Option<String>, GitError> {
    let config = fs::read_to_string(git_dir.join("config"))?;

    let mut in_origin = false;
    for line in config.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_origin = line == "[remote \"origin\"]";
            continue;
        }
        if !in_origin {
            continue;
        }
        if let Some(value) = line.strip_prefix("url") {
            if let Some((_, url)) = value.split_once('=') {
                return Ok(Some(url.trim().to_string()));
            }
        }
    }
    Ok(None)
}

/// Resolve HEAD to a commit sha, following one level of symbolic ref
/// through loose refs or packed-refs.
fn head_commit(git_dir: &Path) -> Result<Option<String>, GitError> {
    let head = fs::read_to_string(git_dir.join("HEAD"))?;
    let head = head.trim();

    let Some(reference) = head.strip_prefix("ref: ") else {
        // Detached HEAD holds the commit itself.
        return Ok(Some(head.to_string()));
    };

    let loose = git_dir.join(reference);
    if loose.is_file() {
        return Ok(Some(fs::read_to_string(loose)?.trim().to_string()));
    }

    let packed = git_dir.join("packed-refs");
    if packed.is_file() {
        for line in fs::read_to_string(packed)?.lines() {
            if line.starts_with('#') || line.starts_with('^') {
                continue;
            }
            if let Some((sha, name)) = line.split_once(' ') {
                if name.trim() == reference {
                    return Ok(Some(sha.to_string()));
                }
            }
        }
    }

    Ok(None)
}
