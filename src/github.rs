//! GitHub REST helper
//!
//! One thin client shared by the workflow build driver and the
//! actions/release storage drivers. Requests carry the GitHub media
//! type and, when `GITHUB_TOKEN` is set, a token authorization header;
//! without a token requests go out unauthenticated with a warning.

use std::env;
use std::io::{self, Write};

use reqwest::blocking::{Client, Response};
use thiserror::Error;
use tracing::{debug, warn};

/// REST endpoint all drivers talk to.
pub const API_BASE: &str = "https://api.github.com";

const ACCEPT_HEADER: &str = "application/vnd.github+json";
const USER_AGENT: &str = concat!("provwatch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("executing request to {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("GitHub API returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("decoding GitHub API response: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("writing downloaded data: {0}")]
    Io(#[from] io::Error),
}

/// Authenticated (when possible) GitHub API client.
pub struct GitHubClient {
    http: Client,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new() -> Self {
        let token = env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        if token.is_none() {
            warn!("making unauthenticated requests to github");
        }
        Self {
            http: Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .expect("building http client with static configuration"),
            token,
        }
    }

    /// Perform a GET against the API, failing on any non-2xx status.
    pub fn get(&self, url: &str) -> Result<Response, GitHubError> {
        debug!(url, "GHAPI[GET]");
        let mut request = self.http.get(url).header("Accept", ACCEPT_HEADER);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {token}"));
        }
        let response = request.send().map_err(|source| GitHubError::Request {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GitHubError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    /// GET a JSON document from the API.
    pub fn get_json(&self, url: &str) -> Result<serde_json::Value, GitHubError> {
        self.get(url)?.json().map_err(GitHubError::Decode)
    }

    /// Stream a download (release asset, artifact archive) into `out`,
    /// returning the byte count. Redirects are followed.
    pub fn download(&self, url: &str, out: &mut impl Write) -> Result<u64, GitHubError> {
        let mut response = self.get(url)?;
        let bytes = response.copy_to(out).map_err(|source| GitHubError::Request {
            url: url.to_string(),
            source,
        })?;
        debug!(url, bytes, "downloaded");
        Ok(bytes)
    }
}

impl Default for GitHubClient {
    fn default() -> Self {
        Self::new()
    }
}
