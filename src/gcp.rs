//! Google Cloud REST clients
//!
//! Cloud Storage, Cloud Build, and Pub/Sub are driven over their JSON
//! APIs with one blocking client each. Authentication is a bearer
//! token from `GOOGLE_OAUTH_ACCESS_TOKEN`; without one, requests go
//! out anonymous, which is sufficient for public objects.

use std::env;
use std::io::{self, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

const STORAGE_BASE: &str = "https://storage.googleapis.com/storage/v1";
const CLOUDBUILD_BASE: &str = "https://cloudbuild.googleapis.com/v1";
const PUBSUB_BASE: &str = "https://pubsub.googleapis.com/v1";
const USER_AGENT: &str = concat!("provwatch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum GcpError {
    #[error("executing request to {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("API returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("decoding API response: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("parsing object URL {0}: {1}")]
    ObjectUrl(String, String),

    #[error("writing downloaded data: {0}")]
    Io(#[from] io::Error),
}

fn bearer_token() -> Option<String> {
    env::var("GOOGLE_OAUTH_ACCESS_TOKEN")
        .ok()
        .filter(|t| !t.is_empty())
}

fn send_checked(request: RequestBuilder, url: &str) -> Result<Response, GcpError> {
    let response = request.send().map_err(|source| GcpError::Request {
        url: url.to_string(),
        source,
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(GcpError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(response)
}

/// Split a `gs://bucket/path` URL into bucket and object path.
pub fn parse_gs_url(object_url: &str) -> Result<(String, String), GcpError> {
    let url = Url::parse(object_url)
        .map_err(|e| GcpError::ObjectUrl(object_url.to_string(), e.to_string()))?;
    if url.scheme() != "gs" {
        return Err(GcpError::ObjectUrl(
            object_url.to_string(),
            "not a cloud storage URL".to_string(),
        ));
    }
    let bucket = url
        .host_str()
        .ok_or_else(|| {
            GcpError::ObjectUrl(object_url.to_string(), "missing bucket".to_string())
        })?
        .to_string();
    Ok((bucket, url.path().trim_start_matches('/').to_string()))
}

fn encode_object_name(name: &str) -> String {
    percent_encoding::utf8_percent_encode(name, percent_encoding::NON_ALPHANUMERIC).to_string()
}

/// Attributes of one stored object, as returned by the objects API.
#[derive(Debug, Clone, Deserialize)]
pub struct GcsObject {
    pub name: String,

    #[serde(default)]
    pub size: Option<String>,

    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,

    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl GcsObject {
    pub fn size_bytes(&self) -> u64 {
        self.size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

/// Cloud Storage JSON API client.
pub struct GcsClient {
    http: Client,
    token: Option<String>,
}

impl GcsClient {
    pub fn new() -> Self {
        Self {
            http: Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .expect("building http client with static configuration"),
            token: bearer_token(),
        }
    }

    fn get(&self, url: &str) -> Result<Response, GcpError> {
        debug!(url, "GCS[GET]");
        let mut request = self.http.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        send_checked(request, url)
    }

    /// List every object under `prefix`, following result pages.
    pub fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<GcsObject>, GcpError> {
        #[derive(Deserialize)]
        struct Listing {
            #[serde(default)]
            items: Vec<GcsObject>,
            #[serde(rename = "nextPageToken", default)]
            next_page_token: Option<String>,
        }

        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = format!(
                "{STORAGE_BASE}/b/{bucket}/o?prefix={}",
                encode_object_name(prefix)
            );
            if let Some(token) = &page_token {
                url.push_str("&pageToken=");
                url.push_str(token);
            }
            let listing: Listing = self.get(&url)?.json().map_err(GcpError::Decode)?;
            objects.extend(listing.items);
            match listing.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(objects)
    }

    /// Read one object's metadata.
    pub fn object_attrs(&self, object_url: &str) -> Result<GcsObject, GcpError> {
        let (bucket, path) = parse_gs_url(object_url)?;
        let url = format!("{STORAGE_BASE}/b/{bucket}/o/{}", encode_object_name(&path));
        self.get(&url)?.json().map_err(GcpError::Decode)
    }

    /// Download one object (`gs://bucket/path`) into `out`.
    pub fn download_object(&self, object_url: &str, out: &mut impl Write) -> Result<u64, GcpError> {
        let (bucket, path) = parse_gs_url(object_url)?;
        let url = format!(
            "{STORAGE_BASE}/b/{bucket}/o/{}?alt=media",
            encode_object_name(&path)
        );
        let mut response = self.get(&url)?;
        let bytes = response.copy_to(out).map_err(|source| GcpError::Request {
            url: url.clone(),
            source,
        })?;
        debug!(object_url, bytes, "downloaded object");
        Ok(bytes)
    }
}

impl Default for GcsClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloud Build API client.
pub struct CloudBuildClient {
    http: Client,
    token: Option<String>,
}

impl CloudBuildClient {
    pub fn new() -> Self {
        Self {
            http: Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .expect("building http client with static configuration"),
            token: bearer_token(),
        }
    }

    fn get_json(&self, url: &str) -> Result<serde_json::Value, GcpError> {
        debug!(url, "CLOUDBUILD[GET]");
        let mut request = self.http.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        send_checked(request, url)?.json().map_err(GcpError::Decode)
    }

    /// Fetch one build record.
    pub fn get_build(&self, project: &str, build_id: &str) -> Result<serde_json::Value, GcpError> {
        self.get_json(&format!(
            "{CLOUDBUILD_BASE}/projects/{project}/builds/{build_id}"
        ))
    }

    /// Fetch one build trigger record.
    pub fn get_trigger(
        &self,
        project: &str,
        trigger_id: &str,
    ) -> Result<serde_json::Value, GcpError> {
        self.get_json(&format!(
            "{CLOUDBUILD_BASE}/projects/{project}/triggers/{trigger_id}"
        ))
    }
}

impl Default for CloudBuildClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish one message to `projects/{project}/topics/{topic}`. The
/// client lives for the duration of the call only.
pub fn publish(project: &str, topic: &str, data: &[u8]) -> Result<(), GcpError> {
    let url = format!("{PUBSUB_BASE}/projects/{project}/topics/{topic}:publish");
    debug!(url, bytes = data.len(), "PUBSUB[PUBLISH]");

    let http = Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .expect("building http client with static configuration");
    let body = serde_json::json!({
        "messages": [{ "data": BASE64.encode(data) }]
    });

    let mut request = http.post(&url).json(&body);
    if let Some(token) = bearer_token() {
        request = request.bearer_auth(token);
    }
    send_checked(request, &url)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gs_url() {
        let (bucket, path) = parse_gs_url("gs://my-bucket/artifacts/out.bin").unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(path, "artifacts/out.bin");
    }

    #[test]
    fn test_parse_gs_url_rejects_other_schemes() {
        assert!(parse_gs_url("https://example.com/x").is_err());
    }

    #[test]
    fn test_encode_object_name_escapes_slashes() {
        assert_eq!(encode_object_name("a/b c"), "a%2Fb%20c");
    }

    #[test]
    fn test_object_size_parses_string_field() {
        let object: GcsObject =
            serde_json::from_str(r#"{"name":"x","size":"1024"}"#).unwrap();
        assert_eq!(object.size_bytes(), 1024);
        assert!(object.updated.is_none());
    }
}
