//! Universal downloader
//!
//! The synthetic drivers (`intoto+`, `spdx+`) and the build-manifest
//! reader need to fetch single documents from a handful of schemes.
//! This is deliberately smaller than the storage registry: only `gs`,
//! `http(s)` and `file` sources are supported for single downloads.

use std::fs::File;
use std::io::{self, Write};

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::gcp::{GcpError, GcsClient};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("parsing url {0}: {1}")]
    Parse(String, String),

    #[error("scheme {0} not supported for single downloads")]
    UnsupportedScheme(String),

    #[error(transparent)]
    Gcp(#[from] GcpError),

    #[error("executing request to {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("http error when downloading {url}: HTTP {status}")]
    Status { status: u16, url: String },

    #[error("reading source data: {0}")]
    Io(#[from] io::Error),
}

/// Copy the document at `source_url` into `out`.
pub fn download_url(source_url: &str, out: &mut impl Write) -> Result<(), DownloadError> {
    let url = Url::parse(source_url)
        .map_err(|e| DownloadError::Parse(source_url.to_string(), e.to_string()))?;

    match url.scheme() {
        "gs" => {
            GcsClient::new().download_object(source_url, out)?;
            Ok(())
        }
        "http" | "https" => download_http(source_url, out),
        "file" => {
            let path = url.to_file_path().map_err(|()| {
                DownloadError::Parse(source_url.to_string(), "not a local file path".to_string())
            })?;
            let mut file = File::open(path)?;
            io::copy(&mut file, out)?;
            Ok(())
        }
        other => Err(DownloadError::UnsupportedScheme(other.to_string())),
    }
}

/// Fetch `source_url` fully into memory.
pub fn download_bytes(source_url: &str) -> Result<Vec<u8>, DownloadError> {
    let mut buffer = Vec::new();
    download_url(source_url, &mut buffer)?;
    Ok(buffer)
}

fn download_http(url: &str, out: &mut impl Write) -> Result<(), DownloadError> {
    let mut response = reqwest::blocking::get(url).map_err(|source| DownloadError::Request {
        url: url.to_string(),
        source,
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let bytes = response.copy_to(out).map_err(|source| DownloadError::Request {
        url: url.to_string(),
        source,
    })?;
    debug!(url, bytes, "downloaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_file_scheme_download() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, b"{\"ok\":true}").unwrap();

        let url = format!("file://{}", path.display());
        assert_eq!(download_bytes(&url).unwrap(), b"{\"ok\":true}");
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = download_bytes("oci://registry/image").unwrap_err();
        assert!(matches!(err, DownloadError::UnsupportedScheme(s) if s == "oci"));
    }

    #[test]
    fn test_missing_file_surfaces_io_error() {
        let err = download_bytes("file:///definitely/not/here.json").unwrap_err();
        assert!(matches!(err, DownloadError::Io(_)));
    }
}
