// tooldeps-net/src/http.rs
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use tempfile::NamedTempFile;
use tooldeps_common::error::{DepsError, Result};
use tooldeps_common::remote::Downloader;
use tracing::{debug, error};

use crate::validation::validate_url;

const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const CONNECT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT_STRING: &str = concat!("tooldeps/", env!("CARGO_PKG_VERSION"));

/// Blocking client shared by registry queries and installer downloads.
/// Callers inside a tokio runtime must use `spawn_blocking`.
pub fn build_http_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(DepsError::from)
}

#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
        })
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        validate_url(url)?;
        let dir = dest.parent().ok_or_else(|| {
            DepsError::Generic(format!("Cannot get parent directory for {}", dest.display()))
        })?;
        fs::create_dir_all(dir)?;

        debug!("Downloading {} to {}", url, dest.display());
        let response = self.client.get(url).send().map_err(|e| {
            debug!("HTTP request failed for {url}: {e}");
            DepsError::DownloadError(url.to_string(), e.to_string())
        })?;
        let status = response.status();
        debug!("Received HTTP status: {} for {}", status, url);

        if !status.is_success() {
            error!("HTTP error {} for URL {}", status, url);
            let reason = match status {
                StatusCode::NOT_FOUND => "Resource not found (404)".to_string(),
                StatusCode::FORBIDDEN => "Access forbidden (403)".to_string(),
                other => format!("HTTP error {other}"),
            };
            return Err(DepsError::DownloadError(url.to_string(), reason));
        }

        let content = response
            .bytes()
            .map_err(|e| DepsError::DownloadError(url.to_string(), e.to_string()))?;
        let mut temp_file = NamedTempFile::new_in(dir)?;
        temp_file.write_all(&content)?;
        temp_file.flush()?;
        temp_file
            .persist(dest)
            .map_err(|e| DepsError::from(e.error))?;
        debug!("Downloaded {} bytes to {}", content.len(), dest.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_http_is_refused_before_any_request() {
        let downloader = HttpDownloader::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = downloader
            .download("http://example.invalid/involucro", &dir.path().join("involucro"))
            .unwrap_err();
        assert!(matches!(err, DepsError::ValidationError(_)));
        assert!(!dir.path().join("involucro").exists());
    }
}
