use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DepsError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("YAML Parsing Error: {0}")]
    Yaml(#[from] Arc<serde_yaml::Error>),

    #[error("Semantic Versioning Error: {0}")]
    SemVer(#[from] Arc<semver::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("Cache Error: {0}")]
    Cache(String),

    #[error("Registry Error: {0}")]
    Registry(String),

    #[error("DownloadError: Failed to download '{0}': {1}")]
    DownloadError(String, String),

    #[error("Failed to execute command '{command}' (exit code {code:?}): {stderr}")]
    CommandExec {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Installation Error: {0}")]
    InstallError(String),

    #[error("Dependency Error: {0}")]
    DependencyError(String),

    #[error("Failed to get file lock for {0}")]
    Lock(String),

    #[error("Parsing Error in {0}: {1}")]
    ParseError(&'static str, String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl DepsError {
    /// Lock contention is the one failure callers are expected to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DepsError::Lock(_))
    }
}

impl From<std::io::Error> for DepsError {
    fn from(err: std::io::Error) -> Self {
        DepsError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for DepsError {
    fn from(err: reqwest::Error) -> Self {
        DepsError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for DepsError {
    fn from(err: serde_json::Error) -> Self {
        DepsError::Json(Arc::new(err))
    }
}

impl From<serde_yaml::Error> for DepsError {
    fn from(err: serde_yaml::Error) -> Self {
        DepsError::Yaml(Arc::new(err))
    }
}

impl From<semver::Error> for DepsError {
    fn from(err: semver::Error) -> Self {
        DepsError::SemVer(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, DepsError>;
