// tooldeps-common/src/remote.rs
//! Narrow capabilities the engine needs from the network. The HTTP
//! implementations live in `tooldeps-net`; the engine only sees these traits.
use std::fmt;
use std::path::Path;

use crate::error::{DepsError, Result};

/// Answers "which tags exist for this image" for a container registry.
pub trait TagSource: Send + Sync + fmt::Debug {
    /// Every tag published for `namespace/image`, excluding `latest`.
    /// A repository that does not exist yields an empty list.
    fn tags(&self, namespace: &str, image: &str) -> Result<Vec<String>>;

    fn repository_exists(&self, namespace: &str, image: &str) -> Result<bool> {
        Ok(!self.tags(namespace, image)?.is_empty())
    }
}

/// Fetches a URL into a local file.
pub trait Downloader: Send + Sync + fmt::Debug {
    fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Stand-in for both capabilities when running without network access.
#[derive(Debug, Default, Clone, Copy)]
pub struct Offline;

impl TagSource for Offline {
    fn tags(&self, namespace: &str, image: &str) -> Result<Vec<String>> {
        tracing::debug!("Offline: not querying registry for {namespace}/{image}");
        Ok(Vec::new())
    }
}

impl Downloader for Offline {
    fn download(&self, url: &str, _dest: &Path) -> Result<()> {
        Err(DepsError::DownloadError(
            url.to_string(),
            "network access is disabled".to_string(),
        ))
    }
}
