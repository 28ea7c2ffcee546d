// tooldeps-net/src/quay.rs
//! quay.io repository API as a `TagSource`.
use reqwest::blocking::Client;
use serde_json::Value;
use tooldeps_common::cache::Cache;
use tooldeps_common::config::Config;
use tooldeps_common::error::{DepsError, Result};
use tooldeps_common::remote::TagSource;
use tracing::{debug, warn};

use crate::http::build_http_client;
use crate::validation::validate_url;

#[derive(Debug, Clone)]
pub struct QuayClient {
    base_url: String,
    client: Client,
    cache: Option<Cache>,
}

impl QuayClient {
    pub fn new(config: &Config) -> Result<Self> {
        validate_url(&config.quay_api_url)?;
        let cache = match Cache::new(config) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!("Registry responses will not be cached: {}", e);
                None
            }
        };
        Ok(Self {
            base_url: config.quay_api_url.trim_end_matches('/').to_string(),
            client: build_http_client()?,
            cache,
        })
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    fn cache_key(namespace: &str, image: &str) -> String {
        format!("quay-{namespace}-{image}.json")
    }

    /// Raw repository document for `namespace/image`.
    pub fn repository(&self, namespace: &str, image: &str) -> Result<Value> {
        let key = Self::cache_key(namespace, image);
        if let Some(raw) = self.cache.as_ref().and_then(|c| c.load_fresh(&key)) {
            debug!("Using cached registry response for {}/{}", namespace, image);
            return Ok(serde_json::from_str(&raw)?);
        }

        let url = format!("{}/repository/{}/{}", self.base_url, namespace, image);
        debug!("Querying registry: {}", url);
        let response = self
            .client
            .get(&url)
            .query(&[("includeTags", "true")])
            .send()?;
        let status = response.status();
        let body = response.text()?;
        debug!("Registry answered {} for {}/{}", status, namespace, image);
        let value: Value = serde_json::from_str(&body).map_err(|e| {
            DepsError::Registry(format!(
                "Unreadable response ({status}) for {namespace}/{image}: {e}"
            ))
        })?;

        if status.is_success() {
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.store_raw(&key, &body) {
                    debug!("Failed to cache registry response {}: {}", key, e);
                }
            }
        }
        Ok(value)
    }
}

/// Tag names from a repository document, `latest` excluded. Documents
/// describing an error (unknown repository, rejected token) have no tags.
pub fn tags_from_repository(namespace: &str, image: &str, data: &Value) -> Result<Vec<String>> {
    if let Some(error_type) = data.get("error_type").and_then(Value::as_str) {
        debug!("Registry reports '{}' for {}/{}", error_type, namespace, image);
        return Ok(Vec::new());
    }
    let tags = data.get("tags").and_then(Value::as_object).ok_or_else(|| {
        DepsError::Registry(format!(
            "Unexpected response from registry for {namespace}/{image}: no tags"
        ))
    })?;
    Ok(tags
        .keys()
        .filter(|tag| tag.as_str() != "latest")
        .cloned()
        .collect())
}

impl TagSource for QuayClient {
    fn tags(&self, namespace: &str, image: &str) -> Result<Vec<String>> {
        let data = self.repository(namespace, image)?;
        tags_from_repository(namespace, image, &data)
    }
}
