// tooldeps-core/src/resolution_cache.rs
use std::collections::{HashMap, HashSet};

/// Per-request memo of expensive lookups (registry tags, local image
/// listings, module listings). Callers create one per resolution request and
/// pass it down by `&mut`; nothing here outlives the request.
#[derive(Debug, Default, Clone)]
pub struct ResolutionCache {
    tags: HashMap<String, Vec<String>>,
    mulled_names: HashMap<String, String>,
    unresolved: HashSet<String>,
    docker_images: Option<Vec<String>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn tags_key(namespace: &str, image: &str) -> String {
        format!("{namespace}/{image}")
    }

    pub fn tags(&self, namespace: &str, image: &str) -> Option<&[String]> {
        self.tags
            .get(&Self::tags_key(namespace, image))
            .map(Vec::as_slice)
    }

    pub fn put_tags(&mut self, namespace: &str, image: &str, tags: Vec<String>) {
        self.tags.insert(Self::tags_key(namespace, image), tags);
    }

    pub fn mulled_name(&self, key: &str) -> Option<&str> {
        self.mulled_names.get(key).map(String::as_str)
    }

    pub fn put_mulled_name(&mut self, key: String, name: String) {
        self.mulled_names.insert(key, name);
    }

    pub fn is_unresolved(&self, key: &str) -> bool {
        self.unresolved.contains(key)
    }

    pub fn mark_unresolved(&mut self, key: String) {
        self.unresolved.insert(key);
    }

    /// `repository:tag` lines from the local docker daemon.
    pub fn docker_images(&self) -> Option<&[String]> {
        self.docker_images.as_deref()
    }

    pub fn put_docker_images(&mut self, images: Vec<String>) {
        self.docker_images = Some(images);
    }

    /// Drops the image listing after something was built or pulled.
    pub fn forget_docker_images(&mut self) {
        self.docker_images = None;
    }
}
