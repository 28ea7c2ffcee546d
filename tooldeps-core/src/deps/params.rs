// tooldeps-core/src/deps/params.rs
//! Resolver descriptors as read from resolver configuration files.
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tooldeps_common::config::parse_bool;
use tooldeps_common::error::{DepsError, Result};
use tracing::debug;

/// Keyword arguments of one resolver. Values come from YAML, so scalars are
/// accepted in either their native or their string spelling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverParams {
    values: Map<String, Value>,
}

impl ResolverParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_str(key).map(PathBuf::from)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => parse_bool(s).ok_or_else(|| {
                DepsError::Config(format!("Invalid boolean '{s}' for resolver option '{key}'"))
            }),
            Some(other) => Err(DepsError::Config(format!(
                "Invalid boolean {other} for resolver option '{key}'"
            ))),
        }
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(|n| Some(n as usize))
                .ok_or_else(|| DepsError::Config(format!("Invalid number {n} for '{key}'"))),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| DepsError::Config(format!("Invalid number '{s}' for '{key}'"))),
            Some(other) => Err(DepsError::Config(format!(
                "Invalid number {other} for '{key}'"
            ))),
        }
    }

    /// A YAML list, or a comma separated string.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// `{type: ..., kwargs...}`
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverDescriptor {
    pub resolver_type: String,
    pub params: ResolverParams,
}

impl ResolverDescriptor {
    pub fn new(resolver_type: &str, params: ResolverParams) -> Self {
        Self {
            resolver_type: resolver_type.to_string(),
            params,
        }
    }

    fn from_map(mut values: Map<String, Value>) -> Result<Self> {
        let resolver_type = match values.remove("type") {
            Some(Value::String(t)) => t,
            Some(other) => {
                return Err(DepsError::Config(format!(
                    "Resolver type must be a string, found {other}"
                )))
            }
            None => {
                return Err(DepsError::Config(
                    "Resolver description without a 'type'".to_string(),
                ))
            }
        };
        Ok(Self {
            resolver_type,
            params: ResolverParams::from_map(values),
        })
    }
}

pub fn parse_resolver_descriptors(yaml: &str) -> Result<Vec<ResolverDescriptor>> {
    let raw: Vec<Map<String, Value>> = serde_yaml::from_str(yaml)?;
    raw.into_iter().map(ResolverDescriptor::from_map).collect()
}

pub fn load_resolver_descriptors(path: &Path) -> Result<Vec<ResolverDescriptor>> {
    debug!("Loading resolver configuration from {}", path.display());
    let raw = std::fs::read_to_string(path).map_err(|e| {
        DepsError::Config(format!(
            "Failed to read resolver configuration {}: {e}",
            path.display()
        ))
    })?;
    parse_resolver_descriptors(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml_descriptor_lists() {
        let descriptors = parse_resolver_descriptors(
            "- type: tool_shed_packages\n- type: conda\n  versionless: \"true\"\n  prefix: /opt/conda\n- type: modules\n  find_by: directory\n  prefetch: false\n",
        )
        .unwrap();
        let types: Vec<_> = descriptors.iter().map(|d| d.resolver_type.as_str()).collect();
        assert_eq!(types, ["tool_shed_packages", "conda", "modules"]);

        let conda = &descriptors[1].params;
        assert!(conda.get_bool("versionless", false).unwrap());
        assert!(!conda.get_bool("read_only", false).unwrap());
        assert_eq!(conda.get_path("prefix"), Some(PathBuf::from("/opt/conda")));
        assert!(!descriptors[2].params.get_bool("prefetch", true).unwrap());
    }

    #[test]
    fn descriptor_without_type_is_rejected() {
        let err = parse_resolver_descriptors("- versionless: true\n").unwrap_err();
        assert!(matches!(err, DepsError::Config(_)));
    }

    #[test]
    fn lists_and_numbers() {
        let params = ResolverParams::new()
            .with("mapping_files", "a.yml, b.yml")
            .with("index", "2")
            .with("versionless", "perhaps");
        assert_eq!(params.get_list("mapping_files"), ["a.yml", "b.yml"]);
        assert_eq!(params.get_usize("index").unwrap(), Some(2));
        assert!(params.get_bool("versionless", false).is_err());
    }
}
