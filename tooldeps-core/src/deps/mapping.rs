// tooldeps-core/src/deps/mapping.rs
//! Requirement rewriting rules shared by every dependency resolver.
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tooldeps_common::error::{DepsError, Result};
use tooldeps_common::model::{RequirementType, ToolRequirement};
use tracing::{debug, warn};

use super::params::ResolverParams;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum FromSpec {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        unversioned: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ToSpec {
    Name(String),
    Detailed {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct RawMapping {
    from: FromSpec,
    to: ToSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementMapping {
    pub from_name: String,
    pub from_version: Option<String>,
    pub from_unversioned: bool,
    pub to_name: Option<String>,
    pub to_version: Option<String>,
}

impl From<RawMapping> for RequirementMapping {
    fn from(raw: RawMapping) -> Self {
        let (from_name, from_version, from_unversioned) = match raw.from {
            FromSpec::Name(name) => (name, None, false),
            FromSpec::Detailed {
                name,
                version,
                unversioned,
            } => (name, version, unversioned),
        };
        let (to_name, to_version) = match raw.to {
            ToSpec::Name(name) => (Some(name), None),
            ToSpec::Detailed { name, version } => (name, version),
        };
        Self {
            from_name,
            from_version,
            from_unversioned,
            to_name,
            to_version,
        }
    }
}

impl RequirementMapping {
    /// Packages only; names must match, and versions too when the rule
    /// names one. `unversioned` rules only match versionless requirements.
    pub fn matches_requirement(&self, requirement: &ToolRequirement) -> bool {
        if requirement.requirement_type != RequirementType::Package
            || requirement.name != self.from_name
        {
            return false;
        }
        if let Some(version) = &self.from_version {
            return requirement.version.as_ref() == Some(version);
        }
        if self.from_unversioned {
            return requirement.version.is_none();
        }
        true
    }

    pub fn apply(&self, requirement: &ToolRequirement) -> ToolRequirement {
        let name = self.to_name.as_deref().unwrap_or(&requirement.name);
        let version = self
            .to_version
            .as_deref()
            .or(requirement.version.as_deref());
        requirement.rewritten(name, version)
    }
}

/// Ordered rule list; the first matching rule rewrites a requirement once.
#[derive(Debug, Clone, Default)]
pub struct RequirementMapper {
    mappings: Vec<RequirementMapping>,
}

impl RequirementMapper {
    pub fn new(mappings: Vec<RequirementMapping>) -> Self {
        Self { mappings }
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        let raw: Vec<RawMapping> = serde_yaml::from_str(yaml)?;
        Ok(Self::new(raw.into_iter().map(Into::into).collect()))
    }

    /// Rules from the resolver's `mapping_files` option. Relative paths are
    /// looked up under `base_dir`; missing files are skipped with a warning.
    pub fn from_params(params: &ResolverParams, base_dir: &Path) -> Result<Self> {
        let mut mappings = Vec::new();
        for file in params.get_list("mapping_files") {
            let mut path = PathBuf::from(&file);
            if path.is_relative() && !path.exists() {
                path = base_dir.join(&file);
            }
            if !path.exists() {
                warn!("Mapping file {} not found, skipping", path.display());
                continue;
            }
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                DepsError::Config(format!("Failed to read mapping file {}: {e}", path.display()))
            })?;
            let parsed = Self::parse(&raw)?;
            debug!("Loaded {} mappings from {}", parsed.len(), path.display());
            mappings.extend(parsed.mappings);
        }
        Ok(Self::new(mappings))
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn expand(&self, requirement: &ToolRequirement) -> ToolRequirement {
        match self.mappings.iter().find(|m| m.matches_requirement(requirement)) {
            Some(mapping) => {
                let mapped = mapping.apply(requirement);
                debug!("Mapped requirement {} to {}", requirement, mapped);
                mapped
            }
            None => requirement.clone(),
        }
    }
}
