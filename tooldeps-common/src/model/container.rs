// tooldeps-common/src/model/container.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::requirement::ToolRequirements;
use crate::error::{DepsError, Result};

/// Minimal shell; images are not assumed to ship bash.
pub const DEFAULT_CONTAINER_SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Docker,
    Singularity,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Singularity => "singularity",
        }
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerType {
    type Err = DepsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "singularity" => Ok(Self::Singularity),
            other => Err(DepsError::ValidationError(format!(
                "Unknown container type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescription {
    identifier: String,
    #[serde(rename = "type")]
    pub container_type: ContainerType,
    #[serde(default)]
    pub resolve_dependencies: bool,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub explicit: bool,
}

fn default_shell() -> String {
    DEFAULT_CONTAINER_SHELL.to_string()
}

impl ContainerDescription {
    pub fn new(identifier: &str, container_type: ContainerType) -> Self {
        Self {
            identifier: normalize_identifier(identifier),
            container_type,
            resolve_dependencies: false,
            shell: default_shell(),
            explicit: false,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_resolve_dependencies(mut self, resolve_dependencies: bool) -> Self {
        self.resolve_dependencies = resolve_dependencies;
        self
    }

    pub fn into_explicit(mut self) -> Self {
        self.explicit = true;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Lowercases the final path segment (image name and tag), leaving any
/// registry or directory prefix untouched.
pub fn normalize_identifier(identifier: &str) -> String {
    match identifier.rsplit_once('/') {
        Some((prefix, tail)) => format!("{prefix}/{}", tail.to_lowercase()),
        None => identifier.to_lowercase(),
    }
}

impl fmt::Display for ContainerDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.container_type, self.identifier)
    }
}

/// What a container resolver knows about the tool being run.
#[derive(Debug, Clone, Default)]
pub struct ToolInfo {
    pub container_descriptions: Vec<ContainerDescription>,
    pub requirements: ToolRequirements,
    pub requires_galaxy_python_environment: bool,
    pub tool_id: Option<String>,
    pub tool_version: Option<String>,
}

impl ToolInfo {
    pub fn from_requirements(requirements: ToolRequirements) -> Self {
        Self {
            requirements,
            ..Self::default()
        }
    }
}
