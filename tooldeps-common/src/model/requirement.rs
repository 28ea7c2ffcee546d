// tooldeps-common/src/model/requirement.rs
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{DepsError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementType {
    #[default]
    Package,
    SetEnvironment,
    Binary,
}

impl RequirementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::SetEnvironment => "set_environment",
            Self::Binary => "binary",
        }
    }

    /// Types the dependency resolvers know how to turn into shell commands.
    pub fn is_resolvable(&self) -> bool {
        matches!(self, Self::Package | Self::SetEnvironment)
    }
}

impl fmt::Display for RequirementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequirementType {
    type Err = DepsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "package" => Ok(Self::Package),
            "set_environment" => Ok(Self::SetEnvironment),
            "binary" => Ok(Self::Binary),
            other => Err(DepsError::ValidationError(format!(
                "Unknown requirement type '{other}'"
            ))),
        }
    }
}

/// Points a requirement at a specific naming authority, e.g.
/// `https://anaconda.org/bioconda/samtools`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequirementSpecification {
    pub uri: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl RequirementSpecification {
    pub fn new(uri: impl Into<String>, version: Option<String>) -> Self {
        Self {
            uri: uri.into(),
            version,
        }
    }

    /// Last path segment of the URI, the package name under that authority.
    pub fn short_name(&self) -> &str {
        self.uri
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.uri)
    }
}

/// A named, optionally versioned need declared by a tool.
///
/// Identity is (name, type, version); specifications only refine resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequirement {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "type", default)]
    pub requirement_type: RequirementType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specs: Vec<RequirementSpecification>,
}

impl ToolRequirement {
    pub fn new(
        name: impl Into<String>,
        version: Option<&str>,
        requirement_type: RequirementType,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.map(str::to_string),
            requirement_type,
            specs: Vec::new(),
        }
    }

    pub fn package(name: impl Into<String>, version: Option<&str>) -> Self {
        Self::new(name, version, RequirementType::Package)
    }

    pub fn with_specs(mut self, specs: Vec<RequirementSpecification>) -> Self {
        self.specs = specs;
        self
    }

    /// Copy with name and version replaced, type and specs kept.
    pub fn rewritten(&self, name: &str, version: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            version: version.map(str::to_string),
            requirement_type: self.requirement_type,
            specs: self.specs.clone(),
        }
    }

    /// Parses the `name[=version]` shorthand used on the command line.
    pub fn parse(raw: &str, requirement_type: RequirementType) -> Result<Self> {
        let raw = raw.trim();
        let (name, version) = match raw.split_once('=') {
            Some((name, version)) => (name, Some(version)),
            None => (raw, None),
        };
        if name.is_empty() {
            return Err(DepsError::ValidationError(format!(
                "Empty requirement name in '{raw}'"
            )));
        }
        let version = version.filter(|v| !v.is_empty());
        Ok(Self::new(name, version, requirement_type))
    }
}

impl PartialEq for ToolRequirement {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.requirement_type == other.requirement_type
            && self.version == other.version
    }
}

impl Eq for ToolRequirement {}

impl Hash for ToolRequirement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.requirement_type.hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for ToolRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}@{} ({})", self.name, v, self.requirement_type),
            None => write!(f, "{} ({})", self.name, self.requirement_type),
        }
    }
}

/// Ordered, de-duplicating requirement collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolRequirements {
    requirements: IndexSet<ToolRequirement>,
}

impl ToolRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when an equal requirement was already present.
    pub fn insert(&mut self, requirement: ToolRequirement) -> bool {
        self.requirements.insert(requirement)
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn contains(&self, requirement: &ToolRequirement) -> bool {
        self.requirements.contains(requirement)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolRequirement> {
        self.requirements.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ToolRequirement> {
        self.requirements.get_index(index)
    }

    pub fn resolvable(&self) -> ToolRequirements {
        self.iter()
            .filter(|r| r.requirement_type.is_resolvable())
            .cloned()
            .collect()
    }

    pub fn packages(&self) -> ToolRequirements {
        self.iter()
            .filter(|r| r.requirement_type == RequirementType::Package)
            .cloned()
            .collect()
    }
}

impl FromIterator<ToolRequirement> for ToolRequirements {
    fn from_iter<I: IntoIterator<Item = ToolRequirement>>(iter: I) -> Self {
        Self {
            requirements: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ToolRequirements {
    type Item = &'a ToolRequirement;
    type IntoIter = indexmap::set::Iter<'a, ToolRequirement>;

    fn into_iter(self) -> Self::IntoIter {
        self.requirements.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_keeps_insertion_order_and_collapses_duplicates() {
        let mut reqs = ToolRequirements::new();
        assert!(reqs.insert(ToolRequirement::package("samtools", Some("1.3.1"))));
        assert!(reqs.insert(ToolRequirement::package("bwa", None)));
        let with_spec = ToolRequirement::package("samtools", Some("1.3.1")).with_specs(vec![
            RequirementSpecification::new("https://anaconda.org/bioconda/samtools", None),
        ]);
        assert!(!reqs.insert(with_spec));
        assert!(reqs.insert(ToolRequirement::new(
            "JAVA_JAR_PATH",
            None,
            RequirementType::SetEnvironment
        )));
        assert!(reqs.insert(ToolRequirement::new("java", None, RequirementType::Binary)));

        let names: Vec<_> = reqs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["samtools", "bwa", "JAVA_JAR_PATH", "java"]);
        assert_eq!(reqs.resolvable().len(), 3);
        assert_eq!(reqs.packages().len(), 2);
    }

    #[test]
    fn parse_shorthand() {
        let req = ToolRequirement::parse("samtools=1.3.1", RequirementType::Package).unwrap();
        assert_eq!(req.version.as_deref(), Some("1.3.1"));
        let req = ToolRequirement::parse("bwa=", RequirementType::Package).unwrap();
        assert_eq!(req.version, None);
        assert!(ToolRequirement::parse("=1.0", RequirementType::Package).is_err());
    }

    #[test]
    fn spec_short_name_is_last_segment() {
        let spec = RequirementSpecification::new("https://anaconda.org/bioconda/samtools/", None);
        assert_eq!(spec.short_name(), "samtools");
    }

    #[test]
    fn deserializes_type_field() {
        let req: ToolRequirement =
            serde_json::from_str(r#"{"name": "R_HOME", "type": "set_environment"}"#).unwrap();
        assert_eq!(req.requirement_type, RequirementType::SetEnvironment);
        assert_eq!(req.version, None);
    }
}
