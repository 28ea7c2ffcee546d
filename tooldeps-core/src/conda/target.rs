// tooldeps-core/src/conda/target.rs
use std::fmt;
use std::hash::{Hash, Hasher};

use sha2::{Digest, Sha256};
use tooldeps_common::error::{DepsError, Result};

const UNVERSIONED: &str = "_uv_";

/// A concrete (package, version, build, channel) to install into an
/// environment. Every field ends up on a conda command line, so shell
/// metacharacters are rejected at construction.
#[derive(Debug, Clone)]
pub struct CondaTarget {
    package: String,
    /// Spelling as requested, for environments created before package
    /// names were lowercased.
    original_package: String,
    version: Option<String>,
    build: Option<String>,
    channel: Option<String>,
}

fn check_shell_safe(field: &str, value: &str) -> Result<()> {
    if value
        .chars()
        .any(|c| c.is_whitespace() || c == '"' || c == '\'')
    {
        return Err(DepsError::ValidationError(format!(
            "Invalid {field} [{value}] encountered."
        )));
    }
    Ok(())
}

impl CondaTarget {
    pub fn new(
        package: &str,
        version: Option<&str>,
        build: Option<&str>,
        channel: Option<&str>,
    ) -> Result<Self> {
        check_shell_safe("package", package)?;
        if let Some(v) = version {
            check_shell_safe("version", v)?;
        }
        if let Some(b) = build {
            check_shell_safe("build", b)?;
        }
        if let Some(c) = channel {
            check_shell_safe("channel", c)?;
        }
        Ok(Self {
            package: package.to_lowercase(),
            original_package: package.to_string(),
            version: version.filter(|v| !v.is_empty()).map(str::to_string),
            build: build.filter(|b| !b.is_empty()).map(str::to_string),
            channel: channel.filter(|c| !c.is_empty()).map(str::to_string),
        })
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn build(&self) -> Option<&str> {
        self.build.as_deref()
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// `name=version[=build]`, or `name=*` when unversioned.
    pub fn package_specifier(&self) -> String {
        let mut spec = match &self.version {
            Some(version) => format!("{}={}", self.package, version),
            None => format!("{}=*", self.package),
        };
        if let Some(build) = &self.build {
            spec.push('=');
            spec.push_str(build);
        }
        spec
    }

    /// Name of the environment holding just this target.
    pub fn install_environment(&self) -> String {
        env_name(&self.package, self.version.as_deref())
    }

    /// Environment name as written before package names were lowercased.
    pub fn capitalized_install_environment(&self) -> String {
        env_name(&self.original_package, self.version.as_deref())
    }
}

fn env_name(package: &str, version: Option<&str>) -> String {
    format!("__{}@{}", package, version.unwrap_or(UNVERSIONED))
}

/// Parses an environment directory name produced by `install_environment`.
pub fn parse_install_environment(name: &str) -> Option<(String, Option<String>)> {
    let rest = name.strip_prefix("__")?;
    let (package, version) = rest.rsplit_once('@')?;
    if package.is_empty() || version.is_empty() {
        return None;
    }
    let version = (version != UNVERSIONED).then(|| version.to_string());
    Some((package.to_string(), version))
}

/// SHA-256 over the sorted single-target environment names.
pub fn hash_conda_packages(targets: &[CondaTarget]) -> String {
    let mut names: Vec<String> = targets.iter().map(CondaTarget::install_environment).collect();
    names.sort();
    let mut hasher = Sha256::new();
    for name in &names {
        hasher.update(name.as_bytes());
    }
    hex::encode(hasher.finalize())
}

impl PartialEq for CondaTarget {
    fn eq(&self, other: &Self) -> bool {
        self.package == other.package
            && self.version == other.version
            && self.build == other.build
            && self.channel == other.channel
    }
}

impl Eq for CondaTarget {}

impl Hash for CondaTarget {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.package.hash(state);
        self.version.hash(state);
        self.build.hash(state);
        self.channel.hash(state);
    }
}

impl fmt::Display for CondaTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CondaTarget[{}", self.package)?;
        if let Some(version) = &self.version {
            write!(f, ",version={version}")?;
        }
        if let Some(build) = &self.build {
            write!(f, ",build={build}")?;
        }
        if let Some(channel) = &self.channel {
            write!(f, ",channel={channel}")?;
        }
        f.write_str("]")
    }
}
