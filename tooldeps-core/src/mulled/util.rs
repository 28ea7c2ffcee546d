// tooldeps-core/src/mulled/util.rs
//! Deterministic image names for sets of conda targets ("mulled" images).
//! The names must match what the public biocontainers registry publishes
//! byte for byte.
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use once_cell::sync::Lazy;
use sha1::{Digest, Sha1};
use tooldeps_common::error::{DepsError, Result};
use tooldeps_common::model::{RequirementType, ToolRequirement};
use tooldeps_common::remote::TagSource;
use tracing::{debug, warn};

use super::version::LooseVersion;
use crate::resolution_cache::ResolutionCache;

/// One package of an image: name plus optional version and conda build.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub package_name: String,
    pub version: Option<String>,
    pub build: Option<String>,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&conda_build_target_str(self))
    }
}

/// Builds a target; a `tag` of the form `version--build` overrides both.
pub fn build_target(
    package_name: &str,
    version: Option<&str>,
    build: Option<&str>,
    tag: Option<&str>,
) -> Target {
    let (version, build) = match tag {
        Some(tag) => {
            let (v, b) = split_tag(tag);
            (Some(v.to_string()), b.map(str::to_string))
        }
        None => (version.map(str::to_string), build.map(str::to_string)),
    };
    Target {
        package_name: package_name.to_string(),
        version: version.filter(|v| !v.is_empty()),
        build: build.filter(|b| !b.is_empty()),
    }
}

/// Package requirements of a tool as image targets, in requirement order.
pub fn requirements_to_mulled_targets<'a, I>(requirements: I) -> Vec<Target>
where
    I: IntoIterator<Item = &'a ToolRequirement>,
{
    requirements
        .into_iter()
        .filter(|r| r.requirement_type == RequirementType::Package)
        .map(|r| build_target(&r.name, r.version.as_deref(), None, None))
        .collect()
}

/// `name[=version[=build]]`
pub fn conda_build_target_str(target: &Target) -> String {
    let mut rval = target.package_name.clone();
    if let Some(version) = &target.version {
        rval.push('=');
        rval.push_str(version);
        if let Some(build) = &target.build {
            rval.push('=');
            rval.push_str(build);
        }
    }
    rval
}

fn simple_image_name(target: &Target, image_build: Option<&str>) -> String {
    let mut name = target.package_name.clone();
    if let Some(version) = &target.version {
        let mut build = target.build.clone();
        if build.is_none() {
            if let Some(image_build) = image_build.filter(|b| *b != "0") {
                // "0" marks images built without a build suffix.
                warn!("Hard-coding image build instead of using Conda build - this is not recommended.");
                build = Some(image_build.to_string());
            }
        }
        name.push(':');
        name.push_str(version);
        if let Some(build) = build {
            name.push_str("--");
            name.push_str(&build);
        }
    }
    name
}

fn sorted_targets(targets: &[Target]) -> Vec<&Target> {
    let mut sorted: Vec<&Target> = targets.iter().collect();
    sorted.sort_by(|a, b| a.package_name.cmp(&b.package_name));
    sorted
}

fn sha1_hex(buffer: &str) -> String {
    hex::encode(Sha1::digest(buffer.as_bytes()))
}

fn override_name(name_override: Option<&str>) -> Option<String> {
    name_override.map(|name| {
        warn!(
            "Overriding mulled image name, auto-detection of '{}' will fail to detect it.",
            name
        );
        name.to_string()
    })
}

/// `mulled-v1-<sha1 of sorted target strings>[:image_build]`; single
/// targets keep their plain `name:version--build` form.
pub fn v1_image_name(
    targets: &[Target],
    image_build: Option<&str>,
    name_override: Option<&str>,
) -> String {
    if let Some(name) = override_name(name_override) {
        return name;
    }
    if let [single] = targets {
        return simple_image_name(single, image_build);
    }
    let buffer = sorted_targets(targets)
        .into_iter()
        .map(conda_build_target_str)
        .collect::<Vec<_>>()
        .join("\n");
    let suffix = match image_build.filter(|b| !b.is_empty()) {
        Some(build) => format!(":{build}"),
        None => String::new(),
    };
    format!("mulled-v1-{}{}", sha1_hex(&buffer), suffix)
}

/// `mulled-v2-<package hash>[:<version hash>[-build]]`. The version hash
/// only exists when some target carries a version.
pub fn v2_image_name(
    targets: &[Target],
    image_build: Option<&str>,
    name_override: Option<&str>,
) -> String {
    if let Some(name) = override_name(name_override) {
        return name;
    }
    if let [single] = targets {
        return simple_image_name(single, image_build);
    }
    let ordered = sorted_targets(targets);
    let package_buffer = ordered
        .iter()
        .map(|t| t.package_name.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let package_hash = sha1_hex(&package_buffer);

    let version_hash = if ordered.iter().any(|t| t.version.is_some()) {
        let version_buffer = ordered
            .iter()
            .map(|t| t.version.as_deref().unwrap_or("null"))
            .collect::<Vec<_>>()
            .join("\n");
        sha1_hex(&version_buffer)
    } else {
        String::new()
    };

    let build_suffix = match image_build.filter(|b| !b.is_empty()) {
        None => String::new(),
        Some(build) if !version_hash.is_empty() => format!("-{build}"),
        Some(build) => build.to_string(),
    };
    let mut name = format!("mulled-v2-{package_hash}");
    if !version_hash.is_empty() || !build_suffix.is_empty() {
        name.push(':');
        name.push_str(&version_hash);
        name.push_str(&build_suffix);
    }
    name
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashFunc {
    V1,
    #[default]
    V2,
}

impl HashFunc {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }

    pub fn image_name(
        &self,
        targets: &[Target],
        image_build: Option<&str>,
        name_override: Option<&str>,
    ) -> String {
        match self {
            Self::V1 => v1_image_name(targets, image_build, name_override),
            Self::V2 => v2_image_name(targets, image_build, name_override),
        }
    }
}

impl fmt::Display for HashFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashFunc {
    type Err = DepsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v1" => Ok(Self::V1),
            "v2" => Ok(Self::V2),
            other => Err(DepsError::ValidationError(format!(
                "Unknown mulled hash function '{other}'"
            ))),
        }
    }
}

/// Splits an image tag into conda version and build at the last `--`.
pub fn split_tag(tag: &str) -> (&str, Option<&str>) {
    match tag.rsplit_once("--") {
        Some((version, build)) => (version, Some(build)),
        None => (tag, None),
    }
}

/// `image[:tag]` split at the first colon.
pub fn split_container_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once(':') {
        Some((image, tag)) => (image, Some(tag)),
        None => (name, None),
    }
}

#[derive(Debug, Clone)]
pub struct ParsedTag {
    pub tag: String,
    pub version: LooseVersion,
    pub build_string: LooseVersion,
    pub build_number: i64,
}

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    // Greedy first group: the split happens at the last "--".
    Regex::new(r"^(.*)--(.*)$").unwrap_or_else(|_| unreachable!())
});

pub fn parse_tag(tag: &str) -> ParsedTag {
    let mut version = tag.rsplit(':').next().unwrap_or(tag).to_string();
    let mut build_string = "-1".to_string();
    let mut build_number = -1;
    if let Some(caps) = TAG_RE.captures(&version) {
        let v = caps.get(1).map_or("", |m| m.as_str()).to_string();
        build_string = caps.get(2).map_or("", |m| m.as_str()).to_string();
        if let Some(last) = build_string.rsplit('_').next() {
            if let Ok(n) = last.parse::<i64>() {
                build_number = n;
            }
        }
        version = v;
    }
    ParsedTag {
        tag: tag.to_string(),
        version: LooseVersion::parse(&version),
        build_string: LooseVersion::parse(&build_string),
        build_number,
    }
}

/// Newest first: version, then build number, then build string, each
/// descending. Ties keep their input order.
pub fn version_sorted<S: AsRef<str>>(elements: &[S]) -> Vec<String> {
    let mut parsed: Vec<ParsedTag> = elements.iter().map(|e| parse_tag(e.as_ref())).collect();
    parsed.sort_by(|a, b| b.build_string.cmp(&a.build_string));
    parsed.sort_by(|a, b| b.build_number.cmp(&a.build_number));
    parsed.sort_by(|a, b| b.version.cmp(&a.version));
    parsed.into_iter().map(|p| p.tag).collect()
}

/// Registry tags of `namespace/image`, optionally only those starting with
/// `tag_prefix`, newest first. Lookups are memoized in `cache`.
pub fn mulled_tags_for(
    namespace: &str,
    image: &str,
    tag_prefix: Option<&str>,
    cache: &mut ResolutionCache,
    tag_source: &dyn TagSource,
) -> Result<Vec<String>> {
    let tags = match cache.tags(namespace, image) {
        Some(tags) => tags.to_vec(),
        None => {
            let tags = tag_source.tags(namespace, image)?;
            debug!("Registry has {} tags for {}/{}", tags.len(), namespace, image);
            cache.put_tags(namespace, image, tags.clone());
            tags
        }
    };
    if tags.is_empty() {
        return Ok(Vec::new());
    }
    let filtered: Vec<&String> = match tag_prefix {
        Some(prefix) => tags.iter().filter(|t| t.starts_with(prefix)).collect(),
        None => tags.iter().collect(),
    };
    Ok(version_sorted(&filtered))
}
