// tooldeps-core/src/mulled/cached.rs
//! Locally available mulled images: listing, parsing and matching them
//! against a requested target set, and the registry-backed name lookup used
//! when nothing local matches.
use std::path::Path;

use tooldeps_common::error::Result;
use tooldeps_common::model::{ContainerDescription, ContainerType};
use tooldeps_common::remote::TagSource;
use tooldeps_io::fs::list_directory_entries;
use tooldeps_io::process::{check_output, CommandRunner, CommandSpec};
use tracing::{debug, info};

use super::util::{
    mulled_tags_for, split_tag, v1_image_name, v2_image_name, version_sorted, HashFunc, Target,
};
use crate::resolution_cache::ResolutionCache;

const V1_PREFIX: &str = "mulled-v1-";
const V2_PREFIX: &str = "mulled-v2-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedMulledImage {
    SingleTarget {
        package_name: String,
        version: Option<String>,
        build: Option<String>,
        image_identifier: String,
    },
    V1MultiTarget {
        hash: String,
        build: Option<String>,
        image_identifier: String,
    },
    V2MultiTarget {
        package_hash: String,
        version_hash: Option<String>,
        build: Option<String>,
        image_identifier: String,
    },
}

impl CachedMulledImage {
    pub fn image_identifier(&self) -> &str {
        match self {
            Self::SingleTarget { image_identifier, .. }
            | Self::V1MultiTarget { image_identifier, .. }
            | Self::V2MultiTarget { image_identifier, .. } => image_identifier,
        }
    }

    pub fn is_multi_target(&self) -> bool {
        !matches!(self, Self::SingleTarget { .. })
    }
}

/// Hash part of a `[registry/ns/]mulled-vN-<hash>` image name.
fn mulled_hash<'a>(image_name: &'a str, prefix: &str) -> Option<&'a str> {
    image_name
        .rsplit('/')
        .next()
        .and_then(|tail| tail.strip_prefix(prefix))
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Parses `[quay.io/<ns>/]image[:tag]` into a cached image. Multi-target
/// images of the other hash scheme yield `None`.
pub fn identifier_to_cached_target(
    identifier: &str,
    hash_func: HashFunc,
    namespace: Option<&str>,
) -> Option<CachedMulledImage> {
    let (image_name, tag) = match identifier.rsplit_once(':') {
        Some((name, tag)) => (name, Some(tag)),
        None => (identifier, None),
    };
    let tag = tag.filter(|t| !t.is_empty() && *t != "latest");
    let prefix = namespace
        .map(|ns| format!("quay.io/{ns}/"))
        .unwrap_or_default();
    let unprefixed = image_name.strip_prefix(prefix.as_str());

    match unprefixed {
        Some(name) if name.starts_with(V1_PREFIX) => {
            if hash_func == HashFunc::V2 {
                return None;
            }
            Some(CachedMulledImage::V1MultiTarget {
                hash: mulled_hash(name, V1_PREFIX)?.to_string(),
                build: tag.filter(|t| is_digits(t)).map(str::to_string),
                image_identifier: identifier.to_string(),
            })
        }
        Some(name) if name.starts_with(V2_PREFIX) => {
            if hash_func == HashFunc::V1 {
                return None;
            }
            let (version_hash, build) = match tag {
                Some(t) if is_digits(t) => (None, Some(t.to_string())),
                Some(t) => match t.rsplit_once('-') {
                    Some((vhash, build)) => (Some(vhash.to_string()), Some(build.to_string())),
                    None => (Some(t.to_string()), None),
                },
                None => (None, None),
            };
            Some(CachedMulledImage::V2MultiTarget {
                package_hash: mulled_hash(name, V2_PREFIX)?.to_string(),
                version_hash,
                build,
                image_identifier: identifier.to_string(),
            })
        }
        _ => {
            let (version, build) = match tag {
                Some(t) => {
                    let (v, b) = split_tag(t);
                    (Some(v.to_string()), b.map(str::to_string))
                }
                None => (None, None),
            };
            Some(CachedMulledImage::SingleTarget {
                package_name: unprefixed.unwrap_or(image_name).to_string(),
                version,
                build,
                image_identifier: identifier.to_string(),
            })
        }
    }
}

/// `repository:tag` pairs from the local docker daemon, limited to
/// `quay.io/<namespace>` (or any `quay.io/<ns>/<image>` without one).
pub fn list_docker_cached_mulled_images(
    runner: &dyn CommandRunner,
    namespace: Option<&str>,
    hash_func: HashFunc,
    cache: &mut ResolutionCache,
) -> Vec<CachedMulledImage> {
    let images: Vec<String> = match cache.docker_images() {
        Some(images) => images.to_vec(),
        None => {
            let spec = CommandSpec::new("docker")
                .arg("images")
                .args(["--format", "{{.Repository}}:{{.Tag}}"]);
            match check_output(runner, &spec) {
                Ok(stdout) => {
                    let images: Vec<String> = stdout
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string)
                        .collect();
                    cache.put_docker_images(images.clone());
                    images
                }
                Err(e) => {
                    info!("Call to `docker images` failed, configured container resolution may be broken: {}", e);
                    return Vec::new();
                }
            }
        }
    };

    let wanted = |line: &&String| {
        let repository = line.rsplit_once(':').map_or(line.as_str(), |(r, _)| r);
        match namespace {
            Some(ns) => repository.starts_with(&format!("quay.io/{ns}")),
            None => repository.starts_with("quay.io/") && repository.matches('/').count() == 2,
        }
    };
    let filtered: Vec<&String> = images.iter().filter(wanted).collect();
    version_sorted(&filtered)
        .iter()
        .filter_map(|identifier| identifier_to_cached_target(identifier, hash_func, namespace))
        .collect()
}

/// Image files in a singularity cache directory, newest first.
pub fn list_cached_mulled_images_from_path(
    directory: &Path,
    hash_func: HashFunc,
) -> Result<Vec<CachedMulledImage>> {
    let names: Vec<String> = list_directory_entries(directory)?
        .into_iter()
        .map(|(name, _, _)| name)
        .collect();
    Ok(version_sorted(&names)
        .iter()
        .filter_map(|name| identifier_to_cached_target(name, hash_func, None))
        .collect())
}

fn split_v2_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once(':') {
        Some((package, version)) => (package, Some(version)),
        None => (name, None),
    }
}

/// First cached image satisfying `targets`; list order is the tie-break.
pub fn find_best_matching_cached_image<'a>(
    targets: &[Target],
    cached_images: &'a [CachedMulledImage],
    hash_func: HashFunc,
) -> Option<&'a CachedMulledImage> {
    if let [target] = targets {
        return cached_images.iter().find(|image| match image {
            CachedMulledImage::SingleTarget {
                package_name,
                version,
                ..
            } => {
                *package_name == target.package_name
                    && (target.version.is_none() || target.version == *version)
            }
            _ => false,
        });
    }

    match hash_func {
        HashFunc::V2 => {
            let name = v2_image_name(targets, None, None);
            let (package_part, version_hash) = split_v2_name(&name);
            let package_hash = mulled_hash(package_part, V2_PREFIX)?;
            cached_images.iter().find(|image| match image {
                CachedMulledImage::V2MultiTarget {
                    package_hash: cached_package,
                    version_hash: cached_version,
                    ..
                } => {
                    cached_package == package_hash
                        && version_hash.map_or(true, |v| cached_version.as_deref() == Some(v))
                }
                _ => false,
            })
        }
        HashFunc::V1 => {
            let name = v1_image_name(targets, None, None);
            let hash = mulled_hash(&name, V1_PREFIX)?;
            cached_images.iter().find(|image| {
                matches!(image, CachedMulledImage::V1MultiTarget { hash: cached, .. } if cached == hash)
            })
        }
    }
}

pub fn docker_cached_container_description(
    runner: &dyn CommandRunner,
    targets: &[Target],
    namespace: Option<&str>,
    hash_func: HashFunc,
    shell: &str,
    cache: &mut ResolutionCache,
) -> Option<ContainerDescription> {
    if targets.is_empty() {
        return None;
    }
    let cached = list_docker_cached_mulled_images(runner, namespace, hash_func, cache);
    find_best_matching_cached_image(targets, &cached, hash_func).map(|image| {
        ContainerDescription::new(image.image_identifier(), ContainerType::Docker).with_shell(shell)
    })
}

pub fn singularity_cached_container_description(
    targets: &[Target],
    cache_directory: &Path,
    hash_func: HashFunc,
    shell: &str,
) -> Result<Option<ContainerDescription>> {
    if targets.is_empty() || !cache_directory.is_dir() {
        return Ok(None);
    }
    let cached = list_cached_mulled_images_from_path(cache_directory, hash_func)?;
    Ok(
        find_best_matching_cached_image(targets, &cached, hash_func).map(|image| {
            let path = cache_directory.join(image.image_identifier());
            ContainerDescription::new(&path.display().to_string(), ContainerType::Singularity)
                .with_shell(shell)
        }),
    )
}

/// Fully qualified `image:tag` published in the registry for `targets`, or
/// `None`. Misses are remembered for the rest of the request.
pub fn targets_to_mulled_name(
    targets: &[Target],
    hash_func: HashFunc,
    namespace: &str,
    cache: &mut ResolutionCache,
    tag_source: &dyn TagSource,
) -> Result<Option<String>> {
    let (cache_key, name) = if let [target] = targets {
        let cache_key = format!(
            "ns[{namespace}]__single__{}__@__{}",
            target.package_name,
            target.version.as_deref().unwrap_or("None")
        );
        if cache.is_unresolved(&cache_key) {
            return Ok(None);
        }
        if let Some(name) = cache.mulled_name(&cache_key) {
            return Ok(Some(name.to_string()));
        }
        let tags = mulled_tags_for(namespace, &target.package_name, None, cache, tag_source)?;
        let tag = match &target.version {
            Some(wanted) => tags.iter().find(|tag| split_tag(tag).0 == wanted),
            None => tags.first(),
        };
        let name = tag.map(|tag| format!("{}:{}", target.package_name, tag));
        (cache_key, name)
    } else {
        let base_image_name = hash_func.image_name(targets, None, None);
        let cache_key = format!("ns[{namespace}]__{hash_func}__{base_image_name}");
        if cache.is_unresolved(&cache_key) {
            return Ok(None);
        }
        if let Some(name) = cache.mulled_name(&cache_key) {
            return Ok(Some(name.to_string()));
        }
        let (repo_name, tag_prefix) = split_v2_name(&base_image_name);
        let tags = mulled_tags_for(namespace, repo_name, tag_prefix, cache, tag_source)?;
        let name = tags.first().map(|tag| format!("{repo_name}:{tag}"));
        (cache_key, name)
    };

    match &name {
        Some(name) => {
            debug!("Registry name for {:?}: {}", targets, name);
            cache.put_mulled_name(cache_key, name.clone());
        }
        None => cache.mark_unresolved(cache_key),
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use tooldeps_io::process::CommandOutput;

    use super::*;
    use crate::mulled::util::build_target;
    use crate::test_support::{FakeRunner, FakeTags};

    fn t(name: &str, version: Option<&str>) -> Target {
        build_target(name, version, None, None)
    }

    const V2_BWA_SAMTOOLS: &str =
        "mulled-v2-fe8faa35dbf6dc65a0f7f5d4ea12e31a79f73e40:4d0535c94ef45be8459f429561f0894c3fe0ebcf-0";

    #[test]
    fn identifiers_parse_into_variants() {
        let single = identifier_to_cached_target(
            "quay.io/biocontainers/samtools:1.3.1--py_1",
            HashFunc::V2,
            Some("biocontainers"),
        )
        .unwrap();
        assert_eq!(
            single,
            CachedMulledImage::SingleTarget {
                package_name: "samtools".into(),
                version: Some("1.3.1".into()),
                build: Some("py_1".into()),
                image_identifier: "quay.io/biocontainers/samtools:1.3.1--py_1".into(),
            }
        );

        let v2 = identifier_to_cached_target(V2_BWA_SAMTOOLS, HashFunc::V2, None).unwrap();
        assert!(matches!(
            v2,
            CachedMulledImage::V2MultiTarget { ref package_hash, ref version_hash, ref build, .. }
                if package_hash == "fe8faa35dbf6dc65a0f7f5d4ea12e31a79f73e40"
                    && version_hash.as_deref() == Some("4d0535c94ef45be8459f429561f0894c3fe0ebcf")
                    && build.as_deref() == Some("0")
        ));
        assert!(identifier_to_cached_target(V2_BWA_SAMTOOLS, HashFunc::V1, None).is_none());

        let v1 = identifier_to_cached_target("mulled-v1-abc:2", HashFunc::V1, None).unwrap();
        assert!(matches!(v1, CachedMulledImage::V1MultiTarget { ref build, .. } if build.as_deref() == Some("2")));

        let latest = identifier_to_cached_target("bwa:latest", HashFunc::V2, None).unwrap();
        assert!(matches!(latest, CachedMulledImage::SingleTarget { version: None, .. }));
    }

    #[test]
    fn single_target_match_requires_equal_version() {
        let cached = vec![identifier_to_cached_target("bwa", HashFunc::V2, None).unwrap()];
        assert!(find_best_matching_cached_image(&[t("bwa", Some("0.7.13"))], &cached, HashFunc::V2).is_none());
        let found = find_best_matching_cached_image(&[t("bwa", None)], &cached, HashFunc::V2).unwrap();
        assert_eq!(found.image_identifier(), "bwa");
    }

    #[test]
    fn unversioned_request_takes_first_listed() {
        let cached: Vec<_> = ["bwa:0.7.17--0", "bwa:0.7.13--1"]
            .iter()
            .filter_map(|i| identifier_to_cached_target(i, HashFunc::V2, None))
            .collect();
        let found = find_best_matching_cached_image(&[t("bwa", None)], &cached, HashFunc::V2).unwrap();
        assert_eq!(found.image_identifier(), "bwa:0.7.17--0");
        let found =
            find_best_matching_cached_image(&[t("bwa", Some("0.7.13"))], &cached, HashFunc::V2).unwrap();
        assert_eq!(found.image_identifier(), "bwa:0.7.13--1");
    }

    #[test]
    fn v2_match_rejects_version_hash_mismatch() {
        let other_versions =
            "mulled-v2-fe8faa35dbf6dc65a0f7f5d4ea12e31a79f73e40:0000000000000000000000000000000000000000-0";
        let cached: Vec<_> = [other_versions, V2_BWA_SAMTOOLS]
            .iter()
            .filter_map(|i| identifier_to_cached_target(i, HashFunc::V2, None))
            .collect();
        let targets = [t("samtools", Some("1.3.1")), t("bwa", Some("0.7.13"))];
        let found = find_best_matching_cached_image(&targets, &cached, HashFunc::V2).unwrap();
        assert_eq!(found.image_identifier(), V2_BWA_SAMTOOLS);

        let newer = [t("samtools", Some("1.9")), t("bwa", Some("0.7.13"))];
        assert!(find_best_matching_cached_image(&newer, &cached, HashFunc::V2).is_none());

        let versionless = [t("samtools", None), t("bwa", None)];
        let found = find_best_matching_cached_image(&versionless, &cached, HashFunc::V2).unwrap();
        assert_eq!(found.image_identifier(), other_versions);
    }

    #[test]
    fn v1_match_is_exact_hash() {
        let cached = vec![identifier_to_cached_target(
            "quay.io/biocontainers/mulled-v1-b06ecbd9141f0dbbc0c287375fc0813adfcbdfbd:0",
            HashFunc::V1,
            Some("biocontainers"),
        )
        .unwrap()];
        let targets = [t("samtools", Some("1.3.1")), t("bwa", Some("0.7.13"))];
        assert!(find_best_matching_cached_image(&targets, &cached, HashFunc::V1).is_some());
        let other = [t("samtools", Some("1.3.1")), t("bwa", None)];
        assert!(find_best_matching_cached_image(&other, &cached, HashFunc::V1).is_none());
    }

    #[test]
    fn docker_listing_is_filtered_and_cached() {
        let runner = FakeRunner::new("4.6.14");
        runner.respond("docker", |_| {
            CommandOutput::success().with_stdout(
                "quay.io/biocontainers/bwa:0.7.13--1\nquay.io/local/bwa:0.7.17--0\nbusybox:latest\nquay.io/biocontainers/bwa:0.7.17--0\n",
            )
        });
        let mut cache = ResolutionCache::new();
        let images =
            list_docker_cached_mulled_images(&runner, Some("biocontainers"), HashFunc::V2, &mut cache);
        let ids: Vec<_> = images.iter().map(|i| i.image_identifier()).collect();
        assert_eq!(
            ids,
            ["quay.io/biocontainers/bwa:0.7.17--0", "quay.io/biocontainers/bwa:0.7.13--1"]
        );

        let desc = docker_cached_container_description(
            &runner,
            &[t("bwa", Some("0.7.13"))],
            Some("biocontainers"),
            HashFunc::V2,
            "/bin/bash",
            &mut cache,
        )
        .unwrap();
        assert_eq!(desc.identifier(), "quay.io/biocontainers/bwa:0.7.13--1");
        assert_eq!(desc.shell, "/bin/bash");
        assert_eq!(runner.calls_for_program("docker").len(), 1);
    }

    #[test]
    fn failing_docker_lists_nothing() {
        let runner = FakeRunner::new("4.6.14");
        runner.respond("docker", |_| CommandOutput::failure(1, "Cannot connect to the Docker daemon"));
        let mut cache = ResolutionCache::new();
        assert!(list_docker_cached_mulled_images(&runner, None, HashFunc::V2, &mut cache).is_empty());
    }

    #[test]
    fn singularity_cache_directory_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("bwa:0.7.13--1"), "").unwrap();
        std::fs::write(tmp.path().join(V2_BWA_SAMTOOLS), "").unwrap();

        let desc = singularity_cached_container_description(
            &[t("bwa", Some("0.7.13"))],
            tmp.path(),
            HashFunc::V2,
            "/bin/sh",
        )
        .unwrap()
        .unwrap();
        assert_eq!(desc.container_type, ContainerType::Singularity);
        assert!(desc.identifier().ends_with("/bwa:0.7.13--1"));

        let missing = tmp.path().join("nope");
        assert!(singularity_cached_container_description(&[t("bwa", None)], &missing, HashFunc::V2, "/bin/sh")
            .unwrap()
            .is_none());
    }

    #[test]
    fn registry_names_for_single_and_multi_targets() {
        let source = FakeTags::default()
            .with("biocontainers", "bwa", &["0.7.13--1", "0.7.17--0"])
            .with(
                "biocontainers",
                "mulled-v2-fe8faa35dbf6dc65a0f7f5d4ea12e31a79f73e40",
                &["4d0535c94ef45be8459f429561f0894c3fe0ebcf-0", "ffffffffffffffffffffffffffffffffffffffff-0"],
            );
        let mut cache = ResolutionCache::new();

        let name = targets_to_mulled_name(&[t("bwa", Some("0.7.13"))], HashFunc::V2, "biocontainers", &mut cache, &source)
            .unwrap();
        assert_eq!(name.as_deref(), Some("bwa:0.7.13--1"));
        let name = targets_to_mulled_name(&[t("bwa", None)], HashFunc::V2, "biocontainers", &mut cache, &source)
            .unwrap();
        assert_eq!(name.as_deref(), Some("bwa:0.7.17--0"));

        let targets = [t("samtools", Some("1.3.1")), t("bwa", Some("0.7.13"))];
        let name = targets_to_mulled_name(&targets, HashFunc::V2, "biocontainers", &mut cache, &source).unwrap();
        assert_eq!(name.as_deref(), Some(V2_BWA_SAMTOOLS));
    }

    #[test]
    fn misses_are_remembered() {
        let source = FakeTags::default();
        let mut cache = ResolutionCache::new();
        let target = [t("nothere", Some("1.0"))];
        assert!(targets_to_mulled_name(&target, HashFunc::V2, "biocontainers", &mut cache, &source)
            .unwrap()
            .is_none());
        assert!(targets_to_mulled_name(&target, HashFunc::V2, "biocontainers", &mut cache, &source)
            .unwrap()
            .is_none());
        assert_eq!(source.lookups(), 1);
    }
}
