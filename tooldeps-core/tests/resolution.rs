// tooldeps-core/tests/resolution.rs
use std::fs;
use std::path::Path;

use tooldeps_common::model::{
    ContainerDescription, ContainerType, RequirementType, ToolInfo, ToolRequirement,
    ToolRequirements,
};
use tooldeps_common::Config;
use tooldeps_core::deps::params::parse_resolver_descriptors;
use tooldeps_core::mulled::{build_target, HashFunc};
use tooldeps_core::{
    ContainerRegistry, ContainerResolveOptions, DependencyManager, ResolutionCache, ResolveOptions,
    ResolverServices,
};

fn offline_services(root: &Path) -> ResolverServices {
    ResolverServices::offline(Config::for_root(root), false)
}

fn requirements(raw: &[&str]) -> ToolRequirements {
    raw.iter()
        .map(|r| ToolRequirement::parse(r, RequirementType::Package).unwrap())
        .collect()
}

#[test]
fn package_layout_resolves_through_the_chain() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("packages");
    fs::create_dir_all(base.join("bwa/0.7.13/bin")).unwrap();
    let yaml = format!(
        "- type: galaxy_packages\n  base_path: {}\n",
        base.display()
    );
    let services = offline_services(tmp.path());
    let manager =
        DependencyManager::new(&services, &parse_resolver_descriptors(&yaml).unwrap()).unwrap();

    let options = ResolveOptions {
        return_null: true,
        ..ResolveOptions::default()
    };
    let resolved = manager
        .requirements_to_dependencies(&requirements(&["bwa=0.7.13", "samtools=1.3.1"]), &options)
        .unwrap();
    let types: Vec<&str> = resolved.values().map(|d| d.dependency_type()).collect();
    assert_eq!(types, vec!["galaxy_package", "null"]);

    let shell = manager
        .dependency_shell_commands(&requirements(&["bwa=0.7.13"]), &options)
        .unwrap();
    assert_eq!(shell.len(), 1);
    assert!(shell[0].contains("export PACKAGE_BASE"));
    assert!(shell[0].contains("/bin:$PATH"));
}

#[test]
fn container_chain_prefers_declared_images() {
    let tmp = tempfile::tempdir().unwrap();
    let yaml = "
- type: explicit
- type: fallback
  identifier: quay.io/bgruening/busybox-bash:0.1
";
    let services = offline_services(tmp.path());
    let registry =
        ContainerRegistry::new(&services, &parse_resolver_descriptors(yaml).unwrap()).unwrap();
    let mut cache = ResolutionCache::new();
    let options = ContainerResolveOptions::default();

    let mut declared = ToolInfo::from_requirements(requirements(&["bwa=0.7.13"]));
    declared.container_descriptions = vec![ContainerDescription::new(
        "quay.io/biocontainers/bwa:0.7.13--1",
        ContainerType::Docker,
    )];
    let found = registry
        .resolve(&[ContainerType::Docker], &declared, &options, &mut cache)
        .unwrap()
        .unwrap();
    assert_eq!(found.resolver_type, "explicit");

    let bare = ToolInfo::from_requirements(requirements(&["bwa=0.7.13"]));
    let found = registry
        .find_best_container_description(&[ContainerType::Docker], &bare, &options, &mut cache)
        .unwrap()
        .unwrap();
    assert_eq!(found.identifier(), "quay.io/bgruening/busybox-bash:0.1");

    assert!(registry
        .resolve(&[ContainerType::Singularity], &bare, &options, &mut cache)
        .unwrap()
        .is_none());
}

#[test]
fn mulled_names_are_order_independent() {
    let samtools = build_target("samtools", Some("1.3.1"), None, None);
    let bwa = build_target("bwa", Some("0.7.13"), None, None);
    let forward = HashFunc::V2.image_name(&[samtools.clone(), bwa.clone()], None, None);
    let backward = HashFunc::V2.image_name(&[bwa, samtools], None, None);
    assert_eq!(forward, backward);
    assert_eq!(
        forward,
        "mulled-v2-fe8faa35dbf6dc65a0f7f5d4ea12e31a79f73e40:4d0535c94ef45be8459f429561f0894c3fe0ebcf"
    );
}
