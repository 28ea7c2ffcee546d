// tooldeps-core/src/containers/explicit.rs
//! Containers the tool names itself.
use tooldeps_common::error::Result;
use tooldeps_common::model::{ContainerDescription, ContainerType, ToolInfo};

use super::resolver::ContainerResolver;
use super::ContainerResolveOptions;
use crate::resolution_cache::ResolutionCache;

/// First declared container of an enabled type.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExplicitContainerResolver;

impl ContainerResolver for ExplicitContainerResolver {
    fn resolver_type(&self) -> &'static str {
        "explicit"
    }

    fn resolve(
        &self,
        enabled_types: &[ContainerType],
        tool_info: &ToolInfo,
        _options: &ContainerResolveOptions,
        _cache: &mut ResolutionCache,
    ) -> Result<Option<ContainerDescription>> {
        Ok(tool_info
            .container_descriptions
            .iter()
            .find(|d| enabled_types.contains(&d.container_type))
            .map(|d| d.clone().into_explicit()))
    }
}

/// Declared containers run with singularity; docker images are pulled
/// through `docker://`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExplicitSingularityContainerResolver;

fn as_singularity(description: &ContainerDescription) -> ContainerDescription {
    match description.container_type {
        ContainerType::Singularity => description.clone(),
        ContainerType::Docker => ContainerDescription::new(
            &format!("docker://{}", description.identifier()),
            ContainerType::Singularity,
        )
        .with_shell(description.shell.clone())
        .with_resolve_dependencies(description.resolve_dependencies),
    }
}

impl ContainerResolver for ExplicitSingularityContainerResolver {
    fn resolver_type(&self) -> &'static str {
        "explicit_singularity"
    }

    fn container_type(&self) -> Option<ContainerType> {
        Some(ContainerType::Singularity)
    }

    fn resolve(
        &self,
        _enabled_types: &[ContainerType],
        tool_info: &ToolInfo,
        _options: &ContainerResolveOptions,
        _cache: &mut ResolutionCache,
    ) -> Result<Option<ContainerDescription>> {
        Ok(tool_info
            .container_descriptions
            .first()
            .map(|d| as_singularity(d).into_explicit()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_info(descriptions: Vec<ContainerDescription>) -> ToolInfo {
        ToolInfo {
            container_descriptions: descriptions,
            ..ToolInfo::default()
        }
    }

    #[test]
    fn explicit_picks_first_enabled_type() {
        let info = tool_info(vec![
            ContainerDescription::new("/images/bwa.sif", ContainerType::Singularity),
            ContainerDescription::new("quay.io/biocontainers/bwa:0.7.13--1", ContainerType::Docker),
        ]);
        let mut cache = ResolutionCache::new();
        let options = ContainerResolveOptions::default();

        let found = ExplicitContainerResolver
            .resolve(&[ContainerType::Docker], &info, &options, &mut cache)
            .unwrap()
            .unwrap();
        assert_eq!(found.identifier(), "quay.io/biocontainers/bwa:0.7.13--1");
        assert!(found.explicit);

        let none = ExplicitContainerResolver
            .resolve(&[], &info, &options, &mut cache)
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn docker_descriptions_become_docker_uris() {
        let info = tool_info(vec![ContainerDescription::new(
            "quay.io/biocontainers/bwa:0.7.13--1",
            ContainerType::Docker,
        )
        .with_shell("/bin/bash")]);
        let found = ExplicitSingularityContainerResolver
            .resolve(
                &[ContainerType::Singularity],
                &info,
                &ContainerResolveOptions::default(),
                &mut ResolutionCache::new(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(found.container_type, ContainerType::Singularity);
        assert_eq!(found.identifier(), "docker://quay.io/biocontainers/bwa:0.7.13--1");
        assert_eq!(found.shell, "/bin/bash");
    }
}
