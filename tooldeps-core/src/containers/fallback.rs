// tooldeps-core/src/containers/fallback.rs
//! A fixed image, used when the rest of the chain found nothing.
use tooldeps_common::error::{DepsError, Result};
use tooldeps_common::model::{ContainerDescription, ContainerType, ToolInfo};

use super::resolver::ContainerResolver;
use super::ContainerResolveOptions;
use crate::deps::params::ResolverParams;
use crate::resolution_cache::ResolutionCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FallbackCondition {
    Always,
    NoRequirements,
    RequiresGalaxyEnvironment,
}

#[derive(Debug, Clone)]
pub struct FallbackContainerResolver {
    identifier: String,
    container_type: ContainerType,
    condition: FallbackCondition,
}

fn identifier_param(params: &ResolverParams) -> Result<String> {
    params
        .get_str("identifier")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DepsError::Config("fallback container resolvers need an identifier".to_string()))
}

fn container_type_param(params: &ResolverParams, default: ContainerType) -> Result<ContainerType> {
    match params.get_str("container_type") {
        Some(raw) => raw.parse(),
        None => Ok(default),
    }
}

impl FallbackContainerResolver {
    pub fn any(params: &ResolverParams, container_type: ContainerType) -> Result<Self> {
        Ok(Self {
            identifier: identifier_param(params)?,
            container_type,
            condition: FallbackCondition::Always,
        })
    }

    /// Only for tools that declare neither requirements nor containers.
    pub fn no_requirements(params: &ResolverParams) -> Result<Self> {
        Ok(Self {
            identifier: identifier_param(params)?,
            container_type: container_type_param(params, ContainerType::Docker)?,
            condition: FallbackCondition::NoRequirements,
        })
    }

    /// Only for tools that need the host's own Python environment.
    pub fn requires_galaxy_environment(params: &ResolverParams) -> Result<Self> {
        Ok(Self {
            identifier: identifier_param(params)?,
            container_type: container_type_param(params, ContainerType::Docker)?,
            condition: FallbackCondition::RequiresGalaxyEnvironment,
        })
    }

    fn matches(&self, tool_info: &ToolInfo) -> bool {
        match self.condition {
            FallbackCondition::Always => true,
            FallbackCondition::NoRequirements => {
                tool_info.requirements.is_empty() && tool_info.container_descriptions.is_empty()
            }
            FallbackCondition::RequiresGalaxyEnvironment => tool_info.requires_galaxy_python_environment,
        }
    }
}

impl ContainerResolver for FallbackContainerResolver {
    fn resolver_type(&self) -> &'static str {
        match (self.condition, self.container_type) {
            (FallbackCondition::Always, ContainerType::Docker) => "fallback",
            (FallbackCondition::Always, ContainerType::Singularity) => "fallback_singularity",
            (FallbackCondition::NoRequirements, _) => "fallback_no_requirements",
            (FallbackCondition::RequiresGalaxyEnvironment, _) => "requires_galaxy_environment",
        }
    }

    fn container_type(&self) -> Option<ContainerType> {
        Some(self.container_type)
    }

    fn resolve(
        &self,
        enabled_types: &[ContainerType],
        tool_info: &ToolInfo,
        _options: &ContainerResolveOptions,
        _cache: &mut ResolutionCache,
    ) -> Result<Option<ContainerDescription>> {
        if !enabled_types.contains(&self.container_type) || !self.matches(tool_info) {
            return Ok(None);
        }
        Ok(Some(ContainerDescription::new(&self.identifier, self.container_type)))
    }

    fn describe(&self) -> Vec<(String, String)> {
        vec![("identifier".to_string(), self.identifier.clone())]
    }
}

#[cfg(test)]
mod tests {
    use tooldeps_common::model::ToolRequirement;

    use super::*;

    fn resolve(resolver: &FallbackContainerResolver, info: &ToolInfo) -> Option<ContainerDescription> {
        resolver
            .resolve(
                &[ContainerType::Docker, ContainerType::Singularity],
                info,
                &ContainerResolveOptions::default(),
                &mut ResolutionCache::new(),
            )
            .unwrap()
    }

    #[test]
    fn identifier_is_required() {
        assert!(FallbackContainerResolver::any(&ResolverParams::new(), ContainerType::Docker).is_err());
    }

    #[test]
    fn conditions_gate_the_fallback() {
        let params = ResolverParams::new().with("identifier", "quay.io/bgruening/busybox-bash:0.1");
        let with_requirements = ToolInfo::from_requirements(
            [ToolRequirement::package("bwa", Some("0.7.13"))].into_iter().collect(),
        );
        let bare = ToolInfo::default();

        let always = FallbackContainerResolver::any(&params, ContainerType::Docker).unwrap();
        assert!(resolve(&always, &with_requirements).is_some());

        let no_requirements = FallbackContainerResolver::no_requirements(&params).unwrap();
        assert!(resolve(&no_requirements, &with_requirements).is_none());
        assert_eq!(
            resolve(&no_requirements, &bare).unwrap().identifier(),
            "quay.io/bgruening/busybox-bash:0.1"
        );

        let galaxy = FallbackContainerResolver::requires_galaxy_environment(&params).unwrap();
        assert!(resolve(&galaxy, &bare).is_none());
        let needs_env = ToolInfo {
            requires_galaxy_python_environment: true,
            ..ToolInfo::default()
        };
        assert!(resolve(&galaxy, &needs_env).is_some());
    }

    #[test]
    fn disabled_type_is_skipped() {
        let params = ResolverParams::new().with("identifier", "/images/default.sif");
        let r = FallbackContainerResolver::any(&params, ContainerType::Singularity).unwrap();
        let found = r
            .resolve(
                &[ContainerType::Docker],
                &ToolInfo::default(),
                &ContainerResolveOptions::default(),
                &mut ResolutionCache::new(),
            )
            .unwrap();
        assert!(found.is_none());
    }
}
