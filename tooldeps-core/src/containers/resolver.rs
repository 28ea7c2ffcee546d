// tooldeps-core/src/containers/resolver.rs
use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use tooldeps_common::error::{DepsError, Result};
use tooldeps_common::model::{ContainerDescription, ContainerType, ToolInfo};

use super::explicit::{ExplicitContainerResolver, ExplicitSingularityContainerResolver};
use super::fallback::FallbackContainerResolver;
use super::mulled::{
    docker_available, BuildMulledContainerResolver, CachedMulledContainerResolver,
    MulledContainerResolver,
};
use super::ContainerResolveOptions;
use crate::deps::params::{ResolverDescriptor, ResolverParams};
use crate::resolution_cache::ResolutionCache;
use crate::services::ResolverServices;

/// One backend of the container chain.
pub trait ContainerResolver: Send + Sync + fmt::Debug {
    fn resolver_type(&self) -> &'static str;

    /// The only container type this resolver produces, if it is tied to one.
    fn container_type(&self) -> Option<ContainerType> {
        None
    }

    /// Resolvers that build images are only consulted when installing.
    fn builds_on_resolution(&self) -> bool {
        false
    }

    fn resolve(
        &self,
        enabled_types: &[ContainerType],
        tool_info: &ToolInfo,
        options: &ContainerResolveOptions,
        cache: &mut ResolutionCache,
    ) -> Result<Option<ContainerDescription>>;

    fn describe(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

pub type ContainerResolverFactory =
    fn(&ResolverServices, &ResolverParams) -> Result<Box<dyn ContainerResolver>>;

type Built = Result<Box<dyn ContainerResolver>>;

fn explicit(_: &ResolverServices, _: &ResolverParams) -> Built {
    Ok(Box::new(ExplicitContainerResolver))
}

fn explicit_singularity(_: &ResolverServices, _: &ResolverParams) -> Built {
    Ok(Box::new(ExplicitSingularityContainerResolver))
}

fn cached_mulled(services: &ResolverServices, params: &ResolverParams) -> Built {
    Ok(Box::new(CachedMulledContainerResolver::new(services, params, ContainerType::Docker)?))
}

fn cached_mulled_singularity(services: &ResolverServices, params: &ResolverParams) -> Built {
    Ok(Box::new(CachedMulledContainerResolver::new(services, params, ContainerType::Singularity)?))
}

fn mulled(services: &ResolverServices, params: &ResolverParams) -> Built {
    Ok(Box::new(MulledContainerResolver::new(services, params, ContainerType::Docker)?))
}

fn mulled_singularity(services: &ResolverServices, params: &ResolverParams) -> Built {
    Ok(Box::new(MulledContainerResolver::new(services, params, ContainerType::Singularity)?))
}

fn build_mulled(services: &ResolverServices, params: &ResolverParams) -> Built {
    Ok(Box::new(BuildMulledContainerResolver::new(services, params, ContainerType::Docker)?))
}

fn build_mulled_singularity(services: &ResolverServices, params: &ResolverParams) -> Built {
    Ok(Box::new(BuildMulledContainerResolver::new(services, params, ContainerType::Singularity)?))
}

fn fallback(_: &ResolverServices, params: &ResolverParams) -> Built {
    Ok(Box::new(FallbackContainerResolver::any(params, ContainerType::Docker)?))
}

fn fallback_singularity(_: &ResolverServices, params: &ResolverParams) -> Built {
    Ok(Box::new(FallbackContainerResolver::any(params, ContainerType::Singularity)?))
}

fn fallback_no_requirements(_: &ResolverServices, params: &ResolverParams) -> Built {
    Ok(Box::new(FallbackContainerResolver::no_requirements(params)?))
}

fn requires_galaxy_environment(_: &ResolverServices, params: &ResolverParams) -> Built {
    Ok(Box::new(FallbackContainerResolver::requires_galaxy_environment(params)?))
}

static CONTAINER_RESOLVERS: Lazy<HashMap<&'static str, ContainerResolverFactory>> = Lazy::new(|| {
    let mut registry: HashMap<&'static str, ContainerResolverFactory> = HashMap::new();
    registry.insert("explicit", explicit);
    registry.insert("explicit_singularity", explicit_singularity);
    registry.insert("cached_mulled", cached_mulled);
    registry.insert("cached_mulled_singularity", cached_mulled_singularity);
    registry.insert("mulled", mulled);
    registry.insert("mulled_singularity", mulled_singularity);
    registry.insert("build_mulled", build_mulled);
    registry.insert("build_mulled_singularity", build_mulled_singularity);
    registry.insert("fallback", fallback);
    registry.insert("fallback_singularity", fallback_singularity);
    registry.insert("fallback_no_requirements", fallback_no_requirements);
    registry.insert("requires_galaxy_environment", requires_galaxy_environment);
    registry
});

pub fn container_resolver_types() -> Vec<&'static str> {
    let mut types: Vec<_> = CONTAINER_RESOLVERS.keys().copied().collect();
    types.sort_unstable();
    types
}

pub fn build_container_resolver(
    services: &ResolverServices,
    descriptor: &ResolverDescriptor,
) -> Result<Box<dyn ContainerResolver>> {
    let factory = CONTAINER_RESOLVERS
        .get(descriptor.resolver_type.as_str())
        .ok_or_else(|| {
            DepsError::Config(format!(
                "Unknown container resolver type '{}' (known: {})",
                descriptor.resolver_type,
                container_resolver_types().join(", ")
            ))
        })?;
    factory(services, &descriptor.params)
}

/// Chain used when no container resolver configuration exists. Image
/// building needs a docker daemon, so those resolvers are only added when
/// the docker CLI is on `PATH`.
pub fn default_container_resolvers(enable_mulled_containers: bool) -> Vec<ResolverDescriptor> {
    let mut chain = vec![
        ResolverDescriptor::new("explicit", ResolverParams::new()),
        ResolverDescriptor::new("explicit_singularity", ResolverParams::new()),
    ];
    if !enable_mulled_containers {
        return chain;
    }
    let namespace = |ns: &str| ResolverParams::new().with("namespace", ns);
    chain.extend([
        ResolverDescriptor::new("cached_mulled", namespace("biocontainers")),
        ResolverDescriptor::new("cached_mulled", namespace("local")),
        ResolverDescriptor::new("cached_mulled_singularity", namespace("biocontainers")),
        ResolverDescriptor::new("cached_mulled_singularity", namespace("local")),
        ResolverDescriptor::new("mulled", namespace("biocontainers")),
        ResolverDescriptor::new("mulled_singularity", namespace("biocontainers")),
    ]);
    if docker_available() {
        chain.extend([
            ResolverDescriptor::new("build_mulled", ResolverParams::new()),
            ResolverDescriptor::new("build_mulled_singularity", ResolverParams::new()),
        ]);
    }
    chain
}
