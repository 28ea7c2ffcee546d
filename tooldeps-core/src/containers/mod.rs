// tooldeps-core/src/containers/mod.rs
//! Container resolver chain: finds the image a tool should run in.
pub mod explicit;
pub mod fallback;
pub mod mulled;
pub mod resolver;

use tooldeps_common::error::Result;
use tooldeps_common::model::{ContainerDescription, ContainerType, ToolInfo};
use tracing::{debug, info, warn};

use crate::deps::params::{load_resolver_descriptors, ResolverDescriptor};
use crate::resolution_cache::ResolutionCache;
use crate::services::ResolverServices;
pub use resolver::{
    build_container_resolver, container_resolver_types, default_container_resolvers,
    ContainerResolver,
};

/// Per-request filters for the container chain.
#[derive(Debug, Clone, Default)]
pub struct ContainerResolveOptions {
    /// Only consult the resolver at this position.
    pub index: Option<usize>,
    /// Only consult resolvers of this type.
    pub resolver_type: Option<String>,
    /// Allow pulling and building images.
    pub install: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContainerDescription {
    pub description: ContainerDescription,
    pub resolver_type: &'static str,
    /// Position of the resolver in the chain.
    pub index: usize,
}

#[derive(Debug)]
pub struct ContainerRegistry {
    resolvers: Vec<Box<dyn ContainerResolver>>,
}

impl ContainerRegistry {
    pub fn new(services: &ResolverServices, descriptors: &[ResolverDescriptor]) -> Result<Self> {
        let resolvers = descriptors
            .iter()
            .map(|d| build_container_resolver(services, d))
            .collect::<Result<Vec<_>>>()?;
        debug!("Built container resolver chain with {} resolvers", resolvers.len());
        Ok(Self { resolvers })
    }

    /// The configured chain, or the default one.
    pub fn from_config(services: &ResolverServices) -> Result<Self> {
        let config = &services.config;
        let descriptors = match &config.container_resolvers_config_file {
            Some(path) => {
                info!("Loading container resolvers from {}", path.display());
                load_resolver_descriptors(path)?
            }
            None => default_container_resolvers(config.enable_mulled_containers),
        };
        Self::new(services, &descriptors)
    }

    pub fn from_resolvers(resolvers: Vec<Box<dyn ContainerResolver>>) -> Self {
        Self { resolvers }
    }

    pub fn resolvers(&self) -> &[Box<dyn ContainerResolver>] {
        &self.resolvers
    }

    /// First description of an enabled type, in chain order.
    pub fn resolve(
        &self,
        enabled_types: &[ContainerType],
        tool_info: &ToolInfo,
        options: &ContainerResolveOptions,
        cache: &mut ResolutionCache,
    ) -> Result<Option<ResolvedContainerDescription>> {
        for (index, resolver) in self.resolvers.iter().enumerate() {
            if options.index.is_some_and(|i| i != index) {
                continue;
            }
            if options
                .resolver_type
                .as_deref()
                .is_some_and(|t| t != resolver.resolver_type())
            {
                continue;
            }
            if resolver
                .container_type()
                .is_some_and(|t| !enabled_types.contains(&t))
            {
                continue;
            }
            if !options.install && resolver.builds_on_resolution() {
                continue;
            }

            let description = match resolver.resolve(enabled_types, tool_info, options, cache) {
                Ok(description) => description,
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(
                        "Container resolver {} [{}] failed: {}",
                        resolver.resolver_type(),
                        index,
                        e
                    );
                    continue;
                }
            };
            if let Some(description) = description {
                debug!(
                    "Container resolver {} [{}] found {}",
                    resolver.resolver_type(),
                    index,
                    description
                );
                return Ok(Some(ResolvedContainerDescription {
                    description,
                    resolver_type: resolver.resolver_type(),
                    index,
                }));
            }
        }
        Ok(None)
    }

    pub fn find_best_container_description(
        &self,
        enabled_types: &[ContainerType],
        tool_info: &ToolInfo,
        options: &ContainerResolveOptions,
        cache: &mut ResolutionCache,
    ) -> Result<Option<ContainerDescription>> {
        Ok(self
            .resolve(enabled_types, tool_info, options, cache)?
            .map(|resolved| resolved.description))
    }
}
