// tooldeps-core/src/deps/resolver.rs
use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use tooldeps_common::error::{DepsError, Result};
use tooldeps_common::model::{ToolRequirement, ToolRequirements};

use super::dependency::Dependency;
use super::params::{ResolverDescriptor, ResolverParams};
use super::resolvers::{
    conda::CondaDependencyResolver, galaxy_packages::GalaxyPackageDependencyResolver,
    lmod::LmodDependencyResolver, modules::ModuleDependencyResolver,
    tool_shed_packages::ToolShedPackageDependencyResolver,
};
use super::ResolveOptions;
use crate::services::ResolverServices;

/// One backend of the dependency chain.
pub trait DependencyResolver: Send + Sync + fmt::Debug {
    fn resolver_type(&self) -> &'static str;

    /// Disabled resolvers are skipped by the chain.
    fn disabled(&self) -> bool {
        false
    }

    fn resolve(&self, requirement: &ToolRequirement, options: &ResolveOptions) -> Result<Dependency>;

    fn supports_resolve_all(&self) -> bool {
        false
    }

    /// Resolves the whole set at once, one dependency per requirement in
    /// order, or `None` when this resolver cannot.
    fn resolve_all(
        &self,
        _requirements: &ToolRequirements,
        _options: &ResolveOptions,
    ) -> Result<Option<Vec<Dependency>>> {
        Ok(None)
    }

    /// Requirements this resolver could satisfy right now, for listings.
    fn list_dependencies(&self) -> Result<Vec<ToolRequirement>> {
        Ok(Vec::new())
    }

    /// `key=value` pairs shown in listings.
    fn describe(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

pub type DependencyResolverFactory =
    fn(&ResolverServices, &ResolverParams) -> Result<Box<dyn DependencyResolver>>;

fn galaxy_packages(
    services: &ResolverServices,
    params: &ResolverParams,
) -> Result<Box<dyn DependencyResolver>> {
    Ok(Box::new(GalaxyPackageDependencyResolver::new(services, params)?))
}

fn tool_shed_packages(
    services: &ResolverServices,
    params: &ResolverParams,
) -> Result<Box<dyn DependencyResolver>> {
    Ok(Box::new(ToolShedPackageDependencyResolver::new(services, params)?))
}

fn conda(services: &ResolverServices, params: &ResolverParams) -> Result<Box<dyn DependencyResolver>> {
    Ok(Box::new(CondaDependencyResolver::new(services, params)?))
}

fn modules(
    services: &ResolverServices,
    params: &ResolverParams,
) -> Result<Box<dyn DependencyResolver>> {
    Ok(Box::new(ModuleDependencyResolver::new(services, params)?))
}

fn lmod(services: &ResolverServices, params: &ResolverParams) -> Result<Box<dyn DependencyResolver>> {
    Ok(Box::new(LmodDependencyResolver::new(services, params)?))
}

static DEPENDENCY_RESOLVERS: Lazy<HashMap<&'static str, DependencyResolverFactory>> =
    Lazy::new(|| {
        let mut registry: HashMap<&'static str, DependencyResolverFactory> = HashMap::new();
        registry.insert("galaxy_packages", galaxy_packages);
        registry.insert("tool_shed_packages", tool_shed_packages);
        registry.insert("conda", conda);
        registry.insert("modules", modules);
        registry.insert("lmod", lmod);
        registry
    });

pub fn dependency_resolver_types() -> Vec<&'static str> {
    let mut types: Vec<_> = DEPENDENCY_RESOLVERS.keys().copied().collect();
    types.sort_unstable();
    types
}

pub fn build_dependency_resolver(
    services: &ResolverServices,
    descriptor: &ResolverDescriptor,
) -> Result<Box<dyn DependencyResolver>> {
    let factory = DEPENDENCY_RESOLVERS
        .get(descriptor.resolver_type.as_str())
        .ok_or_else(|| {
            DepsError::Config(format!(
                "Unknown dependency resolver type '{}' (known: {})",
                descriptor.resolver_type,
                dependency_resolver_types().join(", ")
            ))
        })?;
    factory(services, &descriptor.params)
}

/// Chain used when no resolver configuration exists.
pub fn default_dependency_resolvers() -> Vec<ResolverDescriptor> {
    let versionless = || ResolverParams::new().with("versionless", true);
    vec![
        ResolverDescriptor::new("tool_shed_packages", ResolverParams::new()),
        ResolverDescriptor::new("galaxy_packages", ResolverParams::new()),
        ResolverDescriptor::new("conda", ResolverParams::new()),
        ResolverDescriptor::new("galaxy_packages", versionless()),
        ResolverDescriptor::new("conda", versionless()),
    ]
}
