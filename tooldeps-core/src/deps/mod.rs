// tooldeps-core/src/deps/mod.rs
//! Dependency resolver chain: requirements in, shell activation text out.
pub mod dependency;
pub mod installed;
pub mod mapping;
pub mod params;
pub mod resolver;
pub mod resolvers;

use std::path::PathBuf;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tooldeps_common::error::Result;
use tooldeps_common::model::{
    ContainerType, RequirementType, ToolInfo, ToolRequirement, ToolRequirements,
};
use tracing::{debug, info, warn};

pub use dependency::{ContainerDependency, Dependency};
use installed::InstalledToolDependency;
use params::{load_resolver_descriptors, ResolverDescriptor};
pub use resolver::{build_dependency_resolver, default_dependency_resolvers, DependencyResolver};

use crate::containers::{ContainerRegistry, ContainerResolveOptions};
use crate::resolution_cache::ResolutionCache;
use crate::services::ResolverServices;

/// Per-request knobs for the dependency chain.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Only consult the resolver at this position.
    pub index: Option<usize>,
    /// Only consult resolvers of this type.
    pub resolver_type: Option<String>,
    /// Reject results that dropped version information.
    pub exact: bool,
    /// Install missing dependencies where a resolver can.
    pub install: bool,
    /// Keep unresolved requirements in the result as Null dependencies.
    pub return_null: bool,
    /// Binds conda environments to this job's working directory.
    pub job_directory: Option<PathBuf>,
    /// Resolving for a metadata-setting job rather than the tool itself.
    pub metadata: bool,
    pub preserve_python_environment: bool,
    /// Overrides the tool shed install list the resolvers were built with.
    pub installed_tool_dependencies: Option<Vec<InstalledToolDependency>>,
    /// Fall back to a container when no resolver found anything.
    pub include_containers: bool,
    pub container_type: Option<ContainerType>,
}

#[derive(Debug)]
pub struct DependencyManager {
    resolvers: Vec<Box<dyn DependencyResolver>>,
    containers: Option<Arc<ContainerRegistry>>,
}

impl DependencyManager {
    pub fn new(services: &ResolverServices, descriptors: &[ResolverDescriptor]) -> Result<Self> {
        let resolvers = descriptors
            .iter()
            .map(|d| build_dependency_resolver(services, d))
            .collect::<Result<Vec<_>>>()?;
        debug!("Built dependency resolver chain with {} resolvers", resolvers.len());
        Ok(Self::from_resolvers(resolvers))
    }

    /// The configured chain, or the default one.
    pub fn from_config(services: &ResolverServices) -> Result<Self> {
        let descriptors = match &services.config.dependency_resolvers_config_file {
            Some(path) => {
                info!("Loading dependency resolvers from {}", path.display());
                load_resolver_descriptors(path)?
            }
            None => default_dependency_resolvers(),
        };
        Self::new(services, &descriptors)
    }

    pub fn from_resolvers(resolvers: Vec<Box<dyn DependencyResolver>>) -> Self {
        Self {
            resolvers,
            containers: None,
        }
    }

    pub fn with_container_registry(mut self, registry: Arc<ContainerRegistry>) -> Self {
        self.containers = Some(registry);
        self
    }

    pub fn resolvers(&self) -> &[Box<dyn DependencyResolver>] {
        &self.resolvers
    }

    /// Walks the chain until every resolvable requirement has a dependency.
    /// The result is in requirement order.
    pub fn requirements_to_dependencies(
        &self,
        requirements: &ToolRequirements,
        options: &ResolveOptions,
    ) -> Result<IndexMap<ToolRequirement, Dependency>> {
        let requirements = requirements.resolvable();
        let mut resolved: IndexMap<ToolRequirement, Dependency> = IndexMap::new();

        for (index, resolver) in self.resolvers.iter().enumerate() {
            if resolved.len() == requirements.len() {
                break;
            }
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
            if resolver.disabled() {
                continue;
            }

            if resolver.supports_resolve_all() && resolved.is_empty() {
                match resolver.resolve_all(&requirements, options) {
                    Ok(Some(dependencies))
                        if !dependencies.is_empty()
                            && (!options.exact || dependencies.iter().all(Dependency::exact)) =>
                    {
                        debug!(
                            "Resolver {} [{}] resolved all {} requirements",
                            resolver.resolver_type(),
                            index,
                            dependencies.len()
                        );
                        for (requirement, dependency) in requirements.iter().zip(dependencies) {
                            resolved.insert(requirement.clone(), dependency);
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(e) if e.is_retryable() => return Err(e),
                    Err(e) => warn!(
                        "Resolver {} [{}] failed to resolve all requirements: {}",
                        resolver.resolver_type(),
                        index,
                        e
                    ),
                }
            }

            for requirement in requirements.iter() {
                if resolved.contains_key(requirement) {
                    continue;
                }
                let dependency = match resolver.resolve(requirement, options) {
                    Ok(dependency) => dependency,
                    Err(e) if e.is_retryable() => return Err(e),
                    Err(e) => {
                        warn!(
                            "Resolver {} [{}] failed on {}: {}",
                            resolver.resolver_type(),
                            index,
                            requirement,
                            e
                        );
                        continue;
                    }
                };
                if options.exact && !dependency.exact() {
                    debug!("Skipping inexact {}", dependency.resolver_msg());
                    continue;
                }
                if !dependency.is_null() {
                    debug!("{}", dependency.resolver_msg());
                    resolved.insert(requirement.clone(), dependency);
                }
            }
        }

        if resolved.is_empty() && options.include_containers {
            self.resolve_containers(&requirements, options, &mut resolved)?;
        }

        let mut ordered = IndexMap::with_capacity(requirements.len());
        for requirement in requirements.iter() {
            match resolved.swap_remove(requirement) {
                Some(dependency) => {
                    ordered.insert(requirement.clone(), dependency);
                }
                None if options.return_null => {
                    ordered.insert(
                        requirement.clone(),
                        Dependency::null(&requirement.name, requirement.version.as_deref()),
                    );
                }
                None => debug!("No dependency found for {}", requirement),
            }
        }
        Ok(ordered)
    }

    fn resolve_containers(
        &self,
        requirements: &ToolRequirements,
        options: &ResolveOptions,
        resolved: &mut IndexMap<ToolRequirement, Dependency>,
    ) -> Result<()> {
        let Some(registry) = &self.containers else {
            return Ok(());
        };
        let enabled = match options.container_type {
            Some(container_type) => vec![container_type],
            None => vec![ContainerType::Docker, ContainerType::Singularity],
        };
        let container_options = ContainerResolveOptions {
            install: options.install,
            ..ContainerResolveOptions::default()
        };
        let tool_info = ToolInfo::from_requirements(requirements.clone());
        let mut cache = ResolutionCache::new();
        let Some(found) = registry.resolve(&enabled, &tool_info, &container_options, &mut cache)? else {
            return Ok(());
        };
        for requirement in requirements.iter() {
            resolved.insert(
                requirement.clone(),
                Dependency::Container(ContainerDependency {
                    name: requirement.name.clone(),
                    version: requirement.version.clone(),
                    exact: true,
                    description: found.description.clone(),
                    resolver_type: found.resolver_type,
                }),
            );
        }
        Ok(())
    }

    /// Shell text of every resolved dependency, in order, each distinct text
    /// once.
    pub fn dependency_shell_commands(
        &self,
        requirements: &ToolRequirements,
        options: &ResolveOptions,
    ) -> Result<Vec<String>> {
        let mut commands = IndexSet::new();
        for dependency in self.requirements_to_dependencies(requirements, options)?.values() {
            if let Some(text) = dependency.shell_commands()? {
                commands.insert(text);
            }
        }
        Ok(commands.into_iter().collect())
    }

    /// The chain's answer for one requirement, Null when nothing matched.
    pub fn find_dep(
        &self,
        name: &str,
        version: Option<&str>,
        requirement_type: RequirementType,
        options: &ResolveOptions,
    ) -> Result<Dependency> {
        let requirement = ToolRequirement::new(name, version, requirement_type);
        let requirements: ToolRequirements = [requirement].into_iter().collect();
        Ok(self
            .requirements_to_dependencies(&requirements, options)?
            .into_values()
            .next()
            .unwrap_or_else(|| Dependency::null(name, version)))
    }

    pub fn uses_tool_shed_dependencies(&self) -> bool {
        self.resolvers
            .iter()
            .any(|r| r.resolver_type() == "tool_shed_packages")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tooldeps_common::error::DepsError;
    use tooldeps_common::model::ContainerDescription;

    use super::*;
    use crate::containers::explicit::ExplicitContainerResolver;
    use crate::containers::ContainerResolver;
    use crate::deps::dependency::PackageDependency;
    use crate::deps::params::ResolverParams;
    use crate::test_support::{install_fake_conda, services, FakeRunner};
    use tooldeps_common::remote::Offline;

    /// Answers from a fixed table of (name, exact) and records what it was
    /// asked.
    #[derive(Debug)]
    struct Table {
        kind: &'static str,
        known: Vec<(&'static str, bool)>,
        asked: Mutex<Vec<String>>,
        error: Option<DepsError>,
    }

    impl Table {
        fn new(kind: &'static str, known: &[(&'static str, bool)]) -> Self {
            Self {
                kind,
                known: known.to_vec(),
                asked: Mutex::new(Vec::new()),
                error: None,
            }
        }

        fn failing(kind: &'static str, error: DepsError) -> Self {
            Self {
                error: Some(error),
                ..Self::new(kind, &[])
            }
        }
    }

    impl DependencyResolver for Table {
        fn resolver_type(&self) -> &'static str {
            self.kind
        }

        fn resolve(&self, requirement: &ToolRequirement, _options: &ResolveOptions) -> Result<Dependency> {
            self.asked.lock().unwrap().push(requirement.name.clone());
            if let Some(e) = &self.error {
                return Err(e.clone());
            }
            let name = requirement.name.as_str();
            Ok(match self.known.iter().find(|(n, _)| *n == name) {
                Some((_, exact)) => Dependency::Package(PackageDependency {
                    dependency_type: self.kind,
                    name: name.to_string(),
                    version: requirement.version.clone(),
                    exact: *exact,
                    path: PathBuf::from(format!("/deps/{}/{name}", self.kind)),
                    script: None,
                }),
                None => Dependency::null(name, requirement.version.as_deref()),
            })
        }
    }

    fn requirements(names: &[&str]) -> ToolRequirements {
        names
            .iter()
            .map(|n| ToolRequirement::package(*n, Some("1.0")))
            .collect()
    }

    fn kinds(resolved: &IndexMap<ToolRequirement, Dependency>) -> Vec<(String, &'static str)> {
        resolved
            .iter()
            .map(|(r, d)| (r.name.clone(), d.dependency_type()))
            .collect()
    }

    #[test]
    fn earlier_resolvers_win_and_order_is_kept() {
        let manager = DependencyManager::from_resolvers(vec![
            Box::new(Table::new("first", &[("bwa", true)])),
            Box::new(Table::new("second", &[("bwa", true), ("samtools", true)])),
        ]);
        let resolved = manager
            .requirements_to_dependencies(&requirements(&["samtools", "bwa"]), &ResolveOptions::default())
            .unwrap();
        assert_eq!(
            kinds(&resolved),
            vec![("samtools".to_string(), "second"), ("bwa".to_string(), "first")]
        );
    }

    #[test]
    fn exact_requests_skip_inexact_results() {
        let manager = DependencyManager::from_resolvers(vec![
            Box::new(Table::new("loose", &[("bwa", false)])),
            Box::new(Table::new("strict", &[("bwa", true)])),
        ]);
        let reqs = requirements(&["bwa"]);
        let any = manager
            .requirements_to_dependencies(&reqs, &ResolveOptions::default())
            .unwrap();
        assert_eq!(kinds(&any), vec![("bwa".to_string(), "loose")]);

        let exact = ResolveOptions {
            exact: true,
            ..ResolveOptions::default()
        };
        let resolved = manager.requirements_to_dependencies(&reqs, &exact).unwrap();
        assert_eq!(kinds(&resolved), vec![("bwa".to_string(), "strict")]);
    }

    #[test]
    fn return_null_keeps_unresolved_requirements() {
        let manager = DependencyManager::from_resolvers(vec![Box::new(Table::new("only", &[("bwa", true)]))]);
        let reqs = requirements(&["velvet", "bwa"]);
        let without = manager
            .requirements_to_dependencies(&reqs, &ResolveOptions::default())
            .unwrap();
        assert_eq!(without.len(), 1);

        let options = ResolveOptions {
            return_null: true,
            ..ResolveOptions::default()
        };
        let with = manager.requirements_to_dependencies(&reqs, &options).unwrap();
        assert_eq!(
            kinds(&with),
            vec![("velvet".to_string(), "null"), ("bwa".to_string(), "only")]
        );
    }

    #[test]
    fn filters_select_resolvers() {
        let manager = DependencyManager::from_resolvers(vec![
            Box::new(Table::new("first", &[("bwa", true)])),
            Box::new(Table::new("second", &[("bwa", true)])),
        ]);
        let reqs = requirements(&["bwa"]);
        let by_index = ResolveOptions {
            index: Some(1),
            ..ResolveOptions::default()
        };
        assert_eq!(
            kinds(&manager.requirements_to_dependencies(&reqs, &by_index).unwrap()),
            vec![("bwa".to_string(), "second")]
        );
        let by_type = ResolveOptions {
            resolver_type: Some("second".to_string()),
            ..ResolveOptions::default()
        };
        assert_eq!(
            kinds(&manager.requirements_to_dependencies(&reqs, &by_type).unwrap()),
            vec![("bwa".to_string(), "second")]
        );
    }

    #[test]
    fn failing_resolvers_are_skipped_and_lock_errors_propagate() {
        let manager = DependencyManager::from_resolvers(vec![
            Box::new(Table::failing("broken", DepsError::Generic("boom".to_string()))),
            Box::new(Table::new("working", &[("bwa", true)])),
        ]);
        let resolved = manager
            .requirements_to_dependencies(&requirements(&["bwa"]), &ResolveOptions::default())
            .unwrap();
        assert_eq!(kinds(&resolved), vec![("bwa".to_string(), "working")]);

        let locked = DependencyManager::from_resolvers(vec![
            Box::new(Table::failing("locked", DepsError::Lock("conda".to_string()))),
            Box::new(Table::new("working", &[("bwa", true)])),
        ]);
        let err = locked
            .requirements_to_dependencies(&requirements(&["bwa"]), &ResolveOptions::default())
            .unwrap_err();
        assert!(matches!(err, DepsError::Lock(_)));
    }

    #[test]
    fn non_resolvable_requirements_are_ignored() {
        let table = Table::new("first", &[("bwa", true)]);
        let manager = DependencyManager::from_resolvers(vec![Box::new(table)]);
        let mut reqs = requirements(&["bwa"]);
        reqs.insert(ToolRequirement::new("gcc", None, RequirementType::Binary));
        let options = ResolveOptions {
            return_null: true,
            ..ResolveOptions::default()
        };
        let resolved = manager.requirements_to_dependencies(&reqs, &options).unwrap();
        assert_eq!(kinds(&resolved), vec![("bwa".to_string(), "first")]);
    }

    #[test]
    fn shell_commands_are_deduplicated_in_order() {
        let manager = DependencyManager::from_resolvers(vec![Box::new(Table::new(
            "pkg",
            &[("bwa", true), ("samtools", true)],
        ))]);
        let commands = manager
            .dependency_shell_commands(&requirements(&["samtools", "bwa", "velvet"]), &ResolveOptions::default())
            .unwrap();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].contains("/deps/pkg/samtools"));
        assert!(commands[1].contains("/deps/pkg/bwa"));

        let dep = manager
            .find_dep("velvet", None, RequirementType::Package, &ResolveOptions::default())
            .unwrap();
        assert!(dep.is_null());
        assert!(!manager.uses_tool_shed_dependencies());
    }

    #[test]
    fn containers_cover_unresolved_requirements() {
        #[derive(Debug)]
        struct Always;
        impl ContainerResolver for Always {
            fn resolver_type(&self) -> &'static str {
                "always"
            }
            fn resolve(
                &self,
                enabled_types: &[ContainerType],
                _tool_info: &ToolInfo,
                _options: &ContainerResolveOptions,
                _cache: &mut ResolutionCache,
            ) -> Result<Option<ContainerDescription>> {
                Ok(enabled_types
                    .contains(&ContainerType::Docker)
                    .then(|| ContainerDescription::new("quay.io/biocontainers/bwa:0.7.13--1", ContainerType::Docker)))
            }
        }
        let registry = Arc::new(ContainerRegistry::from_resolvers(vec![
            Box::new(ExplicitContainerResolver),
            Box::new(Always),
        ]));
        let manager = DependencyManager::from_resolvers(vec![Box::new(Table::new("none", &[]))])
            .with_container_registry(registry);
        let options = ResolveOptions {
            include_containers: true,
            container_type: Some(ContainerType::Docker),
            ..ResolveOptions::default()
        };
        let resolved = manager
            .requirements_to_dependencies(&requirements(&["bwa"]), &options)
            .unwrap();
        assert_eq!(kinds(&resolved), vec![("bwa".to_string(), "container")]);
        assert_eq!(resolved[0].shell_commands().unwrap(), None);

        let singularity = ResolveOptions {
            container_type: Some(ContainerType::Singularity),
            ..options
        };
        assert!(manager
            .requirements_to_dependencies(&requirements(&["bwa"]), &singularity)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn default_chain_resolves_through_conda() {
        let tmp = tempfile::tempdir().unwrap();
        let fake = FakeRunner::new("4.6.14");
        let services = services(tmp.path(), &fake, Arc::new(Offline), |c| {
            c.conda.auto_install = true;
        });
        install_fake_conda(&services.config.conda_prefix());
        let manager = DependencyManager::from_config(&services).unwrap();
        assert!(manager.uses_tool_shed_dependencies());
        assert_eq!(manager.resolvers().len(), 5);

        let reqs: ToolRequirements = [
            ToolRequirement::package("samtools", Some("1.3.1")),
            ToolRequirement::package("bwa", Some("0.7.13")),
        ]
        .into_iter()
        .collect();
        let resolved = manager
            .requirements_to_dependencies(&reqs, &ResolveOptions::default())
            .unwrap();
        assert_eq!(
            kinds(&resolved),
            vec![
                ("samtools".to_string(), "merged_conda"),
                ("bwa".to_string(), "merged_conda")
            ]
        );
    }

    #[test]
    fn resolver_params_reach_the_backends() {
        let tmp = tempfile::tempdir().unwrap();
        let fake = FakeRunner::new("4.6.14");
        let services = services(tmp.path(), &fake, Arc::new(Offline), |_| {});
        let descriptors = vec![ResolverDescriptor::new(
            "galaxy_packages",
            ResolverParams::new().with("base_path", tmp.path().join("elsewhere").display().to_string()),
        )];
        let manager = DependencyManager::new(&services, &descriptors).unwrap();
        let described = manager.resolvers()[0].describe();
        assert!(described[0].1.ends_with("elsewhere"));
    }
}
