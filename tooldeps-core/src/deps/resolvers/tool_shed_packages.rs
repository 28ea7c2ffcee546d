// tooldeps-core/src/deps/resolvers/tool_shed_packages.rs
//! Packages installed from a tool shed repository. Only exact matches: the
//! install path encodes the repository owner, name and changeset.
use std::path::PathBuf;

use tooldeps_common::error::Result;
use tooldeps_common::model::{RequirementType, ToolRequirement};
use tracing::{debug, warn};

use super::galaxy_packages::PackageBasePath;
use crate::deps::dependency::{Dependency, PackageDependency};
use crate::deps::installed::{find_installed, load_installed_tool_dependencies, InstalledToolDependency};
use crate::deps::params::ResolverParams;
use crate::deps::resolver::DependencyResolver;
use crate::deps::ResolveOptions;
use crate::services::ResolverServices;

#[derive(Debug)]
pub struct ToolShedPackageDependencyResolver {
    layout: PackageBasePath,
    installed: Vec<InstalledToolDependency>,
}

impl ToolShedPackageDependencyResolver {
    pub fn new(services: &ResolverServices, params: &ResolverParams) -> Result<Self> {
        let installed_file = params
            .get_path("installed_tool_dependencies")
            .or_else(|| services.config.installed_tool_dependencies_file.clone());
        let installed = match installed_file {
            Some(path) if path.exists() => load_installed_tool_dependencies(&path)?,
            Some(path) => {
                warn!("Installed tool dependency list {} not found", path.display());
                Vec::new()
            }
            None => Vec::new(),
        };
        Ok(Self {
            layout: PackageBasePath::from_params(services, params, "tool_shed_package"),
            installed,
        })
    }

    fn installed<'a>(&'a self, options: &'a ResolveOptions) -> &'a [InstalledToolDependency] {
        options
            .installed_tool_dependencies
            .as_deref()
            .unwrap_or(&self.installed)
    }

    fn package_path(&self, record: &InstalledToolDependency, name: &str, version: &str) -> PathBuf {
        self.layout
            .base_path
            .join(name)
            .join(version)
            .join(&record.owner)
            .join(&record.repository_name)
            .join(&record.installed_changeset_revision)
    }

    /// `set_environment` requirements carry no version; their script lives
    /// under `environment_settings`.
    fn set_environment(&self, name: &str, installed: &[InstalledToolDependency]) -> Dependency {
        let Some(record) = find_installed(installed, name, RequirementType::SetEnvironment, None)
        else {
            return Dependency::null(name, None);
        };
        let path = self
            .layout
            .base_path
            .join("environment_settings")
            .join(name)
            .join(&record.owner)
            .join(&record.repository_name)
            .join(&record.installed_changeset_revision);
        if !path.exists() {
            debug!("No environment settings at {}", path.display());
            return Dependency::null(name, None);
        }
        Dependency::Package(PackageDependency {
            dependency_type: self.layout.dependency_type,
            name: name.to_string(),
            version: None,
            exact: true,
            script: Some(path.join("env.sh")),
            path,
        })
    }
}

impl DependencyResolver for ToolShedPackageDependencyResolver {
    fn resolver_type(&self) -> &'static str {
        "tool_shed_packages"
    }

    fn resolve(&self, requirement: &ToolRequirement, options: &ResolveOptions) -> Result<Dependency> {
        let installed = self.installed(options);
        let name = requirement.name.as_str();
        match &requirement.version {
            Some(version) => {
                match find_installed(installed, name, requirement.requirement_type, Some(version)) {
                    Some(record) => {
                        let path = self.package_path(record, name, version);
                        Ok(self.layout.package_dependency(&path, Some(version), name, true))
                    }
                    None => Ok(Dependency::null(name, Some(version))),
                }
            }
            None if requirement.requirement_type == RequirementType::SetEnvironment => {
                Ok(self.set_environment(name, installed))
            }
            None => Ok(Dependency::null(name, None)),
        }
    }

    fn describe(&self) -> Vec<(String, String)> {
        vec![
            ("base_path".to_string(), self.layout.base_path.display().to_string()),
            ("installed".to_string(), self.installed.len().to_string()),
        ]
    }
}
