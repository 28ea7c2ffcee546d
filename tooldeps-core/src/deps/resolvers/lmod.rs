// tooldeps-core/src/deps/resolvers/lmod.rs
//! Lmod, queried with `lmod -t avail`.
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tooldeps_common::error::Result;
use tooldeps_common::model::{RequirementType, ToolRequirement};
use tooldeps_io::process::{CommandRunner, CommandSpec};
use tracing::debug;

use super::modules::{listing_has_module, ModuleListing};
use crate::deps::dependency::{Dependency, ModuleDependency};
use crate::deps::mapping::RequirementMapper;
use crate::deps::params::ResolverParams;
use crate::deps::resolver::DependencyResolver;
use crate::deps::ResolveOptions;
use crate::services::ResolverServices;

const DEFAULT_LMOD_PATH: &str = "/usr/share/lmod/lmod/libexec/lmod";
const DEFAULT_MODULE_PATH: &str = "/usr/share/modulefiles";

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Modules Lmod offers, with the version each name loads by default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LmodListing {
    pub modules: ModuleListing,
    defaults: HashMap<String, String>,
}

impl LmodListing {
    pub fn default_version(&self, name: &str) -> Option<&str> {
        self.defaults.get(name).map(String::as_str)
    }
}

/// Parses terse `lmod -t avail` output: one `name[/version]` per line,
/// directory headers ending in `:`, defaults marked `(D)` or `(default)`.
pub fn parse_lmod_avail(output: &str) -> LmodListing {
    let mut listing = LmodListing::default();
    for line in output.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('-') || line.ends_with(':') {
            continue;
        }
        let marked = line
            .strip_suffix("(default)")
            .or_else(|| line.strip_suffix("(D)"));
        let module = marked.unwrap_or(line).trim();
        match module.split_once('/') {
            Some((name, version)) => {
                if marked.is_some() {
                    listing.defaults.insert(name.to_string(), version.to_string());
                }
                listing
                    .modules
                    .push((name.to_string(), Some(version.to_string())));
            }
            None => listing.modules.push((module.to_string(), None)),
        }
    }
    listing
}

#[derive(Debug)]
pub struct LmodDependencyResolver {
    lmodexec: String,
    modulepath: String,
    versionless: bool,
    runner: Arc<dyn CommandRunner>,
    mapper: RequirementMapper,
    listing: OnceCell<LmodListing>,
}

impl LmodDependencyResolver {
    pub fn new(services: &ResolverServices, params: &ResolverParams) -> Result<Self> {
        Ok(Self {
            lmodexec: params
                .get_str("lmodexec")
                .unwrap_or_else(|| env_or("LMOD_CMD", DEFAULT_LMOD_PATH)),
            modulepath: params
                .get_str("modulepath")
                .unwrap_or_else(|| env_or("MODULEPATH", DEFAULT_MODULE_PATH)),
            versionless: params.get_bool("versionless", false)?,
            runner: services.runner.clone(),
            mapper: RequirementMapper::from_params(params, services.config.root())?,
            listing: OnceCell::new(),
        })
    }

    /// Listed once per resolver.
    fn available_modules(&self) -> Result<&LmodListing> {
        self.listing.get_or_try_init(|| {
            let spec = CommandSpec::new(&self.lmodexec)
                .args(["-t", "avail"])
                .env("MODULEPATH", &self.modulepath);
            let output = self.runner.run(&spec)?;
            Ok(parse_lmod_avail(&output.stderr))
        })
    }

    fn dependency(&self, name: &str, version: Option<&str>, exact: bool) -> Dependency {
        Dependency::Module(ModuleDependency {
            dependency_type: "lmod",
            name: name.to_string(),
            version: version.map(str::to_string),
            exact,
            modulepath: self.modulepath.clone(),
            command: self.lmodexec.clone(),
        })
    }
}

impl DependencyResolver for LmodDependencyResolver {
    fn resolver_type(&self) -> &'static str {
        "lmod"
    }

    fn resolve(&self, requirement: &ToolRequirement, _options: &ResolveOptions) -> Result<Dependency> {
        let requirement = self.mapper.expand(requirement);
        let name = requirement.name.as_str();
        let version = requirement.version.as_deref();
        if requirement.requirement_type != RequirementType::Package {
            return Ok(Dependency::null(name, version));
        }
        let listing = self.available_modules()?;
        if listing_has_module(&listing.modules, name, version) {
            return Ok(self.dependency(name, version, true));
        }
        if self.versionless && listing_has_module(&listing.modules, name, None) {
            let default = listing.default_version(name);
            debug!("Falling back to default lmod module for {}: {:?}", name, default);
            return Ok(self.dependency(name, default, false));
        }
        Ok(Dependency::null(name, version))
    }

    fn list_dependencies(&self) -> Result<Vec<ToolRequirement>> {
        Ok(self
            .available_modules()?
            .modules
            .iter()
            .map(|(name, version)| ToolRequirement::package(name.as_str(), version.as_deref()))
            .collect())
    }

    fn describe(&self) -> Vec<(String, String)> {
        vec![
            ("lmodexec".to_string(), self.lmodexec.clone()),
            ("modulepath".to_string(), self.modulepath.clone()),
            ("versionless".to_string(), self.versionless.to_string()),
        ]
    }
}
