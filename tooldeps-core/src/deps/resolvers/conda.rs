// tooldeps-core/src/deps/resolvers/conda.rs
//! Conda environments, one per (package, version), or one merged
//! environment for a whole requirement set.
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use tooldeps_common::error::Result;
use tooldeps_common::model::{RequirementType, ToolRequirement, ToolRequirements};
use tracing::{debug, info, warn};

use crate::conda::{
    hash_conda_packages, parse_install_environment, split_channels, CondaContext, CondaSettings,
    CondaTarget,
};
use crate::deps::dependency::{ActivationRetry, CondaDependency, Dependency};
use crate::deps::mapping::RequirementMapper;
use crate::deps::params::ResolverParams;
use crate::deps::resolver::DependencyResolver;
use crate::deps::ResolveOptions;
use crate::installable::ensure_installed;
use crate::services::ResolverServices;

static ANACONDA_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://anaconda\.org/\w+/\w+").unwrap_or_else(|_| unreachable!())
});

#[derive(Debug)]
pub struct CondaDependencyResolver {
    context: Arc<CondaContext>,
    versionless: bool,
    auto_install: bool,
    auto_init: bool,
    read_only: bool,
    retry: ActivationRetry,
    lock_timeout: Duration,
    mapper: RequirementMapper,
    available: OnceCell<bool>,
}

impl CondaDependencyResolver {
    pub fn new(services: &ResolverServices, params: &ResolverParams) -> Result<Self> {
        let config = &services.config;
        let conda = &config.conda;
        let prefix = params.get_path("prefix").unwrap_or_else(|| config.conda_prefix());
        let mut settings = CondaSettings::from_config(conda, prefix);
        if let Some(exec) = params.get_path("exec") {
            settings.exec = Some(exec);
        }
        if let Some(channels) = params.get_str("ensure_channels") {
            settings.ensure_channels = split_channels(&channels);
        }
        if let Some(condarc) = params.get_path("condarc_override") {
            settings.condarc_override = Some(condarc);
        }
        settings.debug = params.get_bool("debug", settings.debug)?;
        settings.use_local = params.get_bool("use_local", settings.use_local)?;
        settings.copy_dependencies =
            params.get_bool("copy_dependencies", settings.copy_dependencies)?;

        let retry = ActivationRetry {
            max_tries: conda.activate_max_tries,
            sleep: conda.activate_retry_sleep,
        };
        Ok(Self {
            context: Arc::new(CondaContext::new(
                settings,
                services.runner.clone(),
                services.downloader.clone(),
            )),
            versionless: params.get_bool("versionless", false)?,
            auto_install: params.get_bool("auto_install", conda.auto_install)?,
            auto_init: params.get_bool("auto_init", conda.auto_init)?,
            read_only: params.get_bool("read_only", false)?,
            retry,
            lock_timeout: config.lock_timeout,
            mapper: RequirementMapper::from_params(params, config.root())?,
            available: OnceCell::new(),
        })
    }

    pub fn context(&self) -> &Arc<CondaContext> {
        &self.context
    }

    /// Installs conda on first use when allowed. Lock timeouts propagate and
    /// are retried on the next call.
    fn ensure_conda(&self) -> Result<bool> {
        self.available
            .get_or_try_init(|| {
                let outcome = ensure_installed(
                    self.context.as_ref(),
                    || self.context.install_conda(),
                    self.auto_init,
                    self.lock_timeout,
                )?;
                if !outcome.is_installed() {
                    info!("Conda unavailable ({:?}), disabling the conda resolver", outcome);
                }
                Ok(outcome.is_installed())
            })
            .copied()
    }

    /// Mapping rules first, then an anaconda.org specification overrides
    /// the name, and its version (when it has one) the version.
    fn expand_requirement(&self, requirement: &ToolRequirement) -> ToolRequirement {
        let requirement = self.mapper.expand(requirement);
        match requirement
            .specs
            .iter()
            .find(|spec| ANACONDA_SPEC.is_match(&spec.uri))
        {
            Some(spec) => {
                let version = spec.version.as_deref().or(requirement.version.as_deref());
                requirement.rewritten(spec.short_name(), version)
            }
            None => requirement,
        }
    }

    fn target_version<'a>(&self, requirement: &'a ToolRequirement) -> Option<&'a str> {
        if self.versionless {
            None
        } else {
            requirement.version.as_deref()
        }
    }

    fn exact(&self, requirement: &ToolRequirement) -> bool {
        !self.versionless || requirement.version.is_none()
    }

    /// True on (seemingly) successful installation; failures are cleaned up.
    pub fn install_dependency(&self, target: &CondaTarget) -> Result<bool> {
        let installed = match self.context.install_conda_target(target, false)? {
            0 => self.context.is_conda_target_installed(target),
            code => {
                debug!("Install of {} exited with {}", target, code);
                false
            }
        };
        if !installed {
            debug!("Removing failed conda install of {}", target);
            self.context.cleanup_failed_install(target)?;
        }
        Ok(installed)
    }

    /// Environment shared by a set of targets.
    pub fn merged_environment_name(targets: &[CondaTarget]) -> String {
        match targets {
            [single] => single.install_environment(),
            _ => format!("mulled-v1-{}", hash_conda_packages(targets)),
        }
    }

    fn install_all(&self, targets: &[CondaTarget], env: &str) -> Result<bool> {
        let installed = match self.context.install_conda_targets(targets, Some(env), true)? {
            0 => self.context.has_env(env),
            _ => false,
        };
        if !installed {
            debug!("Removing failed conda install of {:?}", targets);
            self.context.cleanup_failed_install_of_environment(env)?;
        }
        Ok(installed)
    }

    fn dependency(
        &self,
        environment_path: std::path::PathBuf,
        requirement: &ToolRequirement,
        version: Option<&str>,
        options: &ResolveOptions,
    ) -> CondaDependency {
        CondaDependency::new(
            self.context.clone(),
            environment_path,
            &requirement.name,
            version,
            self.exact(requirement),
        )
        .with_retry(self.retry)
        .preserving_python_environment(options.preserve_python_environment)
    }
}

impl DependencyResolver for CondaDependencyResolver {
    fn resolver_type(&self) -> &'static str {
        "conda"
    }

    fn disabled(&self) -> bool {
        self.available.get() == Some(&false)
    }

    fn resolve(&self, requirement: &ToolRequirement, options: &ResolveOptions) -> Result<Dependency> {
        let requirement = self.expand_requirement(requirement);
        let name = requirement.name.as_str();
        if requirement.requirement_type != RequirementType::Package {
            return Ok(Dependency::null(name, requirement.version.as_deref()));
        }
        if !self.ensure_conda()? || !self.context.conda_prefix().is_dir() {
            return Ok(Dependency::null(name, requirement.version.as_deref()));
        }

        let version = self.target_version(&requirement);
        let target = CondaTarget::new(name, version, None, None)?;
        let mut installed = self.context.is_conda_target_installed(&target);
        if !installed && (self.auto_install || options.install) && !self.read_only {
            installed = self.install_dependency(&target)?;
        }
        if !installed {
            return Ok(Dependency::null(name, version));
        }

        let dependency = match &options.job_directory {
            Some(job_directory) => {
                let env_dir = if options.metadata {
                    "conda-metadata-env"
                } else {
                    "conda-env"
                };
                self.dependency(job_directory.join(env_dir), &requirement, version, options)
                    .built_on_demand(vec![target])
            }
            None => {
                let path = self
                    .context
                    .get_conda_target_installed_path(&target)
                    .unwrap_or_else(|| self.context.env_path(&target.install_environment()));
                self.dependency(path, &requirement, version, options)
            }
        };
        Ok(Dependency::Conda(dependency))
    }

    fn supports_resolve_all(&self) -> bool {
        true
    }

    fn resolve_all(
        &self,
        requirements: &ToolRequirements,
        options: &ResolveOptions,
    ) -> Result<Option<Vec<Dependency>>> {
        if requirements.is_empty()
            || requirements
                .iter()
                .any(|r| r.requirement_type != RequirementType::Package)
        {
            return Ok(None);
        }
        if !self.ensure_conda()? || !self.context.conda_prefix().is_dir() {
            return Ok(None);
        }

        let expanded: Vec<ToolRequirement> =
            requirements.iter().map(|r| self.expand_requirement(r)).collect();
        let targets = expanded
            .iter()
            .map(|r| CondaTarget::new(&r.name, self.target_version(r), None, None))
            .collect::<Result<Vec<_>>>()?;

        let env = Self::merged_environment_name(&targets);
        let mut installed = self.context.has_env(&env);
        if !installed && (self.auto_install || options.install) && !self.read_only {
            installed = self.install_all(&targets, &env)?;
        }
        if !installed {
            return Ok(None);
        }

        let env_path = self.context.env_path(&env);
        debug!("Resolved {} requirements to merged environment {}", expanded.len(), env);
        Ok(Some(
            expanded
                .iter()
                .map(|r| {
                    Dependency::Conda(
                        self.dependency(env_path.clone(), r, self.target_version(r), options)
                            .merged(),
                    )
                })
                .collect(),
        ))
    }

    fn list_dependencies(&self) -> Result<Vec<ToolRequirement>> {
        if !self.context.envs_path().is_dir() {
            return Ok(Vec::new());
        }
        let mut listed = Vec::new();
        for target in self.context.installed_conda_targets()? {
            listed.push(ToolRequirement::package(target.package(), target.version()));
        }
        Ok(listed)
    }

    fn describe(&self) -> Vec<(String, String)> {
        vec![
            ("prefix".to_string(), self.context.conda_prefix().display().to_string()),
            ("versionless".to_string(), self.versionless.to_string()),
            ("auto_install".to_string(), self.auto_install.to_string()),
            ("read_only".to_string(), self.read_only.to_string()),
        ]
    }
}

/// Environment name of a merged environment back to its package list, when
/// it is a single-target one.
pub fn describe_environment(name: &str) -> String {
    match parse_install_environment(name) {
        Some((package, Some(version))) => format!("{package} {version}"),
        Some((package, None)) => format!("{package} (unversioned)"),
        None => {
            if !name.starts_with("mulled-v1-") {
                warn!("Unrecognized conda environment {}", name);
            }
            name.to_string()
        }
    }
}
