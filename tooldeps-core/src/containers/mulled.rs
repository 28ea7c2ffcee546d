// tooldeps-core/src/containers/mulled.rs
//! Mulled images for a tool's package requirements: already present
//! locally, published in the registry, or built on the spot.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tooldeps_common::error::{DepsError, Result};
use tooldeps_common::model::{
    ContainerDescription, ContainerType, ToolInfo, DEFAULT_CONTAINER_SHELL,
};
use tooldeps_common::remote::TagSource;
use tooldeps_io::fs::create_dir_all;
use tooldeps_io::process::{CommandRunner, CommandSpec};
use tracing::{debug, info, warn};

use super::resolver::ContainerResolver;
use super::ContainerResolveOptions;
use crate::deps::params::ResolverParams;
use crate::mulled::{
    docker_cached_container_description, mull_targets, requirements_to_mulled_targets,
    singularity_cached_container_description, targets_to_mulled_name, HashFunc,
    InvolucroContext, MullOptions, Target,
};
use crate::resolution_cache::ResolutionCache;
use crate::services::ResolverServices;

pub fn docker_available() -> bool {
    which::which("docker").is_ok()
}

/// Settings every mulled resolver reads from its params.
#[derive(Debug, Clone)]
struct MulledSettings {
    container_type: ContainerType,
    namespace: String,
    hash_func: HashFunc,
    shell: String,
    cache_directory: PathBuf,
}

impl MulledSettings {
    fn from_params(
        services: &ResolverServices,
        params: &ResolverParams,
        container_type: ContainerType,
        default_namespace: &str,
    ) -> Result<Self> {
        let hash_func = match params.get_str("hash_func") {
            Some(raw) => raw.parse()?,
            None => HashFunc::V2,
        };
        Ok(Self {
            container_type,
            namespace: params
                .get_str("namespace")
                .unwrap_or_else(|| default_namespace.to_string()),
            hash_func,
            shell: params
                .get_str("shell")
                .unwrap_or_else(|| DEFAULT_CONTAINER_SHELL.to_string()),
            cache_directory: params
                .get_path("cache_directory")
                .unwrap_or_else(|| services.config.singularity_cache_dir()),
        })
    }

    /// Package targets of the tool, or `None` when this resolver should not
    /// answer at all.
    fn targets(&self, enabled_types: &[ContainerType], tool_info: &ToolInfo) -> Option<Vec<Target>> {
        if tool_info.requires_galaxy_python_environment || !enabled_types.contains(&self.container_type) {
            return None;
        }
        let targets = requirements_to_mulled_targets(tool_info.requirements.iter());
        (!targets.is_empty()).then_some(targets)
    }

    fn cached_description(
        &self,
        runner: &dyn CommandRunner,
        targets: &[Target],
        cache: &mut ResolutionCache,
    ) -> Result<Option<ContainerDescription>> {
        match self.container_type {
            ContainerType::Docker => Ok(docker_cached_container_description(
                runner,
                targets,
                Some(&self.namespace),
                self.hash_func,
                &self.shell,
                cache,
            )),
            ContainerType::Singularity => singularity_cached_container_description(
                targets,
                &self.cache_directory,
                self.hash_func,
                &self.shell,
            ),
        }
    }

    fn describe(&self) -> Vec<(String, String)> {
        let mut described = vec![
            ("namespace".to_string(), self.namespace.clone()),
            ("hash_func".to_string(), self.hash_func.to_string()),
        ];
        if self.container_type == ContainerType::Singularity {
            described.push((
                "cache_directory".to_string(),
                self.cache_directory.display().to_string(),
            ));
        }
        described
    }
}

/// Images already on this host: the local docker daemon or the singularity
/// image cache directory.
#[derive(Debug)]
pub struct CachedMulledContainerResolver {
    settings: MulledSettings,
    cli_available: bool,
    runner: Arc<dyn CommandRunner>,
}

impl CachedMulledContainerResolver {
    pub fn new(
        services: &ResolverServices,
        params: &ResolverParams,
        container_type: ContainerType,
    ) -> Result<Self> {
        Ok(Self {
            settings: MulledSettings::from_params(services, params, container_type, "biocontainers")?,
            cli_available: container_type == ContainerType::Singularity || docker_available(),
            runner: services.runner.clone(),
        })
    }
}

impl ContainerResolver for CachedMulledContainerResolver {
    fn resolver_type(&self) -> &'static str {
        match self.settings.container_type {
            ContainerType::Docker => "cached_mulled",
            ContainerType::Singularity => "cached_mulled_singularity",
        }
    }

    fn container_type(&self) -> Option<ContainerType> {
        Some(self.settings.container_type)
    }

    fn resolve(
        &self,
        enabled_types: &[ContainerType],
        tool_info: &ToolInfo,
        _options: &ContainerResolveOptions,
        cache: &mut ResolutionCache,
    ) -> Result<Option<ContainerDescription>> {
        if !self.cli_available {
            return Ok(None);
        }
        let Some(targets) = self.settings.targets(enabled_types, tool_info) else {
            return Ok(None);
        };
        self.settings
            .cached_description(self.runner.as_ref(), &targets, cache)
    }

    fn describe(&self) -> Vec<(String, String)> {
        self.settings.describe()
    }
}

/// Images published under `quay.io/<namespace>`, pulled on install.
#[derive(Debug)]
pub struct MulledContainerResolver {
    settings: MulledSettings,
    auto_install: bool,
    can_list_containers: bool,
    runner: Arc<dyn CommandRunner>,
    tag_source: Arc<dyn TagSource>,
}

impl MulledContainerResolver {
    pub fn new(
        services: &ResolverServices,
        params: &ResolverParams,
        container_type: ContainerType,
    ) -> Result<Self> {
        Ok(Self {
            settings: MulledSettings::from_params(services, params, container_type, "biocontainers")?,
            auto_install: params.get_bool("auto_install", true)?,
            can_list_containers: container_type == ContainerType::Singularity || docker_available(),
            runner: services.runner.clone(),
            tag_source: services.tag_source.clone(),
        })
    }

    fn pull(&self, description: &ContainerDescription, name: &str, cache: &mut ResolutionCache) -> Result<()> {
        let (spec, message) = match self.settings.container_type {
            ContainerType::Docker => (
                CommandSpec::new("docker").args(["pull", description.identifier()]),
                format!("Pulling {}", description.identifier()),
            ),
            ContainerType::Singularity => {
                create_dir_all(&self.settings.cache_directory)?;
                let image_path = self.settings.cache_directory.join(name);
                (
                    CommandSpec::new("singularity").args([
                        "build".to_string(),
                        image_path.display().to_string(),
                        description.identifier().to_string(),
                    ]),
                    format!("Building {}", image_path.display()),
                )
            }
        };
        info!("{}", message);
        let output = self.runner.run_long(&spec, &message)?;
        cache.forget_docker_images();
        if output.is_success() {
            Ok(())
        } else {
            Err(DepsError::CommandExec {
                command: spec.command_line(),
                code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }
}

impl ContainerResolver for MulledContainerResolver {
    fn resolver_type(&self) -> &'static str {
        match self.settings.container_type {
            ContainerType::Docker => "mulled",
            ContainerType::Singularity => "mulled_singularity",
        }
    }

    fn container_type(&self) -> Option<ContainerType> {
        Some(self.settings.container_type)
    }

    fn resolve(
        &self,
        enabled_types: &[ContainerType],
        tool_info: &ToolInfo,
        options: &ContainerResolveOptions,
        cache: &mut ResolutionCache,
    ) -> Result<Option<ContainerDescription>> {
        let Some(targets) = self.settings.targets(enabled_types, tool_info) else {
            return Ok(None);
        };
        let settings = &self.settings;
        let Some(name) = targets_to_mulled_name(
            &targets,
            settings.hash_func,
            &settings.namespace,
            cache,
            self.tag_source.as_ref(),
        )?
        else {
            debug!("No published image for {} targets", targets.len());
            return Ok(None);
        };

        let image = format!("quay.io/{}/{}", settings.namespace, name);
        let identifier = match settings.container_type {
            ContainerType::Docker => image,
            ContainerType::Singularity => format!("docker://{image}"),
        };
        let description =
            ContainerDescription::new(&identifier, settings.container_type).with_shell(settings.shell.clone());

        if !self.can_list_containers {
            return Ok(Some(description));
        }
        let runner = self.runner.as_ref();
        if options.install && settings.cached_description(runner, &targets, cache)?.is_none() {
            if let Err(e) = self.pull(&description, &name, cache) {
                if e.is_retryable() {
                    return Err(e);
                }
                warn!("Could not install {}: {}", description.identifier(), e);
                return Ok(None);
            }
        }
        if !self.auto_install {
            if let Some(cached) = settings.cached_description(runner, &targets, cache)? {
                return Ok(Some(cached));
            }
        }
        Ok(Some(description))
    }

    fn describe(&self) -> Vec<(String, String)> {
        let mut described = self.settings.describe();
        described.push(("auto_install".to_string(), self.auto_install.to_string()));
        described
    }
}

/// Builds the image with involucro when none exists.
#[derive(Debug)]
pub struct BuildMulledContainerResolver {
    settings: MulledSettings,
    auto_install: bool,
    channels: Vec<String>,
    invfile: PathBuf,
    involucro: InvolucroContext,
    involucro_auto_init: bool,
    lock_timeout: Duration,
    runner: Arc<dyn CommandRunner>,
    tag_source: Arc<dyn TagSource>,
}

impl BuildMulledContainerResolver {
    pub fn new(
        services: &ResolverServices,
        params: &ResolverParams,
        container_type: ContainerType,
    ) -> Result<Self> {
        let config = &services.config;
        let channels = params.get_list("channels");
        Ok(Self {
            settings: MulledSettings::from_params(services, params, container_type, "local")?,
            auto_install: params.get_bool("auto_install", true)?,
            channels: if channels.is_empty() {
                config.mulled_channels.clone()
            } else {
                channels
            },
            invfile: config.involucro_invfile.clone(),
            involucro: InvolucroContext::new(
                config.involucro_path.clone(),
                services.runner.clone(),
                services.downloader.clone(),
            ),
            involucro_auto_init: config.involucro_auto_init,
            lock_timeout: config.lock_timeout,
            runner: services.runner.clone(),
            tag_source: services.tag_source.clone(),
        })
    }

    fn mull_options(&self, work_dir: PathBuf) -> MullOptions {
        let mut options = MullOptions::new(self.invfile.clone(), work_dir);
        options.command = "build-and-test".to_string();
        options.namespace = self.settings.namespace.clone();
        options.hash_func = self.settings.hash_func;
        options.channels = self.channels.clone();
        if self.settings.container_type == ContainerType::Singularity {
            options.singularity = true;
            options.singularity_image_dir = Some(self.settings.cache_directory.clone());
        }
        options
    }
}

impl ContainerResolver for BuildMulledContainerResolver {
    fn resolver_type(&self) -> &'static str {
        match self.settings.container_type {
            ContainerType::Docker => "build_mulled",
            ContainerType::Singularity => "build_mulled_singularity",
        }
    }

    fn container_type(&self) -> Option<ContainerType> {
        Some(self.settings.container_type)
    }

    fn builds_on_resolution(&self) -> bool {
        true
    }

    fn resolve(
        &self,
        enabled_types: &[ContainerType],
        tool_info: &ToolInfo,
        options: &ContainerResolveOptions,
        cache: &mut ResolutionCache,
    ) -> Result<Option<ContainerDescription>> {
        let Some(targets) = self.settings.targets(enabled_types, tool_info) else {
            return Ok(None);
        };
        if !(self.auto_install || options.install) {
            return Ok(None);
        }
        let work_dir = tempfile::Builder::new().prefix("mulled-build").tempdir()?;
        let mull = self.mull_options(work_dir.path().to_path_buf());
        let code = mull_targets(
            &targets,
            &self.involucro,
            &mull,
            self.tag_source.as_ref(),
            self.involucro_auto_init,
            self.lock_timeout,
        )?;
        if code != 0 {
            warn!("Building a mulled image for {} targets exited with {}", targets.len(), code);
            return Ok(None);
        }
        cache.forget_docker_images();
        self.settings
            .cached_description(self.runner.as_ref(), &targets, cache)
    }

    fn describe(&self) -> Vec<(String, String)> {
        let mut described = self.settings.describe();
        described.push(("channels".to_string(), self.channels.join(",")));
        described
    }
}
