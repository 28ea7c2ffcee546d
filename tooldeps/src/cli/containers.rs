// tooldeps/src/cli/containers.rs
use clap::Args;
use colored::Colorize;
use tooldeps_common::config::Config;
use tooldeps_common::error::Result;
use tooldeps_common::model::{ContainerDescription, ContainerType, RequirementType, ToolInfo};
use tooldeps_core::{ContainerRegistry, ContainerResolveOptions, ResolutionCache};

use crate::cli::{blocking, parse_requirements, services};

#[derive(Args, Debug)]
pub struct ContainersArgs {
    /// Package requirements as name[=version]
    pub requirements: Vec<String>,

    /// Container the tool declares itself, as type:identifier or a docker identifier
    #[arg(long = "container")]
    pub containers: Vec<String>,

    /// Container types the job runner can use
    #[arg(long = "enable", default_value = "docker")]
    pub enabled_types: Vec<ContainerType>,

    /// Pull or build images where the resolver can
    #[arg(long)]
    pub install: bool,

    /// Only consult the resolver at this position in the chain
    #[arg(long)]
    pub index: Option<usize>,

    /// Only consult resolvers of this type
    #[arg(long)]
    pub resolver_type: Option<String>,

    /// The tool runs inside the host's Python environment
    #[arg(long)]
    pub requires_galaxy_environment: bool,
}

/// `singularity:/images/x.sif`, `docker:busybox` or a bare docker identifier.
fn parse_container(raw: &str) -> ContainerDescription {
    if let Some((prefix, identifier)) = raw.split_once(':') {
        if let Ok(container_type) = prefix.parse::<ContainerType>() {
            return ContainerDescription::new(identifier, container_type);
        }
    }
    ContainerDescription::new(raw, ContainerType::Docker)
}

impl ContainersArgs {
    fn tool_info(&self) -> Result<ToolInfo> {
        let requirements = parse_requirements(&self.requirements, RequirementType::Package)?;
        let mut info = ToolInfo::from_requirements(requirements);
        info.container_descriptions = self.containers.iter().map(|c| parse_container(c)).collect();
        info.requires_galaxy_python_environment = self.requires_galaxy_environment;
        Ok(info)
    }

    pub async fn run(&self, config: &Config, offline: bool) -> Result<()> {
        let tool_info = self.tool_info()?;
        let enabled_types = self.enabled_types.clone();
        let options = ContainerResolveOptions {
            index: self.index,
            resolver_type: self.resolver_type.clone(),
            install: self.install,
        };
        let cfg = config.clone();

        let resolved = blocking(move || {
            let services = services(cfg, offline, true)?;
            let registry = ContainerRegistry::from_config(&services)?;
            let mut cache = ResolutionCache::new();
            registry.resolve(&enabled_types, &tool_info, &options, &mut cache)
        })
        .await?;

        match resolved {
            Some(resolved) => {
                let description = &resolved.description;
                println!(
                    "{} {} ({})",
                    "==>".bold().blue(),
                    description.identifier().bold(),
                    description.container_type
                );
                println!("    resolver: {} [{}]", resolved.resolver_type.cyan(), resolved.index);
                println!("    shell:    {}", description.shell);
                if description.explicit {
                    println!("    declared by the tool");
                }
            }
            None => println!("{}", "No container found".yellow()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_arguments_carry_their_type() {
        let sif = parse_container("singularity:/images/bwa.sif");
        assert_eq!(sif.container_type, ContainerType::Singularity);
        assert_eq!(sif.identifier(), "/images/bwa.sif");

        let docker = parse_container("quay.io/biocontainers/bwa:0.7.13--1");
        assert_eq!(docker.container_type, ContainerType::Docker);
        assert_eq!(docker.identifier(), "quay.io/biocontainers/bwa:0.7.13--1");
    }
}
