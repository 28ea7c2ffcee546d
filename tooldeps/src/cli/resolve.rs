// tooldeps/src/cli/resolve.rs
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use colored::Colorize;
use prettytable::{format, Cell, Row, Table};
use tooldeps_common::config::Config;
use tooldeps_common::error::Result;
use tooldeps_common::model::{ContainerType, RequirementType, ToolRequirement};
use tooldeps_core::deps::installed::load_installed_tool_dependencies;
use tooldeps_core::{ContainerRegistry, Dependency, DependencyManager, ResolveOptions};
use tracing::debug;

use crate::cli::{blocking, parse_requirements, services};

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Requirements as name[=version]
    #[arg(required = true)]
    pub requirements: Vec<String>,

    /// Requirement type: package, set_environment or binary
    #[arg(long = "type", default_value = "package")]
    pub requirement_type: RequirementType,

    /// Install missing dependencies where the resolver can
    #[arg(long)]
    pub install: bool,

    /// Reject dependencies that only match approximately
    #[arg(long)]
    pub exact: bool,

    /// Only consult the resolver at this position in the chain
    #[arg(long)]
    pub index: Option<usize>,

    /// Only consult resolvers of this type
    #[arg(long)]
    pub resolver_type: Option<String>,

    /// Build per-job environments below this directory
    #[arg(long)]
    pub job_directory: Option<PathBuf>,

    /// Fall back to container resolution when nothing resolves
    #[arg(long)]
    pub containers: bool,

    /// Container type used with --containers
    #[arg(long, default_value = "docker")]
    pub container_type: ContainerType,

    /// Print only the shell activation text
    #[arg(long)]
    pub shell: bool,
}

/// Where a dependency lives, for listings.
fn dependency_detail(dependency: &Dependency) -> String {
    match dependency {
        Dependency::Null { .. } => "-".to_string(),
        Dependency::Package(d) => d.path.display().to_string(),
        Dependency::Conda(d) => d.environment_path.display().to_string(),
        Dependency::Module(d) => d.module_to_load(),
        Dependency::Container(d) => d.description.identifier().to_string(),
    }
}

impl ResolveArgs {
    fn options(&self, config: &Config) -> Result<ResolveOptions> {
        let installed_tool_dependencies = match &config.installed_tool_dependencies_file {
            Some(path) => Some(load_installed_tool_dependencies(path)?),
            None => None,
        };
        Ok(ResolveOptions {
            index: self.index,
            resolver_type: self.resolver_type.clone(),
            exact: self.exact,
            install: self.install,
            return_null: true,
            job_directory: self.job_directory.clone(),
            installed_tool_dependencies,
            include_containers: self.containers,
            container_type: Some(self.container_type),
            ..ResolveOptions::default()
        })
    }

    pub async fn run(&self, config: &Config, offline: bool) -> Result<()> {
        let requirements = parse_requirements(&self.requirements, self.requirement_type)?;
        let options = self.options(config)?;
        let include_containers = self.containers;
        let shell = self.shell;
        let cfg = config.clone();

        let (resolved, shell_text) = blocking(move || {
            let services = services(cfg, offline, true)?;
            let mut manager = DependencyManager::from_config(&services)?;
            if include_containers {
                let registry = ContainerRegistry::from_config(&services)?;
                manager = manager.with_container_registry(Arc::new(registry));
            }
            if shell {
                let text = manager.dependency_shell_commands(&requirements, &options)?;
                return Ok((Vec::new(), text));
            }
            let resolved: Vec<(ToolRequirement, Dependency)> = manager
                .requirements_to_dependencies(&requirements, &options)?
                .into_iter()
                .collect();
            Ok((resolved, Vec::new()))
        })
        .await?;

        if self.shell {
            debug!("{} activation snippets", shell_text.len());
            for text in &shell_text {
                println!("{text}");
            }
            return Ok(());
        }
        debug!("Resolved {} requirements", resolved.len());

        if resolved.is_empty() {
            println!("{}", "No resolvable requirements given".yellow());
            return Ok(());
        }

        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
        table.add_row(Row::new(vec![
            Cell::new("Requirement").style_spec("b"),
            Cell::new("Resolver").style_spec("b"),
            Cell::new("Exact").style_spec("b"),
            Cell::new("Location").style_spec("b"),
        ]));
        let mut unresolved = 0;
        for (requirement, dependency) in &resolved {
            let name = match &requirement.version {
                Some(v) => format!("{}={}", requirement.name, v),
                None => requirement.name.clone(),
            };
            let resolver = if dependency.is_null() {
                unresolved += 1;
                dependency.dependency_type().red().to_string()
            } else {
                dependency.dependency_type().green().to_string()
            };
            let exact = if dependency.exact() { "yes" } else { "no" };
            table.add_row(Row::new(vec![
                Cell::new(&name),
                Cell::new(&resolver),
                Cell::new(exact),
                Cell::new(&dependency_detail(dependency)),
            ]));
        }
        table.printstd();

        if unresolved > 0 {
            println!(
                "{}",
                format!("{unresolved} of {} requirements unresolved", resolved.len()).yellow()
            );
        }
        Ok(())
    }
}
