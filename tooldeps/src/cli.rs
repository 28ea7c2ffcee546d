// tooldeps/src/cli.rs
//! Defines the command-line argument structure using clap.
use clap::{ArgAction, Parser, Subcommand};
use tokio::task::JoinError;
use tooldeps_common::error::{DepsError, Result};
use tooldeps_common::model::{RequirementType, ToolRequirement, ToolRequirements};
use tooldeps_common::Config;
use tooldeps_core::ResolverServices;

pub mod build;
pub mod containers;
pub mod envs;
pub mod hash;
pub mod images;
pub mod resolve;
pub mod search;

use crate::cli::build::BuildArgs;
use crate::cli::containers::ContainersArgs;
use crate::cli::envs::Envs;
use crate::cli::hash::HashArgs;
use crate::cli::images::Images;
use crate::cli::resolve::ResolveArgs;
use crate::cli::search::Search;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "tooldeps", bin_name = "tooldeps")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Never contact the image registry or download installers
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve requirements to shell activation text
    Resolve(ResolveArgs),
    /// Find the container a tool would run in
    Containers(ContainersArgs),
    /// Print the mulled image name for a set of requirements
    Hash(HashArgs),
    /// List registry tags of a mulled image
    Search(Search),
    /// Build a mulled image with involucro
    Build(BuildArgs),
    /// List conda environments under the dependency directory
    Envs(Envs),
    /// List locally cached mulled images
    Images(Images),
}

impl Command {
    pub async fn run(&self, config: &Config, offline: bool) -> Result<()> {
        match self {
            Self::Resolve(command) => command.run(config, offline).await,
            Self::Containers(command) => command.run(config, offline).await,
            Self::Hash(command) => command.run(config).await,
            Self::Search(command) => command.run(config, offline).await,
            Self::Build(command) => command.run(config, offline).await,
            Self::Envs(command) => command.run(config).await,
            Self::Images(command) => command.run(config).await,
        }
    }
}

fn join_to_err(e: JoinError) -> DepsError {
    DepsError::Generic(format!("Task join error: {e}"))
}

/// Runs engine work on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(join_to_err)?
}

/// Services for a command. Online services build blocking HTTP clients,
/// so this must run on the blocking pool.
pub(crate) fn services(config: Config, offline: bool, heartbeat: bool) -> Result<ResolverServices> {
    if offline {
        Ok(ResolverServices::offline(config, heartbeat))
    } else {
        ResolverServices::online(config, heartbeat)
    }
}

/// `name[=version]` arguments as requirements of one type.
pub(crate) fn parse_requirements(
    raw: &[String],
    requirement_type: RequirementType,
) -> Result<ToolRequirements> {
    raw.iter()
        .map(|r| ToolRequirement::parse(r, requirement_type))
        .collect()
}
