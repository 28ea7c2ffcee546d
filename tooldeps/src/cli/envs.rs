// tooldeps/src/cli/envs.rs
use std::path::{Path, PathBuf};

use clap::Args;
use colored::Colorize;
use prettytable::{format, Cell, Row, Table};
use tooldeps_common::config::Config;
use tooldeps_common::error::Result;
use tooldeps_core::conda::CondaSettings;
use tooldeps_core::deps::resolvers::conda::describe_environment;
use tooldeps_core::{CondaContext, ResolverServices};
use tooldeps_io::fs::list_directory_entries;

use crate::cli::blocking;

#[derive(Args, Debug)]
pub struct Envs {
    /// Only show environments shared by several packages
    #[arg(long)]
    pub merged: bool,
}

/// `(name, contents, path)` of every environment directory, sorted by name.
fn environments(envs_dir: &Path, merged_only: bool) -> Result<Vec<(String, String, PathBuf)>> {
    if !envs_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut envs: Vec<(String, String, PathBuf)> = list_directory_entries(envs_dir)?
        .into_iter()
        .filter(|(_, _, is_dir)| *is_dir)
        .filter(|(name, _, _)| !merged_only || name.starts_with("mulled-v1-"))
        .map(|(name, path, _)| {
            let contents = describe_environment(&name);
            (name, contents, path)
        })
        .collect();
    envs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(envs)
}

impl Envs {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let cfg = config.clone();
        let merged_only = self.merged;

        let (prefix, envs) = blocking(move || {
            let prefix = cfg.conda_prefix();
            let settings = CondaSettings::from_config(&cfg.conda, prefix.clone());
            let services = ResolverServices::offline(cfg, false);
            let context = CondaContext::new(settings, services.runner, services.downloader);
            if !context.is_conda_installed() {
                return Ok((prefix, None));
            }
            Ok((prefix, Some(environments(&context.envs_path(), merged_only)?)))
        })
        .await?;

        let Some(envs) = envs else {
            println!(
                "{}",
                format!("No conda installation at {}", prefix.display()).yellow()
            );
            return Ok(());
        };
        if envs.is_empty() {
            println!("{}", "0 environments".yellow());
            return Ok(());
        }

        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
        table.add_row(Row::new(vec![
            Cell::new("Environment").style_spec("b"),
            Cell::new("Contents").style_spec("b"),
            Cell::new("Path").style_spec("b"),
        ]));
        for (name, contents, path) in &envs {
            table.add_row(Row::new(vec![
                Cell::new(name).style_spec("Fg"),
                Cell::new(contents),
                Cell::new(&path.display().to_string()),
            ]));
        }
        table.printstd();
        println!("{}", format!("{} environments", envs.len()).bold());
        Ok(())
    }
}
