// tooldeps/src/cli/build.rs
use std::env;
use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use tooldeps_common::config::Config;
use tooldeps_common::error::{DepsError, Result};
use tooldeps_common::model::RequirementType;
use tooldeps_core::conda::split_channels;
use tooldeps_core::mulled::{
    mull_targets, mulled_image_name, requirements_to_mulled_targets, InvolucroContext, MullOptions,
};
use tracing::info;

use crate::cli::{blocking, parse_requirements, services};

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Package requirements as name[=version]
    #[arg(required = true)]
    pub requirements: Vec<String>,

    /// Involucro task: build, build-and-test, push, all
    #[arg(long, default_value = "build")]
    pub command: String,

    #[arg(long, default_value = "biocontainers")]
    pub namespace: String,

    /// Comma separated conda channels, highest priority first
    #[arg(long)]
    pub channels: Option<String>,

    /// Hash scheme: v1 or v2
    #[arg(long, default_value = "v2")]
    pub hash: String,

    #[arg(long)]
    pub image_build: Option<String>,

    /// Use this image name instead of the hashed one
    #[arg(long)]
    pub name_override: Option<String>,

    #[arg(long)]
    pub dest_base_image: Option<String>,

    /// Shell command run inside the image to test it
    #[arg(long, default_value = "true")]
    pub test: String,

    /// Also build a singularity image
    #[arg(long)]
    pub singularity: bool,

    #[arg(long)]
    pub singularity_image_dir: Option<PathBuf>,

    /// Skip the build when the registry already has the image
    #[arg(long)]
    pub skip_existing: bool,

    /// Print the involucro command without running it
    #[arg(long)]
    pub dry_run: bool,

    /// Working directory for involucro, the current directory by default
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
}

impl BuildArgs {
    fn mull_options(&self, config: &Config) -> Result<MullOptions> {
        let work_dir = match &self.work_dir {
            Some(dir) => dir.clone(),
            None => env::current_dir()?,
        };
        let mut options = MullOptions::new(config.involucro_invfile.clone(), work_dir);
        options.command = self.command.clone();
        options.namespace = self.namespace.clone();
        options.hash_func = self.hash.parse()?;
        options.channels = match &self.channels {
            Some(raw) => split_channels(raw),
            None => config.mulled_channels.clone(),
        };
        options.image_build = self.image_build.clone();
        options.name_override = self.name_override.clone();
        options.dest_base_image = self.dest_base_image.clone();
        options.test = Some(self.test.clone());
        options.verbose = true;
        options.singularity = self.singularity;
        options.singularity_image_dir = self.singularity_image_dir.clone();
        options.rebuild = !self.skip_existing;
        options.dry_run = self.dry_run;
        Ok(options)
    }

    pub async fn run(&self, config: &Config, offline: bool) -> Result<()> {
        let requirements = parse_requirements(&self.requirements, RequirementType::Package)?;
        let targets = requirements_to_mulled_targets(requirements.iter());
        let options = self.mull_options(config)?;
        let image = mulled_image_name(&targets, &options);
        println!(
            "{} Building {}",
            "==>".bold().blue(),
            format!("quay.io/{}/{}", options.namespace, image).bold()
        );

        let cfg = config.clone();
        let code = blocking(move || {
            let services = services(cfg, offline, true)?;
            let config = &services.config;
            let involucro = InvolucroContext::new(
                config.involucro_path.clone(),
                services.runner.clone(),
                services.downloader.clone(),
            );
            mull_targets(
                &targets,
                &involucro,
                &options,
                services.tag_source.as_ref(),
                config.involucro_auto_init,
                config.lock_timeout,
            )
        })
        .await?;

        if code != 0 {
            return Err(DepsError::Generic(format!(
                "involucro exited with code {code} while building {image}"
            )));
        }
        info!("Built {}", image);
        println!("{} {}", "==>".bold().green(), "Done".bold());
        Ok(())
    }
}
