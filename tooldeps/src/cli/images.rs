// tooldeps/src/cli/images.rs
use clap::Args;
use colored::Colorize;
use prettytable::{format, Cell, Row, Table};
use tooldeps_common::config::Config;
use tooldeps_common::error::Result;
use tooldeps_core::mulled::{
    list_cached_mulled_images_from_path, list_docker_cached_mulled_images, CachedMulledImage,
    HashFunc,
};
use tooldeps_core::{ResolutionCache, ResolverServices};

use crate::cli::blocking;

#[derive(Args, Debug)]
pub struct Images {
    /// List the singularity image cache instead of the docker daemon
    #[arg(long)]
    pub singularity: bool,

    /// Registry namespace of docker images
    #[arg(long, default_value = "biocontainers")]
    pub namespace: String,

    /// Hash scheme multi-package images must use: v1 or v2
    #[arg(long, default_value = "v2")]
    pub hash: String,
}

/// `(kind, contents)` columns for a cached image.
fn describe(image: &CachedMulledImage) -> (&'static str, String) {
    match image {
        CachedMulledImage::SingleTarget {
            package_name,
            version,
            build,
            ..
        } => {
            let mut contents = package_name.clone();
            if let Some(v) = version {
                contents.push_str(&format!(" {v}"));
            }
            if let Some(b) = build {
                contents.push_str(&format!(" ({b})"));
            }
            ("single", contents)
        }
        CachedMulledImage::V1MultiTarget { hash, .. } => ("mulled-v1", hash.clone()),
        CachedMulledImage::V2MultiTarget {
            package_hash,
            version_hash,
            ..
        } => match version_hash {
            Some(v) => ("mulled-v2", format!("{package_hash}:{v}")),
            None => ("mulled-v2", package_hash.clone()),
        },
    }
}

impl Images {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let hash_func: HashFunc = self.hash.parse()?;
        let cfg = config.clone();
        let singularity = self.singularity;
        let namespace = self.namespace.clone();

        let images = blocking(move || {
            if singularity {
                let dir = cfg.singularity_cache_dir();
                if !dir.is_dir() {
                    return Ok(Vec::new());
                }
                return list_cached_mulled_images_from_path(&dir, hash_func);
            }
            let services = ResolverServices::offline(cfg, false);
            let mut cache = ResolutionCache::new();
            Ok(list_docker_cached_mulled_images(
                services.runner.as_ref(),
                Some(&namespace),
                hash_func,
                &mut cache,
            ))
        })
        .await?;

        if images.is_empty() {
            println!("{}", "No cached mulled images".yellow());
            return Ok(());
        }

        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
        table.add_row(Row::new(vec![
            Cell::new("Image").style_spec("b"),
            Cell::new("Kind").style_spec("b"),
            Cell::new("Contents").style_spec("b"),
        ]));
        for image in &images {
            let (kind, contents) = describe(image);
            table.add_row(Row::new(vec![
                Cell::new(image.image_identifier()).style_spec("Fg"),
                Cell::new(kind),
                Cell::new(&contents),
            ]));
        }
        table.printstd();
        Ok(())
    }
}
