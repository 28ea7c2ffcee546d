// tooldeps/src/cli/search.rs
use clap::Args;
use colored::Colorize;
use prettytable::{format, Cell, Row, Table};
use tooldeps_common::config::Config;
use tooldeps_common::error::Result;
use tooldeps_core::mulled::{mulled_tags_for, parse_tag};
use tooldeps_core::ResolutionCache;

use crate::cli::{blocking, services};

#[derive(Args, Debug)]
pub struct Search {
    /// Image name, e.g. samtools or mulled-v2-<hash>
    pub image: String,

    /// Registry namespace
    #[arg(long, default_value = "biocontainers")]
    pub namespace: String,

    /// Only tags starting with this prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// Show at most this many tags
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

impl Search {
    pub async fn run(&self, config: &Config, offline: bool) -> Result<()> {
        let cfg = config.clone();
        let namespace = self.namespace.clone();
        let image = self.image.clone();
        let prefix = self.prefix.clone();

        let tags = blocking(move || {
            let services = services(cfg, offline, false)?;
            let mut cache = ResolutionCache::new();
            mulled_tags_for(
                &namespace,
                &image,
                prefix.as_deref(),
                &mut cache,
                services.tag_source.as_ref(),
            )
        })
        .await?;

        if tags.is_empty() {
            println!(
                "{}",
                format!("No tags found for quay.io/{}/{}", self.namespace, self.image).yellow()
            );
            return Ok(());
        }

        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
        table.add_row(Row::new(vec![
            Cell::new("Tag").style_spec("b"),
            Cell::new("Version").style_spec("b"),
            Cell::new("Build").style_spec("b"),
        ]));
        for tag in tags.iter().take(self.limit) {
            let parsed = parse_tag(tag);
            let build = if parsed.build_number < 0 {
                "-".to_string()
            } else {
                parsed.build_number.to_string()
            };
            table.add_row(Row::new(vec![
                Cell::new(&parsed.tag).style_spec("Fg"),
                Cell::new(&parsed.version.to_string()),
                Cell::new(&build),
            ]));
        }
        table.printstd();

        if tags.len() > self.limit {
            println!("{} more tags not shown", tags.len() - self.limit);
        }
        Ok(())
    }
}
