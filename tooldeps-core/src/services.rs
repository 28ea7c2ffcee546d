// tooldeps-core/src/services.rs
use std::sync::Arc;

use tooldeps_common::config::Config;
use tooldeps_common::error::Result;
use tooldeps_common::remote::{Downloader, Offline, TagSource};
use tooldeps_io::process::{CommandRunner, SystemCommandRunner};
use tooldeps_net::{HttpDownloader, QuayClient};
use tracing::debug;

/// Everything a resolver needs from the outside world. Resolvers are built
/// from this once and keep clones of the handles they use.
#[derive(Debug, Clone)]
pub struct ResolverServices {
    pub config: Arc<Config>,
    pub runner: Arc<dyn CommandRunner>,
    pub downloader: Arc<dyn Downloader>,
    pub tag_source: Arc<dyn TagSource>,
}

impl ResolverServices {
    pub fn new(
        config: Config,
        runner: Arc<dyn CommandRunner>,
        downloader: Arc<dyn Downloader>,
        tag_source: Arc<dyn TagSource>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            runner,
            downloader,
            tag_source,
        }
    }

    /// Host processes, quay.io and HTTPS downloads. Builds blocking HTTP
    /// clients, so call it outside of an async context.
    pub fn online(config: Config, heartbeat: bool) -> Result<Self> {
        debug!("Using registry at {}", config.quay_api_url);
        let tag_source = QuayClient::new(&config)?;
        let downloader = HttpDownloader::new()?;
        Ok(Self::new(
            config,
            Arc::new(SystemCommandRunner::new(heartbeat)),
            Arc::new(downloader),
            Arc::new(tag_source),
        ))
    }

    /// Host processes only; registry lookups find nothing and downloads fail.
    pub fn offline(config: Config, heartbeat: bool) -> Self {
        Self::new(
            config,
            Arc::new(SystemCommandRunner::new(heartbeat)),
            Arc::new(Offline),
            Arc::new(Offline),
        )
    }
}
