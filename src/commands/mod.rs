pub mod serve;
pub mod watch;

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use memberwatch::action::{ActionStream, UrlTemplate};
use memberwatch::config::Config;
use memberwatch::coordination;
use memberwatch::discovery::{DiscoveryManager, InstanceEvents, ResyncPolicy};
use memberwatch::error::Error;

pub use serve::serve;
pub use watch::watch;

/// Options shared by every command
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Coordination backend (zk1:2181,zk2:2181, memory://, file:///dir)
    #[arg(long, global = true)]
    pub connection_string: Option<String>,

    /// Path whose children are the members, e.g. /discovery/stream
    #[arg(short, long, global = true)]
    pub member_path: Option<String>,

    /// Stream URL template containing {HOSTNAME}
    #[arg(short, long, global = true)]
    pub url_template: Option<String>,

    /// Baseline handling after a reconnect (preserve, reset)
    #[arg(long, global = true)]
    pub resync_policy: Option<ResyncPolicy>,

    /// Create the member path if it is missing
    #[arg(long, global = true)]
    pub create_path: bool,
}

impl ConfigArgs {
    /// File (or defaults), then environment, then command-line flags
    pub fn resolve(&self, port: Option<u16>) -> Result<Config> {
        let mut base = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        base.apply_env()?;

        let mut builder = Config::builder().base(base);
        if let Some(v) = &self.connection_string {
            builder = builder.connection_string(v);
        }
        if let Some(v) = &self.member_path {
            builder = builder.member_path(v);
        }
        if let Some(v) = &self.url_template {
            builder = builder.url_template(v);
        }
        if let Some(v) = self.resync_policy {
            builder = builder.resync_policy(v);
        }
        if self.create_path {
            builder = builder.create_path(true);
        }
        if let Some(port) = port {
            builder = builder.port(port);
        }

        Ok(builder.build()?)
    }
}

/// Connected client, running watch and action stream for the configured path
pub struct Pipeline {
    pub manager: Arc<DiscoveryManager>,
    pub member_path: String,
    pub template: Arc<UrlTemplate>,
}

impl Pipeline {
    pub async fn start(config: &Config) -> memberwatch::error::Result<(Self, InstanceEvents)> {
        let template = Arc::new(config.mapping.template()?);
        let connection_string = &config.discovery.connection_string;
        let client = coordination::connect(connection_string)
            .await
            .map_err(|e| Error::with_source(format!("Failed to connect to '{connection_string}'"), e))?;

        let manager = Arc::new(DiscoveryManager::new(client, config.discovery.options()));
        let member_path = config.discovery.member_path.clone();
        let events = manager.start(&member_path).await?;

        tracing::info!(
            path = %member_path,
            template = %template,
            "Watching members"
        );

        Ok((
            Self {
                manager,
                member_path,
                template,
            },
            events,
        ))
    }

    pub fn actions(&self, events: InstanceEvents, config: &Config) -> ActionStream {
        ActionStream::new(events, self.template.clone(), config.mapping.invalid_uri_policy)
    }
}

/// Resolves on Ctrl+C
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
        }
        Err(e) => {
            tracing::error!("Failed to wait for Ctrl+C: {}", e);
        }
    }
}
