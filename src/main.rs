use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::ConfigArgs;
use memberwatch::config::Config;

#[derive(Parser)]
#[command(
    name = "memberwatch",
    version,
    about = "Watch coordination-service membership and serve the resulting stream endpoints",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    config: ConfigArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json), overrides the configured one
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve members and stream endpoints over HTTP
    Serve {
        /// HTTP port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print membership changes to stdout
    Watch {
        /// Print UP/DOWN instance events instead of stream actions
        #[arg(long)]
        instances: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let port = match cli.command {
        Commands::Serve { port } => port,
        Commands::Watch { .. } => None,
    };

    let mut config = match cli.config.resolve(port) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    setup_tracing(&config, cli.verbose)?;
    memberwatch::metrics::init_metrics()
        .map_err(|e| anyhow::anyhow!("Failed to initialize metrics: {e}"))?;

    tracing::info!(
        backend = %config.discovery.connection_string,
        path = %config.discovery.member_path,
        "memberwatch starting"
    );

    match cli.command {
        Commands::Serve { .. } => commands::serve(config).await?,
        Commands::Watch { instances } => commands::watch(config, instances).await?,
    }

    tracing::info!("memberwatch stopped");
    Ok(())
}

fn setup_tracing(config: &Config, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("memberwatch=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(format!("memberwatch={},warn", config.logging.level))
        })
    };

    match config.logging.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
