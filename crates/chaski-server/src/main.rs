//! Chaski - XML message relay server entry point

use anyhow::Result;
use chaski_common::config::{Config, LoggingConfig};
use chaski_core::{ChaskiServer, PluginEnv, PluginRegistry};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    ///
    /// When omitted, ./chaski.toml and then /etc/chaski/chaski.toml are tried.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    // Initialize logging
    init_logging(&config.logging);

    info!(identity = %config.server.identity, "Starting Chaski relay server...");

    // Build the plugin chain
    let env = PluginEnv::from_config(&config);
    let pipeline = PluginRegistry::builtin().build_pipeline(&config.plugins, &env)?;
    if pipeline.is_empty() {
        info!("No plugins configured, every request will succeed untouched");
    }

    let server = ChaskiServer::new(&config.server, pipeline);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                tracing::error!("Chaski server error: {}", e);
                return Err(e);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received");
        }
    }

    info!("Chaski server shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
