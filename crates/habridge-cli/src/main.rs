//! habridge CLI - Insteon frame tools and the openHAB Cloud connector

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use habridge_cloud::CloudClient;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod insteon;

use config::AppConfig;

/// habridge - Insteon PLM decoding and openHAB Cloud relay connector
#[derive(Parser)]
#[command(name = "habridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "HABRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode PLM frames given as hex and print their fields
    Decode {
        /// Frames, e.g. "02 50 11 22 33 44 55 66 2B 19 00"
        #[arg(required = true)]
        frames: Vec<String>,
    },

    /// Feed a capture file (one hex frame per line) through the configured devices
    Replay {
        /// Capture file
        file: PathBuf,
    },

    /// List known device types and their features
    Devices,

    /// Connect to the cloud relay and proxy requests until interrupted
    Cloud,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs)?;

    let config = AppConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Decode { frames } => insteon::decode(&frames)?,
        Commands::Replay { file } => {
            let catalog = config.catalog()?;
            insteon::replay(&catalog, &config.network, &file)?;
        }
        Commands::Devices => insteon::devices(&config.catalog()?),
        Commands::Cloud => run_cloud(config).await?,
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}

async fn run_cloud(config: AppConfig) -> Result<()> {
    let cloud = config
        .cloud
        .context("No [cloud] section in the config file")?;
    println!(
        "{} Connecting to {} as {}",
        "habridge".cyan().bold(),
        cloud.base_url,
        cloud.uuid
    );

    let (client, mut commands) = CloudClient::new(cloud).context("Invalid cloud config")?;
    client.start()?;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => {
                    println!("{} {} {}", "command".green(), command.item, command.command);
                }
                None => {
                    warn!("command channel closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
