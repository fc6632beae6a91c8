//! Bindle Daemon
//!
//! HTTP service for secure file uploads and downloads.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
use daemon::{logging, server};

/// Bindle Daemon - HTTP service for secure file uploads and downloads.
#[derive(Parser, Debug)]
#[command(name = "bindle")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to listen on, overriding the configuration
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;

    // Apply environment variable overrides
    config.apply_env_overrides();

    if let Commands::Serve { bind: Some(bind) } = &cli.command {
        config.server.bind = bind.clone();
    }

    config.validate()?;

    match cli.command {
        Commands::Serve { .. } => {
            let _guard = logging::init(&config.server.log_level, cli.verbose, &config.server.log_dir)?;
            tracing::info!("Bindle daemon starting (config: {:?})", config_path);
            server::run(&config).await?;
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
