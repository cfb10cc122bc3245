//! mention-bot - Main entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mention_common::config::Config;
use mention_common::logging::init_logging;
use mention_common::validation::EntryMode;
use std::path::PathBuf;

/// Answer Slack mentions with streamed chat completions.
#[derive(Parser, Debug)]
#[command(name = "mention-bot")]
#[command(version)]
#[command(about = "Slack mention bot that streams chat completions into threads", long_about = None)]
struct Cli {
    /// Config file (default: ~/.mention-bot/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect over Socket Mode (needs an app-level token)
    Socket,

    /// Serve the Events API over HTTP
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_with_env(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let mode = match cli.command {
        Commands::Socket => EntryMode::Socket,
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            EntryMode::Http
        }
    };

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    config
        .validate(mode)
        .context("Configuration is incomplete")?;

    tracing::info!("mention-bot v{}", env!("CARGO_PKG_VERSION"));

    mention_bot::run(config, mode).await
}
