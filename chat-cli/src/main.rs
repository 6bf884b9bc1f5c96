//! # linkchat
//!
//! CLI tool for linkchat.
//!
//! ## Commands
//!
//! - `init`: Claim the local username
//! - `send`: Store a message and send it to nearby peers
//! - `history`: Replay the stored conversation
//! - `status`: Show profile, storage, and discovery settings
//!
//! ## Example
//!
//! ```bash
//! # Pick a username (once per device)
//! linkchat init --username alice
//!
//! # Send to two simulated peers
//! linkchat send "hi" --mock-peers 2
//!
//! # Show the conversation
//! linkchat history
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

use commands::{history, init, send, status};
use config::Config;

/// Chat with nearby devices over short-range links.
#[derive(Parser, Debug)]
#[command(name = "linkchat")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for the message database and linkchat.toml
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Claim the local username
    Init {
        /// Username shown on every message sent from this device
        #[arg(long, short)]
        username: String,
    },

    /// Store a message and send it to nearby peers
    Send {
        /// Message text
        text: String,

        /// Number of simulated peers to connect to before sending
        #[arg(long, default_value = "0")]
        mock_peers: usize,
    },

    /// Replay the stored conversation
    History {
        /// Only show the most recent messages
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show profile, storage, and discovery settings
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    let config = Config::load(&data_dir)?;
    tracing::debug!("Using data dir {}", data_dir.display());

    match cli.command {
        Commands::Init { username } => {
            init::run(&data_dir, &config, &username).await?;
        }
        Commands::Send { text, mock_peers } => {
            send::run(&data_dir, &config, &text, mock_peers).await?;
        }
        Commands::History { limit } => {
            history::run(&data_dir, &config, limit).await?;
        }
        Commands::Status => {
            status::run(&data_dir, &config).await?;
        }
    }

    Ok(())
}

/// Log to stderr so stdout stays script-friendly.
fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Get the default data directory for linkchat.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "ydun", "linkchat")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
