//! Intake CLI
//!
//! Command-line interface for inspecting and syncing intake form state.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use intake_core::{Config, Store};

mod commands;
mod output;

use output::{Output, OutputFormat};

/// Environment variable holding the log filter
const LOG_ENV: &str = "INTAKE_LOG";

#[derive(Parser)]
#[command(name = "intake")]
#[command(about = "Intake - offline-first form state storage and sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use a specific config file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Treat the network as down; writes are queued
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a record (step or collection name, then key=value fields)
    Set {
        /// Step (pessoal, social, ...) or collection name
        collection: String,
        /// Fields as key=value
        #[arg(required = true)]
        fields: Vec<String>,
        /// Record id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// Show a record, or list a collection
    #[command(alias = "show")]
    Get {
        /// Step or collection name
        collection: String,
        /// Record id
        id: Option<String>,
    },
    /// Delete a record
    #[command(alias = "rm")]
    Remove {
        /// Step or collection name
        collection: String,
        /// Record id
        id: String,
    },
    /// Show local state and sync status
    Status,
    /// Write pending changes to disk now
    Flush,
    /// Replay queued writes against the remote
    Sync {
        /// Upload every local record first
        #[arg(long)]
        full: bool,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, remote_url, sync_enabled, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the store
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => {
                commands::config::show(cli.config.as_ref(), &output)
            }
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, cli.config.as_ref(), &output)
            }
        };
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    init_logging(&config);
    debug!("Using data directory {:?}", config.data_dir);

    let store = Store::open_with_config(config).await?;
    if cli.offline {
        store.set_online(false);
    }

    let result = match cli.command {
        Commands::Set {
            collection,
            fields,
            id,
        } => commands::record::set(&store, collection, id, fields, &output).await,
        Commands::Get { collection, id } => commands::record::get(&store, collection, id, &output),
        Commands::Remove { collection, id } => {
            commands::record::remove(&store, collection, id, &output).await
        }
        Commands::Status => commands::status::show(&store, &output).await,
        Commands::Flush => commands::record::flush(&store, &output).await,
        Commands::Sync { full } => commands::sync::sync(&store, full, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    };

    // Always persist before exiting, even when the command failed
    let flushed = store.close().await;
    if let intake_core::FlushOutcome::Failed { reason } = flushed {
        output.warn(&format!("Local state was not saved: {}", reason));
    }

    result
}

/// Install the tracing subscriber
///
/// The filter comes from INTAKE_LOG (default `warn`). Logs go to
/// `config.log_file` when set, stderr otherwise.
fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    let Some(log_path) = &config.log_file else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    };

    let log_file = match File::options().create(true).append(true).open(log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            return;
        }
    };

    // Ignore the error if a subscriber is already installed
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Arc::new(log_file))
        .try_init();
}
