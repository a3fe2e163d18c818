use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cycler::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "cycler",
    version,
    about = "Per-account check-in scheduler with durable cooldowns and proxy failover",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file (defaults and CYCLER_* env vars otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run {
        /// Run a single tick and exit
        #[arg(long, default_value = "false")]
        once: bool,
    },

    /// Show identities, cooldowns and proxy assignments
    Status,

    /// Clear the cooldown of one identity so it runs on the next tick
    Reset {
        /// Identity key (account email)
        key: String,
    },

    /// Drop cooldown windows that ended long ago
    Prune {
        /// Remove windows that ended more than this many hours ago
        #[arg(long, default_value = "24")]
        max_age_hours: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    // Initialize tracing/logging
    setup_tracing(&config.logging.format, &config.logging.level, cli.verbose)?;

    tracing::debug!(config = ?cli.config, "Configuration loaded");

    match cli.command {
        Commands::Run { once } => {
            tracing::info!(once = %once, "Starting run command");
            commands::run(&config, once).await?;
        }

        Commands::Status => {
            commands::status(&config)?;
        }

        Commands::Reset { key } => {
            tracing::info!(key = %key, "Starting reset command");
            commands::reset(&config, &key)?;
        }

        Commands::Prune { max_age_hours } => {
            tracing::info!(max_age_hours = %max_age_hours, "Starting prune command");
            commands::prune(&config, max_age_hours)?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("cycler=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("cycler={level},warn")))
    };

    match format {
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
