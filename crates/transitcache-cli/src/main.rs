//! transitcache - offline cache host for the SkyTrain kids map.
//!
//! Pre-caches the site into versioned on-disk stores and serves requests
//! through the cache strategy router, so pages and data stay readable when
//! the network is gone.

mod commands;
mod config;

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use transitcache_core::router::BACKGROUND_SYNC_TAG;
use transitcache_core::Url;

use config::Config;

/// Directory for log files; logs go to stderr when unset.
const LOG_DIR_ENV: &str = "TRANSITCACHE_LOG_DIR";

#[derive(Parser)]
#[command(name = "transitcache", version, about)]
struct Cli {
    /// Origin of the site to cache (remembered for later runs)
    #[arg(long, env = "TRANSITCACHE_ORIGIN", global = true)]
    origin: Option<String>,

    /// Root directory for cache stores
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pre-cache the manifest and drop stores from older versions
    Install,
    /// Fetch one URL through the cache
    Fetch {
        /// Absolute URL, or a path relative to the origin
        url: String,
        /// Ask for JSON (gets the offline payload when nothing else is available)
        #[arg(long)]
        json: bool,
        /// Write the body here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the cache version, network state and stores
    Status,
    /// Delete every store
    Clear,
    /// Deliver a background sync event
    Sync {
        #[arg(default_value = BACKGROUND_SYNC_TAG)]
        tag: String,
    },
}

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG to control the level (e.g. RUST_LOG=debug).
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "transitcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing();

    let mut config = Config::load()?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = Some(dir);
    }
    let origin = match cli.origin {
        Some(origin) => {
            config.origin = Some(origin.clone());
            config.save().context("Failed to save config")?;
            origin
        }
        None => config.origin.clone().ok_or_else(|| {
            anyhow::anyhow!("No origin configured. Pass --origin or set TRANSITCACHE_ORIGIN")
        })?,
    };
    let origin = Url::parse(&origin).with_context(|| format!("Invalid origin: {}", origin))?;
    let cache_dir = config.cache_dir(&origin)?;

    info!(origin = %origin, cache_dir = %cache_dir.display(), "transitcache starting");
    let router = commands::build_router(&origin, &cache_dir)?;

    match cli.command {
        Command::Install => commands::install(&router).await,
        Command::Fetch { url, json, output } => commands::fetch(&router, &url, json, output).await,
        Command::Status => commands::status(&router, &cache_dir).await,
        Command::Clear => commands::clear(&router).await,
        Command::Sync { tag } => {
            commands::sync(&router, &tag);
            Ok(())
        }
    }
}
