//! restcache - sign in and manage users of a restcache backend from the terminal.
//!
//! Every command goes through the same hooks a graphical front end would use,
//! so the cache and session behave the same way here.

mod commands;

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use restcache_core::{App, Config};

/// Log file name prefix inside the configured log directory
const LOG_FILE: &str = "restcache.log";

#[derive(Debug, Parser)]
#[command(name = "restcache", version, about = "Sign in and manage users of a restcache backend")]
struct Cli {
    /// API base URL, overriding the config file and environment
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Session backend: file, keyring or memory
    #[arg(long, global = true)]
    session: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in and store the session token
    Login {
        /// Defaults to the last email used
        #[arg(long)]
        email: Option<String>,
    },
    /// Create an account and sign in
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
    },
    /// Sign out and forget the session token
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Check whether the stored session is still valid
    Validate,
    /// Exchange the session token for a new one
    Refresh,
    /// Manage users
    Users {
        #[command(subcommand)]
        action: UsersCommand,
    },
}

#[derive(Debug, Subcommand)]
enum UsersCommand {
    /// List one page of users
    List {
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        sort_by: Option<String>,
        /// Sort descending
        #[arg(long, requires = "sort_by")]
        desc: bool,
    },
    /// Show one user
    Get { id: String },
    /// Create a user (prompts for the password)
    Create {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
    },
    /// Change a user's name or avatar URL
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        avatar: Option<String>,
    },
    /// Delete a user
    Delete { id: String },
    /// Upload an avatar image
    Avatar { id: String, path: std::path::PathBuf },
    /// Change a user's password (prompts for both passwords)
    Passwd { id: String },
}

/// Initialize the tracing subscriber for logging
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=restcache_core=debug).
/// The returned guard flushes the log file and must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = Config::load().context("Failed to load configuration")?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    if let Some(url) = &cli.api_url {
        config.api_url = url.clone();
    }
    if let Some(session) = &cli.session {
        config.session = session.parse()?;
    }

    let _guard = init_tracing(config.log_dir.as_deref());
    info!(api_url = %config.api_url, session = ?config.session, "restcache starting");

    let app = App::from_config(&config)?;
    let gc = app.cache.spawn_gc(config.query_config().queries.gc_time);
    let result = commands::run(cli.command, &app, &mut config, cli.json).await;
    gc.abort();
    result
}
