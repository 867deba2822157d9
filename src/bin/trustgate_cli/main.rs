// ABOUTME: trustgate CLI - operator tool for signing keys and the session ledger
// ABOUTME: Rotates, lists, publishes and prunes keys; sweeps sessions; runs the maintenance loops
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org
//!
//! Usage:
//! ```bash
//! # Mint a new active signing key and prune beyond the retention count
//! trustgate-cli keys rotate
//!
//! # Show every retained key
//! trustgate-cli keys list
//!
//! # Print the JWKS document
//! trustgate-cli keys jwks
//!
//! # Keep only the three newest keys
//! trustgate-cli keys cleanup --retain 3
//!
//! # Deactivate expired sessions
//! trustgate-cli sessions sweep --database-url sqlite:./data/sessions.db
//!
//! # Run scheduled rotation, key reload and session sweep until Ctrl-C
//! trustgate-cli run
//! ```

mod commands;
mod helpers;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use trustgate::config::TrustConfig;
use trustgate::errors::AppResult;
use trustgate::logging::{LogFormat, LoggingConfig};

type Result<T> = AppResult<T>;

#[derive(Parser)]
#[command(
    name = "trustgate-cli",
    about = "Trustgate key and session management CLI",
    long_about = "Command-line tool for rotating RS256 signing keys, publishing the JWKS and maintaining the session ledger."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Key directory override
    #[arg(long, global = true)]
    key_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[non_exhaustive]
#[derive(Subcommand)]
enum Command {
    /// Signing key management
    Keys {
        #[command(subcommand)]
        action: KeysCommand,
    },

    /// Session ledger maintenance
    Sessions {
        #[command(subcommand)]
        action: SessionsCommand,
    },

    /// Run scheduled rotation, key reload and session sweep until interrupted
    Run {
        /// Session database URL
        #[arg(long)]
        database_url: Option<String>,
    },
}

#[non_exhaustive]
#[derive(Subcommand)]
enum KeysCommand {
    /// Generate a new active key, then prune beyond the retention count
    Rotate,

    /// List retained keys, newest last
    List,

    /// Print the JWKS document
    Jwks {
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Delete the oldest inactive keys
    Cleanup {
        /// Number of keys to keep, active key included
        #[arg(long)]
        retain: usize,
    },
}

#[non_exhaustive]
#[derive(Subcommand)]
enum SessionsCommand {
    /// Deactivate sessions past their validity
    Sweep {
        /// Session database URL
        #[arg(long)]
        database_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env();
    logging.format = LogFormat::Compact;
    if cli.verbose {
        "debug".clone_into(&mut logging.level);
    }
    logging.init()?;

    let mut config = TrustConfig::from_env()?;
    if let Some(key_dir) = cli.key_dir {
        config.keys.dir = key_dir;
    }
    info!(key_dir = %config.keys.dir.display(), "trustgate CLI");

    match cli.command {
        Command::Keys { action } => {
            let rotator = commands::keys::open_rotator(&config).await?;
            match action {
                KeysCommand::Rotate => commands::keys::rotate(&rotator).await?,
                KeysCommand::List => commands::keys::list(&rotator).await,
                KeysCommand::Jwks { pretty } => commands::keys::jwks(&rotator, pretty).await?,
                KeysCommand::Cleanup { retain } => {
                    commands::keys::cleanup(&rotator, retain).await?;
                }
            }
        }
        Command::Sessions { action } => match action {
            SessionsCommand::Sweep { database_url } => {
                if let Some(url) = database_url {
                    config.sessions.database_url = url;
                }
                commands::sessions::sweep(&config).await?;
            }
        },
        Command::Run { database_url } => {
            if let Some(url) = database_url {
                config.sessions.database_url = url;
            }
            commands::run::run(&config).await?;
        }
    }

    Ok(())
}
