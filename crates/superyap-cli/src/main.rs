//! # superyap
//!
//! Command-line client for Super Yap. Every invocation signs in as `--user`,
//! catches up with the store, runs one command and exits.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use superyap_client::ClientConfig;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "superyap", version, about = "Super Yap chat from the terminal")]
pub struct Cli {
    /// User id to act as. Defaults to the cached session, or a fresh local
    /// address.
    #[arg(long, env = "SUPERYAP_USER", global = true)]
    pub user: Option<String>,

    /// Display name used when the profile is created
    #[arg(long, global = true)]
    pub name: Option<String>,

    /// Database file (overrides SUPERYAP_DB_PATH)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in and show the profile
    #[command(alias = "whoami")]
    Login,
    /// Edit the profile
    Profile {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        avatar: Option<String>,
    },
    /// Add a contact by id
    Add { id: String },
    /// Remove a contact
    Remove { id: String },
    /// Pin a contact to the top of the list
    Pin {
        id: String,
        #[arg(long)]
        off: bool,
    },
    /// List contacts in chat-list order
    Contacts,
    /// Send a text message
    Send {
        peer: String,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Send sticker 1-40
    Sticker { peer: String, index: u32 },
    /// Show the conversation with a contact
    History { peer: String },
    /// Toggle a reaction on a message
    React {
        peer: String,
        message: String,
        emoji: String,
    },
    /// Delete one of your messages
    Delete { peer: String, message: String },
    /// Process an "add me" link
    OpenLink { url: String },
    /// Print your own "add me" link
    ShareLink {
        #[arg(long, default_value = "https://superyap.app/")]
        origin: String,
    },
    /// Forget the cached session
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("superyap=info,superyap_client=debug,superyap_store=info,warn")
        }))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(ref path) = cli.db {
        config.db_path = Some(path.clone());
    }
    debug!(backend = ?config.backend, db = ?config.db_path, "configuration loaded");

    commands::run(cli, config).await
}
