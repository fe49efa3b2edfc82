//! # roomcache
//!
//! Command-line access to a roomcache store.
//!
//! ## Commands
//!
//! - `apply`: Apply a JSON sync payload from a file
//! - `cursor`: Print the stored sync cursor
//! - `rooms`: List known rooms
//! - `state`, `states`: Read room state
//! - `timeline`: Print the cached timeline of a room
//! - `user-event`: Read a user account-data event
//! - `whoami`: Print or set the local user id
//!
//! ## Example
//!
//! ```bash
//! roomcache --db cache.redb apply sync.json
//! roomcache --db cache.redb state '!room:example.org' m.room.name
//! roomcache --db cache.redb timeline '!room:example.org'
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roomcache_state::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{apply, query};

const DEFAULT_CONFIG: &str = "roomcache.toml";

/// Inspect and feed a roomcache store.
#[derive(Parser, Debug)]
#[command(name = "roomcache")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults are used if the default file is absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store file, overriding the configured path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply a sync payload (JSON) to the store
    Apply {
        /// File holding the payload
        file: PathBuf,
    },

    /// Print the cursor of the last applied sync
    Cursor,

    /// List rooms with stored state
    Rooms,

    /// Print one room state event
    State {
        /// Room id
        room: String,
        /// Event type
        event_type: String,
        /// State key
        #[arg(default_value = "")]
        state_key: String,
    },

    /// Print all state events of one type in a room, keyed by state key
    States {
        /// Room id
        room: String,
        /// Event type
        event_type: String,
    },

    /// Print the cached timeline of a room, oldest first
    Timeline {
        /// Room id
        room: String,
    },

    /// Print a user account-data event
    UserEvent {
        /// Event type
        event_type: String,
    },

    /// Print the local user id
    Whoami {
        /// Store this user id instead of printing
        #[arg(long)]
        set: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.store.path = db;
    }

    init_logging(&config.log.filter);

    match cli.command {
        Commands::Apply { file } => apply::run(&config, &file),
        Commands::Cursor => query::cursor(&config),
        Commands::Rooms => query::rooms(&config),
        Commands::State {
            room,
            event_type,
            state_key,
        } => query::state(&config, &room, &event_type, &state_key),
        Commands::States { room, event_type } => query::states(&config, &room, &event_type),
        Commands::Timeline { room } => query::timeline(&config, &room),
        Commands::UserEvent { event_type } => query::user_event(&config, &event_type),
        Commands::Whoami { set } => query::whoami(&config, set.as_deref()),
    }
}

/// Load the configuration.
///
/// An explicit `--config` must exist; the default file is optional.
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => {
            let path = Path::new(DEFAULT_CONFIG);
            if path.exists() {
                Config::from_file(path).context("Failed to load roomcache.toml")
            } else {
                Ok(Config::default())
            }
        }
    }
}

/// Log to stderr; `RUST_LOG` wins over the configured filter.
fn init_logging(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
