//! CLI command implementations.

pub mod apply;
pub mod query;

use anyhow::{Context, Result};
use roomcache_state::{Config, StateManager};
use serde::Serialize;

/// Open the state manager for the configured store.
pub fn open(config: &Config) -> Result<StateManager> {
    StateManager::open(&config.store)
        .with_context(|| format!("Failed to open store {}", config.store.path.display()))
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{}", out);
    Ok(())
}
