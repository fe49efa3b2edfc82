//! Apply a sync payload from a file.

use anyhow::{Context, Result};
use roomcache_state::Config;
use roomcache_types::SyncResponse;
use serde_json::json;
use std::path::Path;

use super::{open, print_json};

/// Run the apply command.
pub fn run(config: &Config, file: &Path) -> Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let sync = SyncResponse::from_json(&bytes)
        .with_context(|| format!("{} is not a sync payload", file.display()))?;

    let manager = open(config)?;
    let report = manager.apply_sync(&sync).context("Failed to apply sync")?;

    tracing::info!(
        "Applied {} ({} events stored, {} handler calls)",
        report.cursor,
        report.written,
        report.dispatch.invocations
    );

    print_json(&json!({
        "next_batch": report.cursor,
        "written": report.written,
    }))
}
