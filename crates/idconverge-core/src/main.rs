// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! idconverge dry run
//!
//! Evaluates one hook against a JSON world snapshot with recording
//! collaborators and prints the dispatch report. Restart nonces and flags
//! persist in a SQLite file between runs, so replaying the same hook twice
//! shows what a real unit would (and would not) do the second time.
//!
//! Usage: `idconverge-core <hook-name>`

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use idconverge_core::config::Config;
use idconverge_core::dryrun::{DryRunWorld, WorldSnapshot};
use idconverge_core::event::Event;
use idconverge_core::persistence::SqliteLocalStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("idconverge_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let hook = std::env::args()
        .nth(1)
        .context("usage: idconverge-core <hook-name>")?;

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        hook = %hook,
        snapshot = %config.snapshot_path.display(),
        state = %config.state_path.display(),
        "Configuration loaded"
    );

    let raw = std::fs::read_to_string(&config.snapshot_path)
        .with_context(|| format!("reading {}", config.snapshot_path.display()))?;
    let snapshot: WorldSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", config.snapshot_path.display()))?;

    let local = Arc::new(SqliteLocalStore::from_path(&config.state_path).await?);
    let world = DryRunWorld::from_snapshot(snapshot);
    let engine = world.engine(local)?;

    let event = Event::from_hook_name(&hook, config.relation_id.clone(), config.remote_unit.clone())?;
    let report = engine.handle(&event).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(out) = &config.snapshot_out {
        let updated = serde_json::to_string_pretty(&world.snapshot().await)?;
        std::fs::write(out, updated).with_context(|| format!("writing {}", out.display()))?;
        info!(path = %out.display(), "Snapshot written");
    }

    Ok(())
}
