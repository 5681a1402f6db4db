// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DRC Persistence Service CLI
//!
//! Opens (creating if absent) the SQLite-backed persistence store the
//! Device Runtime Core uses for secrets, resource items, the ZCL value
//! cache, and the `(manufacturer, model)` identifier-pair index, and
//! reports a one-shot summary. The embedding gateway binary links
//! `drc_persistence` directly; this CLI exists for operators to inspect
//! or pre-create a store outside of a running gateway.
//!
//! # Usage
//!
//! ```bash
//! # Create/open the default store and print a summary
//! drc-persistence --db drc_persist.db
//!
//! # Tune the debounce delays the embedding runtime should use
//! drc-persistence --db drc_persist.db --short-save-delay 1 --long-save-delay 60
//! ```

use anyhow::Result;
use clap::Parser;
use drc::iface::PersistenceAdapter;
use drc_persistence::{Config, SqliteStore};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "drc-persistence")]
#[command(about = "DRC persistence store inspector/initializer", long_about = None)]
struct Args {
    /// SQLite database path.
    #[arg(short, long, default_value = "drc_persist.db")]
    db: String,

    /// Seconds to wait after a change before writing it.
    #[arg(long, default_value_t = 1)]
    short_save_delay: u64,

    /// Seconds to wait before a second, coalescing write.
    #[arg(long, default_value_t = 60)]
    long_save_delay: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(filter).with_target(false).init();

    let config = Config::builder()
        .db_path(args.db.clone())
        .short_save_delay_secs(args.short_save_delay)
        .long_save_delay_secs(args.long_save_delay)
        .build();

    info!(db = %config.db_path, "opening persistence store");
    let store = SqliteStore::new(&config.db_path)?;

    let pairs = store.identifier_pairs()?;
    info!(identifier_pairs = pairs.len(), "store ready");
    for pair in &pairs {
        println!("{}\t{}", pair.manufacturer, pair.model);
    }

    Ok(())
}
