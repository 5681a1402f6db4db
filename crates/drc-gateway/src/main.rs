// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DRC Gateway - minimal REST surface embedding the Device Runtime Core
//!
//! `spec.md` §1 scopes the full REST HTTP surface out of the core; this
//! binary is the collaborator §2's data-flow diagram feeds into and out
//! of. It embeds a [`drc::DeviceRuntime`] directly rather than hopping
//! through a separate admin protocol, since the core is an in-process
//! library, not a standalone daemon.
//!
//! # Usage
//!
//! ```bash
//! # Start the gateway on the default port, against a fresh SQLite store
//! drc-gateway --db drc_persist.db
//!
//! # Custom port and bind address
//! drc-gateway --port 9000 --bind 0.0.0.0
//! ```
//!
//! # Endpoints
//!
//! - `GET  /api/v1/health` - health check
//! - `POST /api/v1/tick` - advance the logical clock and flush pending writes
//! - `GET  /api/v1/devices` - device list
//! - `GET  /api/v1/devices/:ext_address` - device detail (hex extended address)
//! - `POST /api/v1/devices/:ext_address/state` - submit a state change

mod handlers;
mod routes;
mod state;

use axum::Router;
use clap::Parser;
use drc::config::RuntimeConfig;
use drc::DeviceRuntime;
use drc_persistence::SqliteStore;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// DRC REST API Gateway
#[derive(Parser, Debug)]
#[command(name = "drc-gateway")]
#[command(about = "Minimal REST surface embedding the Device Runtime Core")]
#[command(version)]
struct Args {
    /// HTTP server port.
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Bind address.
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// SQLite persistence store path.
    #[arg(long, default_value = "drc_persist.db")]
    db: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(filter).with_target(false).init();

    let persistence = SqliteStore::new(&args.db).expect("failed to open persistence store");
    let runtime = DeviceRuntime::new(RuntimeConfig::default());
    let app_state = Arc::new(state::AppState::new(runtime, persistence));

    let app = build_router(app_state);

    let addr = format!("{}:{}", args.bind, args.port);
    info!("DRC Gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("HTTP server: http://{}", addr);
    info!("Persistence store: {}", args.db);

    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}

fn build_router(state: Arc<state::AppState>) -> Router {
    routes::api_routes()
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_builds_without_panicking() {
        let persistence = SqliteStore::new_in_memory().unwrap();
        let runtime = DeviceRuntime::new(RuntimeConfig::default());
        let state = Arc::new(state::AppState::new(runtime, persistence));
        let _router = build_router(state);
    }
}
