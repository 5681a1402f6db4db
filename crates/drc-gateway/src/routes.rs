// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Route definitions for the REST API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// API v1 routes.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/tick", post(handlers::tick))
        .route("/api/v1/devices", get(handlers::list_devices))
        .route("/api/v1/devices/:ext_address", get(handlers::device_detail))
        .route("/api/v1/devices/:ext_address/state", post(handlers::submit_state_change))
}
