// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP request handlers for the read-mostly REST surface.
//!
//! `spec.md` §1 scopes REST endpoint definitions, HTTP transport, and
//! authentication out of the Device Runtime Core; this crate is the
//! collaborator the core feeds (§2 "Primary data flow"), so it exposes
//! just enough surface to prove the core is reachable: health, a device
//! list/detail view, and state-change submission.

use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use drc::error::Error as DrcError;
use drc::registry::state_change::{DesiredValue, StateChange, StateTimeout};
use drc::resource::item::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// API error response, shaped the way `spec.md` §7's `ErrorKind` set maps
/// onto HTTP status.
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<DrcError> for ApiError {
    fn from(err: DrcError) -> Self {
        let code = match err {
            DrcError::NotFound(_) => 404,
            DrcError::InvalidArgument(_) => 400,
            DrcError::InvalidState(_) => 409,
            DrcError::Decode(_) => 422,
            DrcError::Timeout(_) => 504,
            DrcError::Busy(_) => 429,
            DrcError::Io(_) => 502,
            DrcError::Crypto(_) => 500,
            DrcError::Unsupported(_) => 501,
        };
        Self { error: err.to_string(), code }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub device_count: usize,
    pub tick: u64,
}

/// GET /api/v1/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let runtime = state.runtime.lock().unwrap();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        device_count: runtime.registry.device_count(),
        tick: state.current_tick(),
    })
}

#[derive(Serialize)]
pub struct TickResponse {
    pub tick: u64,
}

/// POST /api/v1/tick
///
/// Advances the runtime's logical clock by one second, flushes any
/// resource items with `needs_store` set through the persistence adapter,
/// and drives the binding/reporting coordinator's queue against the
/// (stub) radio driver (`spec.md` §4.7, §4.13, §6). A real deployment
/// drives this from a 1-second timer rather than an HTTP call; it's
/// exposed here only because REST transport/scheduling is explicitly out
/// of the core's scope (`spec.md` §1) and this crate needs *some* way to
/// demonstrate the tick/persist/coordinator path without a background
/// task.
pub async fn tick(State(state): State<Arc<AppState>>) -> Result<Json<TickResponse>, ApiError> {
    let now = state.advance_tick();
    let mut runtime = state.runtime.lock().unwrap();
    let mut persistence = state.persistence.lock().unwrap();
    let mut radio = state.radio.lock().unwrap();
    runtime.tick(now, &mut *persistence, &mut *radio)?;

    let reachable_devices: std::collections::HashSet<u64> = runtime
        .registry
        .devices()
        .filter(|(_, device)| device.is_reachable(now))
        .map(|(ext_address, _)| *ext_address)
        .collect();
    runtime.drive_coordinator(&mut *radio, |addr| reachable_devices.contains(&addr), now)?;

    Ok(Json(TickResponse { tick: now }))
}

#[derive(Serialize)]
pub struct DeviceSummary {
    pub ext_address: String,
    pub short_address: u16,
    pub is_end_device: bool,
    pub state: String,
    pub last_seen_tick: u64,
}

/// GET /api/v1/devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceSummary>> {
    let runtime = state.runtime.lock().unwrap();
    let mut devices: Vec<DeviceSummary> = runtime
        .registry
        .devices()
        .map(|(ext_address, device)| DeviceSummary {
            ext_address: format!("{ext_address:016x}"),
            short_address: device.short_address,
            is_end_device: device.is_end_device,
            state: device_state_label(device),
            last_seen_tick: device.last_seen_tick,
        })
        .collect();
    devices.sort_by(|a, b| a.ext_address.cmp(&b.ext_address));
    Json(devices)
}

#[derive(Serialize)]
pub struct DeviceDetail {
    pub ext_address: String,
    pub short_address: u16,
    pub is_end_device: bool,
    pub state: String,
    pub endpoints: Vec<u8>,
    pub sub_device_count: usize,
    pub binding_count: usize,
    pub pending_state_changes: usize,
    pub items: Vec<ItemView>,
}

#[derive(Serialize)]
pub struct ItemView {
    pub suffix: String,
    pub value: serde_json::Value,
}

/// GET /api/v1/devices/:ext_address (hex, no prefix)
pub async fn device_detail(
    State(state): State<Arc<AppState>>,
    Path(ext_address_hex): Path<String>,
) -> Result<Json<DeviceDetail>, ApiError> {
    let ext_address = u64::from_str_radix(&ext_address_hex, 16)
        .map_err(|_| DrcError::InvalidArgument(format!("not hex: {ext_address_hex}")))?;

    let runtime = state.runtime.lock().unwrap();
    let device = runtime
        .registry
        .device(ext_address)
        .ok_or_else(|| DrcError::NotFound(format!("device {ext_address_hex}")))?;

    let mut endpoints: Vec<u8> = device.endpoints.keys().copied().collect();
    endpoints.sort_unstable();

    let items = runtime
        .registry
        .resource(device.resource)
        .map(|resource| {
            resource
                .items()
                .iter()
                .map(|item| ItemView {
                    suffix: runtime.ddf_loader.atoms.get(item.descriptor.suffix).to_string(),
                    value: value_to_json(item.to_variant(), &runtime.ddf_loader.atoms),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Json(DeviceDetail {
        ext_address: ext_address_hex,
        short_address: device.short_address,
        is_end_device: device.is_end_device,
        state: device_state_label(device),
        endpoints,
        sub_device_count: device.sub_devices.len(),
        binding_count: device.bindings.len(),
        pending_state_changes: device.state_changes.len(),
        items,
    }))
}

#[derive(Deserialize)]
pub struct StateChangeRequest {
    pub uniqueid: String,
    /// Desired `(suffix, value)` pairs. Only bool/number/string values are
    /// accepted; REST value typing beyond that is out of scope (`spec.md`
    /// §1 Non-goals).
    pub values: std::collections::BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_state_timeout_ticks")]
    pub state_timeout_ticks: u64,
    #[serde(default = "default_change_timeout_ticks")]
    pub change_timeout_ticks: u64,
}

fn default_state_timeout_ticks() -> u64 {
    30
}

fn default_change_timeout_ticks() -> u64 {
    300
}

#[derive(Serialize)]
pub struct StateChangeAccepted {
    pub uniqueid: String,
    pub values_requested: usize,
}

/// POST /api/v1/devices/:ext_address/state
pub async fn submit_state_change(
    State(state): State<Arc<AppState>>,
    Path(ext_address_hex): Path<String>,
    Json(req): Json<StateChangeRequest>,
) -> Result<Json<StateChangeAccepted>, ApiError> {
    let ext_address = u64::from_str_radix(&ext_address_hex, 16)
        .map_err(|_| DrcError::InvalidArgument(format!("not hex: {ext_address_hex}")))?;
    if req.values.is_empty() {
        return Err(DrcError::InvalidArgument("no values in state change".to_string()).into());
    }

    let mut runtime = state.runtime.lock().unwrap();
    let now = state.current_tick();

    let target_uniqueid = req.uniqueid.clone();
    let mut desired = Vec::with_capacity(req.values.len());
    for (suffix_name, json_value) in &req.values {
        let Some(suffix) = runtime.ddf_loader.atoms.intern(suffix_name) else {
            return Err(DrcError::InvalidArgument(format!("bad suffix: {suffix_name}")).into());
        };
        let value = json_to_value(json_value, &mut runtime.ddf_loader.atoms)
            .ok_or_else(|| DrcError::InvalidArgument(format!("unsupported value for {suffix_name}")))?;
        desired.push(DesiredValue { suffix, target: value, confirmed: false });
    }
    let values_requested = desired.len();

    let change = StateChange::new(
        target_uniqueid.clone(),
        desired,
        StateTimeout(req.state_timeout_ticks),
        now + req.change_timeout_ticks,
    );

    let device = runtime
        .registry
        .device_mut(ext_address)
        .ok_or_else(|| DrcError::NotFound(format!("device {ext_address_hex}")))?;
    device.state_changes.push(change);

    Ok(Json(StateChangeAccepted { uniqueid: target_uniqueid, values_requested }))
}

fn device_state_label(device: &drc::registry::Device) -> String {
    use drc::registry::Lifecycle;
    match device.lifecycle {
        Lifecycle::Active(s) => format!("{s:?}"),
        Lifecycle::Backoff(b) => format!("Backoff(resume={:?})", b.resume_state),
    }
}

fn value_to_json(value: &Value, atoms: &drc::atom::AtomTable) -> serde_json::Value {
    match value {
        Value::Bool(b) => serde_json::json!(b),
        Value::UInt(v) => serde_json::json!(v),
        Value::Int(v) => serde_json::json!(v),
        Value::Real(v) => serde_json::json!(v),
        Value::Str(atom) => serde_json::json!(atoms.get(*atom)),
        Value::TimePoint(v) => serde_json::json!(v),
        Value::TimePattern(s) => serde_json::json!(s),
        Value::Empty => serde_json::Value::Null,
    }
}

fn json_to_value(json: &serde_json::Value, atoms: &mut drc::atom::AtomTable) -> Option<Value> {
    match json {
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::Int(i))
            } else {
                n.as_f64().map(Value::Real)
            }
        }
        serde_json::Value::String(s) => atoms.intern(s).map(Value::Str),
        _ => None,
    }
}
