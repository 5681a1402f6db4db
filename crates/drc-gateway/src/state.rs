// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared application state: the embedded [`drc::DeviceRuntime`] plus its
//! persistence adapter, guarded by a mutex each since the core's
//! single-threaded cooperative model (`spec.md` §5) means only one
//! request is ever actually driving it at a time.

use drc::iface::{ApsRequest, ApsRequestId, RadioDriver, RadioParameter, RadioParameterValue};
use drc::DeviceRuntime;
use drc_persistence::SqliteStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Stand-in [`RadioDriver`] for this REST surface: there is no serial/HCI
/// radio behind it, so every submitted request is just logged and handed
/// a locally generated id. `spec.md` §1 scopes the actual radio transport
/// out of the core; this crate needs *some* `RadioDriver` to drive
/// `DeviceRuntime::tick`/`drive_coordinator` at all.
#[derive(Debug, Default)]
pub struct LoggingRadio {
    next_request_id: u16,
}

impl RadioDriver for LoggingRadio {
    fn submit_aps_request(&mut self, req: ApsRequest) -> drc::error::Result<ApsRequestId> {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        tracing::debug!(
            cluster_id = format!("{:#06x}", req.cluster_id),
            profile_id = format!("{:#06x}", req.profile_id),
            payload_len = req.payload.len(),
            "radio: submit_aps_request (no backing transport)"
        );
        Ok(ApsRequestId(self.next_request_id))
    }

    fn get_parameter(&self, key: RadioParameter) -> drc::error::Result<RadioParameterValue> {
        Err(drc::error::Error::Unsupported(format!("{key:?}: no radio transport attached")))
    }

    fn set_parameter(&mut self, key: RadioParameter, _value: RadioParameterValue) -> drc::error::Result<()> {
        Err(drc::error::Error::Unsupported(format!("{key:?}: no radio transport attached")))
    }
}

pub struct AppState {
    pub runtime: Mutex<DeviceRuntime>,
    pub persistence: Mutex<SqliteStore>,
    pub radio: Mutex<LoggingRadio>,
    /// Logical tick counter advanced by the poller, not wall-clock time
    /// (`spec.md` §4.13: timers are measured in logical seconds).
    tick: AtomicU64,
}

impl AppState {
    pub fn new(runtime: DeviceRuntime, persistence: SqliteStore) -> Self {
        Self {
            runtime: Mutex::new(runtime),
            persistence: Mutex::new(persistence),
            radio: Mutex::new(LoggingRadio::default()),
            tick: AtomicU64::new(0),
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    pub fn advance_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }
}
