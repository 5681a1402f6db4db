// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime configuration (`SPEC_FULL.md` §1.3).
//!
//! Carries the literal tunables `spec.md` names throughout §4 as a single
//! serde-deserializable struct, built either from defaults or via
//! [`RuntimeConfig::builder`]. The embedding binary is responsible for
//! loading a TOML file into this shape; the core itself never touches the
//! filesystem for configuration.

use serde::{Deserialize, Serialize};

/// At most this many binding/reporting tasks may be in flight at once
/// (`spec.md` §4.7).
pub const DEFAULT_MAX_ACTIVE_BINDING_TASKS: usize = crate::coordinator::MAX_ACTIVE_BINDING_TASKS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// At most this many binding/reporting tasks may be in flight at once.
    pub max_active_binding_tasks: usize,
    /// Ticks before a mains-powered binding task times out.
    pub binding_timeout_ticks: u64,
    /// Ticks before an end-device binding task times out.
    pub binding_timeout_end_device_ticks: u64,
    /// Retries before a binding task gives up and schedules device backoff.
    pub binding_max_retries: u32,
    /// Seconds before a local APS confirm timeout fires.
    pub aps_confirm_timeout_secs: u64,
    /// Seconds before a mains-powered application response times out.
    pub app_response_timeout_secs: u64,
    /// Seconds before an end-device application response times out.
    pub app_response_timeout_end_device_secs: u64,
    /// Soft cap on the event bus's non-urgent lane.
    pub event_bus_soft_cap: usize,
    /// Seconds an OTA image-block/page activity marks the device "busy".
    pub ota_busy_window_secs: u64,
    /// Default poll-control check-in interval, quarter-seconds.
    pub poll_checkin_interval_qs: u32,
    /// Default poll-control long-poll interval, quarter-seconds.
    pub poll_long_poll_interval_qs: u32,
    /// Root directory for system DDF raw-JSON and bundle files.
    pub ddf_system_storage_root: String,
    /// Root directory for user-supplied DDF raw-JSON and bundle files.
    pub ddf_user_storage_root: String,
    /// `Debounce` delays for the persistence adapter (§6 "Persistence
    /// adapter"), in seconds.
    pub db_short_save_delay_secs: u64,
    pub db_long_save_delay_secs: u64,
    /// This gateway's own extended address, used as the destination of
    /// outbound Bind requests (`spec.md` §4.7). Zero until the radio
    /// driver's MAC address parameter has been read at startup.
    pub gateway_ext_address: u64,
    /// This gateway's own endpoint, used as both the source endpoint of
    /// outbound requests and the Bind destination endpoint.
    pub gateway_endpoint: u8,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_active_binding_tasks: DEFAULT_MAX_ACTIVE_BINDING_TASKS,
            binding_timeout_ticks: crate::coordinator::TIMEOUT_TICKS,
            binding_timeout_end_device_ticks: crate::coordinator::TIMEOUT_END_DEVICE_TICKS,
            binding_max_retries: crate::coordinator::MAX_RETRIES,
            aps_confirm_timeout_secs: crate::protocol::APS_CONFIRM_TIMEOUT_SECS,
            app_response_timeout_secs: crate::protocol::APP_RESPONSE_TIMEOUT_SECS,
            app_response_timeout_end_device_secs: crate::protocol::APP_RESPONSE_TIMEOUT_END_DEVICE_SECS,
            event_bus_soft_cap: crate::event_bus::NON_URGENT_SOFT_CAP,
            ota_busy_window_secs: crate::ota::OTA_BUSY_WINDOW_SECS,
            poll_checkin_interval_qs: crate::poll_control::DEFAULT_CHECKIN_INTERVAL_QS,
            poll_long_poll_interval_qs: crate::poll_control::DEFAULT_LONG_POLL_INTERVAL_QS,
            ddf_system_storage_root: "/usr/share/drc/devices".to_string(),
            ddf_user_storage_root: "/var/lib/drc/devices".to_string(),
            db_short_save_delay_secs: 1,
            db_long_save_delay_secs: 60,
            gateway_ext_address: 0,
            gateway_endpoint: 1,
        }
    }
}

impl RuntimeConfig {
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }
}

/// Fluent builder mirroring the teacher's `Config::builder()...build()`
/// shape. Every setter is optional; unset fields fall back to
/// [`RuntimeConfig::default`].
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    max_active_binding_tasks: Option<usize>,
    event_bus_soft_cap: Option<usize>,
    ota_busy_window_secs: Option<u64>,
    ddf_system_storage_root: Option<String>,
    ddf_user_storage_root: Option<String>,
}

impl RuntimeConfigBuilder {
    pub fn max_active_binding_tasks(mut self, n: usize) -> Self {
        self.max_active_binding_tasks = Some(n);
        self
    }

    pub fn event_bus_soft_cap(mut self, n: usize) -> Self {
        self.event_bus_soft_cap = Some(n);
        self
    }

    pub fn ota_busy_window_secs(mut self, secs: u64) -> Self {
        self.ota_busy_window_secs = Some(secs);
        self
    }

    pub fn ddf_system_storage_root(mut self, path: impl Into<String>) -> Self {
        self.ddf_system_storage_root = Some(path.into());
        self
    }

    pub fn ddf_user_storage_root(mut self, path: impl Into<String>) -> Self {
        self.ddf_user_storage_root = Some(path.into());
        self
    }

    pub fn build(self) -> RuntimeConfig {
        let defaults = RuntimeConfig::default();
        RuntimeConfig {
            max_active_binding_tasks: self.max_active_binding_tasks.unwrap_or(defaults.max_active_binding_tasks),
            event_bus_soft_cap: self.event_bus_soft_cap.unwrap_or(defaults.event_bus_soft_cap),
            ota_busy_window_secs: self.ota_busy_window_secs.unwrap_or(defaults.ota_busy_window_secs),
            ddf_system_storage_root: self.ddf_system_storage_root.unwrap_or(defaults.ddf_system_storage_root),
            ddf_user_storage_root: self.ddf_user_storage_root.unwrap_or(defaults.ddf_user_storage_root),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_literals() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.max_active_binding_tasks, 3);
        assert_eq!(cfg.binding_timeout_ticks, 16);
        assert_eq!(cfg.binding_timeout_end_device_ticks, 72);
        assert_eq!(cfg.ota_busy_window_secs, 60);
        assert_eq!(cfg.poll_checkin_interval_qs, 14400);
    }

    #[test]
    fn builder_overrides_only_touched_fields() {
        let cfg = RuntimeConfig::builder().max_active_binding_tasks(5).build();
        assert_eq!(cfg.max_active_binding_tasks, 5);
        assert_eq!(cfg.ota_busy_window_secs, RuntimeConfig::default().ota_busy_window_secs);
    }

    #[test]
    fn roundtrips_through_toml() {
        let cfg = RuntimeConfig::default();
        let text = toml_like_roundtrip(&cfg);
        assert!(text.contains("max_active_binding_tasks"));
    }

    fn toml_like_roundtrip(cfg: &RuntimeConfig) -> String {
        serde_json::to_string(cfg).unwrap()
    }
}
