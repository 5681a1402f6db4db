// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device entity (`spec.md` §3 "Device").

use super::state_change::StateChange;
use super::state_machine::{BackoffState, DeviceState};
use crate::atom::Atom;
use crate::ddf::model::{Binding, DdfRef};
use crate::resource::ResourceHandle;
use std::collections::HashMap;

/// Either in a lifecycle state or waiting out a backoff before resuming
/// one, mirroring the `* → Backoff` transition in `spec.md` §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active(DeviceState),
    Backoff(BackoffState),
}

/// A discovered device: its radio identity, matched DDF, resolved
/// bindings, and pending state changes.
#[derive(Debug, Clone)]
pub struct Device {
    pub resource: ResourceHandle,
    pub ext_address: u64,
    pub short_address: u16,
    /// Endpoint -> set of cluster ids, learned from the simple descriptor.
    pub endpoints: HashMap<u8, Vec<u16>>,
    pub lifecycle: Lifecycle,
    pub ddf: Option<DdfRef>,
    /// Observed from Basic cluster (0x0000) attribute reports (manufacturer
    /// name 0x0004 / model id 0x0005) rather than a ZDP descriptor, since
    /// `ApsIndication` carries no node/simple descriptor fields.
    pub manufacturer: Option<Atom>,
    pub model: Option<Atom>,
    pub sub_devices: Vec<ResourceHandle>,
    pub bindings: Vec<Binding>,
    pub state_changes: Vec<StateChange>,
    /// True for end devices (battery-powered, not always listening),
    /// driving the longer `TimeoutEndDevice` budgets in §4.7/§4.8.
    pub is_end_device: bool,
    /// Logical tick of the last indication received from this device,
    /// used for the coordinator's "recently heard from" reachability
    /// check (§4.7).
    pub last_seen_tick: u64,
}

impl Device {
    pub fn new(resource: ResourceHandle, ext_address: u64, short_address: u16, is_end_device: bool) -> Self {
        Self {
            resource,
            ext_address,
            short_address,
            endpoints: HashMap::new(),
            lifecycle: Lifecycle::Active(DeviceState::New),
            ddf: None,
            manufacturer: None,
            model: None,
            sub_devices: Vec::new(),
            bindings: Vec::new(),
            state_changes: Vec::new(),
            is_end_device,
            last_seen_tick: 0,
        }
    }

    /// A device is reachable for binding-task scheduling if it's mains
    /// powered, or an end device heard from within the last 7 seconds
    /// (`spec.md` §4.7).
    pub fn is_reachable(&self, now_tick: u64) -> bool {
        if !self.is_end_device {
            return true;
        }
        now_tick.saturating_sub(self.last_seen_tick) <= 7
    }

    pub fn is_in_backoff(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Backoff(_))
    }

    /// `None` if the device is in backoff or otherwise has no current
    /// active state.
    pub fn active_state(&self) -> Option<DeviceState> {
        match self.lifecycle {
            Lifecycle::Active(s) => Some(s),
            Lifecycle::Backoff(_) => None,
        }
    }

    /// Resume from backoff once `now_tick` reaches the deadline. No-op if
    /// not currently backing off or the deadline hasn't passed.
    pub fn resume_if_due(&mut self, now_tick: u64) {
        if let Lifecycle::Backoff(b) = self.lifecycle {
            if now_tick >= b.deadline_tick {
                self.lifecycle = Lifecycle::Active(b.resume_state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> ResourceHandle {
        ResourceHandle { index: 0, generation: 0 }
    }

    #[test]
    fn mains_powered_device_always_reachable() {
        let dev = Device::new(handle(), 1, 1, false);
        assert!(dev.is_reachable(999_999));
    }

    #[test]
    fn end_device_reachable_only_within_seven_seconds() {
        let mut dev = Device::new(handle(), 1, 1, true);
        dev.last_seen_tick = 100;
        assert!(dev.is_reachable(107));
        assert!(!dev.is_reachable(108));
    }

    #[test]
    fn resumes_from_backoff_at_deadline() {
        let mut dev = Device::new(handle(), 1, 1, false);
        dev.lifecycle = Lifecycle::Backoff(super::super::state_machine::backoff_from(
            DeviceState::Bindings,
            1,
            0,
        ));
        dev.resume_if_due(59);
        assert!(dev.is_in_backoff());
        dev.resume_if_due(60);
        assert_eq!(dev.active_state(), Some(DeviceState::Bindings));
    }
}
