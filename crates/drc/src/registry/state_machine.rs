// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-device lifecycle state machine (`spec.md` §4.6).

/// Maximum backoff delay, in ticks (seconds), before retrying a failed
/// state (`spec.md` §4.6: "linear backoff capped at 30 minutes").
pub const MAX_BACKOFF_TICKS: u64 = 30 * 60;

/// The state a device is in before the backoff timer expires and it
/// retries from `resume_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    pub resume_state: DeviceState,
    pub attempt: u32,
    pub deadline_tick: u64,
}

/// `spec.md` §4.6 lifecycle. `Backoff` is modeled as a separate top-level
/// variant (carrying where to resume) rather than nesting, so a state
/// machine transition table stays a flat match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    New,
    NodeDescriptorRead,
    SimpleDescriptorRead,
    DdfMatched,
    Bindings,
    Reporting,
    Operational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First indication received.
    FirstIndication,
    /// Node descriptor request answered.
    NodeDescriptorAnswered,
    /// Endpoints and clusters enumerated; a DDF was matched (or a
    /// skeleton synthesized).
    EndpointsEnumerated,
    /// Sub-devices instantiated, desired bindings computed.
    SubDevicesInitialized,
    /// All bindings confirmed or skipped.
    BindingsSettled,
    /// All configure-report acknowledgments received or retries exhausted
    /// acceptably.
    ReportingSettled,
    /// A hard failure: no response after the retry budget.
    HardFailure,
}

/// Drives one step of the device lifecycle. Returns `None` when
/// `transition` does not apply to `state` (the caller should treat this as
/// a no-op, not an error — e.g. a duplicate indication arriving twice).
pub fn apply(state: DeviceState, transition: Transition) -> Option<DeviceState> {
    use DeviceState::*;
    use Transition::*;
    match (state, transition) {
        (_, HardFailure) => None, // caller enters Backoff via `backoff_from`, not a plain state
        (New, FirstIndication) => Some(NodeDescriptorRead),
        (NodeDescriptorRead, NodeDescriptorAnswered) => Some(SimpleDescriptorRead),
        (SimpleDescriptorRead, EndpointsEnumerated) => Some(DdfMatched),
        (DdfMatched, SubDevicesInitialized) => Some(Bindings),
        (Bindings, BindingsSettled) => Some(Reporting),
        (Reporting, ReportingSettled) => Some(Operational),
        _ => None,
    }
}

/// Compute the backoff delay for the `attempt`'th consecutive failure
/// (1-indexed), linear and capped at [`MAX_BACKOFF_TICKS`].
pub fn backoff_delay_ticks(attempt: u32) -> u64 {
    let linear = u64::from(attempt) * 60; // one extra minute of delay per attempt
    linear.min(MAX_BACKOFF_TICKS)
}

/// Enter backoff from `failed_state` at `attempt`, resuming there once the
/// deadline (computed from `now_tick`) passes.
pub fn backoff_from(failed_state: DeviceState, attempt: u32, now_tick: u64) -> BackoffState {
    BackoffState {
        resume_state: failed_state,
        attempt,
        deadline_tick: now_tick + backoff_delay_ticks(attempt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_the_happy_path() {
        let mut s = DeviceState::New;
        s = apply(s, Transition::FirstIndication).unwrap();
        assert_eq!(s, DeviceState::NodeDescriptorRead);
        s = apply(s, Transition::NodeDescriptorAnswered).unwrap();
        assert_eq!(s, DeviceState::SimpleDescriptorRead);
        s = apply(s, Transition::EndpointsEnumerated).unwrap();
        assert_eq!(s, DeviceState::DdfMatched);
        s = apply(s, Transition::SubDevicesInitialized).unwrap();
        assert_eq!(s, DeviceState::Bindings);
        s = apply(s, Transition::BindingsSettled).unwrap();
        assert_eq!(s, DeviceState::Reporting);
        s = apply(s, Transition::ReportingSettled).unwrap();
        assert_eq!(s, DeviceState::Operational);
    }

    #[test]
    fn invalid_transition_is_a_no_op_not_a_panic() {
        assert_eq!(apply(DeviceState::New, Transition::ReportingSettled), None);
    }

    #[test]
    fn backoff_delay_is_linear_then_caps() {
        assert_eq!(backoff_delay_ticks(1), 60);
        assert_eq!(backoff_delay_ticks(10), 600);
        assert_eq!(backoff_delay_ticks(1000), MAX_BACKOFF_TICKS);
    }

    #[test]
    fn backoff_from_sets_resume_state_and_deadline() {
        let b = backoff_from(DeviceState::Bindings, 2, 1000);
        assert_eq!(b.resume_state, DeviceState::Bindings);
        assert_eq!(b.deadline_tick, 1000 + 120);
    }
}
