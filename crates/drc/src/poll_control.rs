// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Poll Control Handler (`spec.md` §4.11).

bitflags::bitflags! {
    /// `config/pending` bitmap on a device, cleared per-flag on successful
    /// apply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PendingConfig: u8 {
        const WRITE_POLL_CHECKIN_INTERVAL = 0b0000_0001;
        const SET_LONG_POLL_INTERVAL       = 0b0000_0010;
    }
}

/// Default check-in interval, quarter-seconds (1 hour, `spec.md` §4.11).
pub const DEFAULT_CHECKIN_INTERVAL_QS: u32 = 14400;
/// Default long poll interval, quarter-seconds (15 minutes).
pub const DEFAULT_LONG_POLL_INTERVAL_QS: u32 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckIn {
    pub fast_poll_timeout: u16,
}

/// One outbound action the handler decided to take in response to a
/// check-in or a pending config flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollControlAction {
    /// Reply to the check-in, keeping fast poll off.
    CheckInResponse { start_fast_polling: bool },
    /// Write the 32-bit check-in interval attribute.
    WritePollCheckinInterval(u32),
    /// Issue the "set long poll interval" cluster command.
    SetLongPollInterval(u32),
}

#[derive(Debug, Clone, Default)]
pub struct PollControlState {
    pub pending: PendingConfig,
    pub checkin_interval_qs: u32,
    pub long_poll_interval_qs: u32,
}

impl PollControlState {
    pub fn new() -> Self {
        Self {
            pending: PendingConfig::empty(),
            checkin_interval_qs: DEFAULT_CHECKIN_INTERVAL_QS,
            long_poll_interval_qs: DEFAULT_LONG_POLL_INTERVAL_QS,
        }
    }

    pub fn request_checkin_interval(&mut self, quarters: u32) {
        self.checkin_interval_qs = quarters;
        self.pending |= PendingConfig::WRITE_POLL_CHECKIN_INTERVAL;
    }

    pub fn request_long_poll_interval(&mut self, quarters: u32) {
        self.long_poll_interval_qs = quarters;
        self.pending |= PendingConfig::SET_LONG_POLL_INTERVAL;
    }

    /// React to an inbound check-in: always answer; opportunistically
    /// apply any pending configuration in the same pass
    /// (`spec.md` §4.11: "Two pending configurations may be applied
    /// opportunistically").
    pub fn on_checkin(&mut self, _checkin: CheckIn) -> Vec<PollControlAction> {
        let mut actions = vec![PollControlAction::CheckInResponse { start_fast_polling: false }];
        if self.pending.contains(PendingConfig::WRITE_POLL_CHECKIN_INTERVAL) {
            actions.push(PollControlAction::WritePollCheckinInterval(self.checkin_interval_qs));
        }
        if self.pending.contains(PendingConfig::SET_LONG_POLL_INTERVAL) {
            actions.push(PollControlAction::SetLongPollInterval(self.long_poll_interval_qs));
        }
        actions
    }

    /// Clear a flag once the gateway confirms the write/command applied.
    pub fn mark_applied(&mut self, flag: PendingConfig) {
        self.pending.remove(flag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkin_always_replies_even_with_nothing_pending() {
        let mut state = PollControlState::new();
        let actions = state.on_checkin(CheckIn { fast_poll_timeout: 0 });
        assert_eq!(actions, vec![PollControlAction::CheckInResponse { start_fast_polling: false }]);
    }

    #[test]
    fn pending_configs_apply_opportunistically_on_checkin() {
        let mut state = PollControlState::new();
        state.request_checkin_interval(7200);
        state.request_long_poll_interval(1800);
        let actions = state.on_checkin(CheckIn { fast_poll_timeout: 0 });
        assert_eq!(actions.len(), 3);
        assert!(actions.contains(&PollControlAction::WritePollCheckinInterval(7200)));
        assert!(actions.contains(&PollControlAction::SetLongPollInterval(1800)));
    }

    #[test]
    fn mark_applied_clears_only_that_flag() {
        let mut state = PollControlState::new();
        state.request_checkin_interval(7200);
        state.request_long_poll_interval(1800);
        state.mark_applied(PendingConfig::WRITE_POLL_CHECKIN_INTERVAL);
        assert!(!state.pending.contains(PendingConfig::WRITE_POLL_CHECKIN_INTERVAL));
        assert!(state.pending.contains(PendingConfig::SET_LONG_POLL_INTERVAL));
    }
}
