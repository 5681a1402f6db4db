// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cluster Protocol Engine (`spec.md` §4.8): sequence numbering,
//! transaction correlation, and per-cluster dispatch.

pub mod action_map;
pub mod attribute;
pub mod frame;
pub mod time_cluster;

pub use action_map::{ActionKey, ActionMap, ActionMapRef};
pub use attribute::{decode_attribute, encode_attribute, AttributeValue, DataType};
pub use frame::{decode_frame, encode_frame, Direction, FrameControl, ZclFrame, ZclHeader};
pub use time_cluster::{current_time, DstSchedule, TimeClusterSnapshot, TimeStatus};

use std::collections::HashMap;

/// Window within which an inbound response is matched against the set of
/// outstanding requests (`spec.md` §4.8).
pub const RESPONSE_CORRELATION_WINDOW_SECS: u64 = 6;
/// Absence of a local APS confirm within this many seconds fails the
/// request.
pub const APS_CONFIRM_TIMEOUT_SECS: u64 = 8;
/// Absence of an application response within this many seconds (mains
/// powered).
pub const APP_RESPONSE_TIMEOUT_SECS: u64 = 16;
/// Same, for end devices.
pub const APP_RESPONSE_TIMEOUT_END_DEVICE_SECS: u64 = 72;

/// Generates the process-wide ZCL sequence number: 8-bit, wrapping,
/// never zero (`spec.md` §4.8).
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceGenerator(u8);

impl SequenceGenerator {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn next(&mut self) -> u8 {
        self.0 = self.0.wrapping_add(1);
        if self.0 == 0 {
            self.0 = 1;
        }
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    SentWaitConfirm,
    SentWaitResponse,
}

#[derive(Debug, Clone, Copy)]
pub struct PendingRequest {
    pub sequence_number: u8,
    pub state: PendingState,
    pub is_end_device: bool,
    pub sent_tick: u64,
    pub state_entered_tick: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No APS confirm arrived within [`APS_CONFIRM_TIMEOUT_SECS`].
    LocalConfirm,
    /// No application response arrived in time.
    ApplicationResponse,
}

/// Tracks outstanding unicast requests by sequence number and resolves
/// timeouts.
#[derive(Debug, Default)]
pub struct TransactionTable {
    pending: HashMap<u8, PendingRequest>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, sequence_number: u8, is_end_device: bool, now_tick: u64) {
        self.pending.insert(
            sequence_number,
            PendingRequest {
                sequence_number,
                state: PendingState::SentWaitConfirm,
                is_end_device,
                sent_tick: now_tick,
                state_entered_tick: now_tick,
            },
        );
    }

    /// An APS confirm moves a pending unicast request
    /// `SentWaitConfirm → SentWaitResponse`.
    pub fn on_aps_confirm(&mut self, sequence_number: u8, now_tick: u64) -> bool {
        if let Some(req) = self.pending.get_mut(&sequence_number) {
            if req.state == PendingState::SentWaitConfirm {
                req.state = PendingState::SentWaitResponse;
                req.state_entered_tick = now_tick;
                return true;
            }
        }
        false
    }

    /// Matches an inbound response, if the sequence number is pending and
    /// arrived within the correlation window.
    pub fn take_matching_response(&mut self, sequence_number: u8, now_tick: u64) -> Option<PendingRequest> {
        let req = self.pending.get(&sequence_number).copied()?;
        if now_tick.saturating_sub(req.sent_tick) > RESPONSE_CORRELATION_WINDOW_SECS {
            return None;
        }
        self.pending.remove(&sequence_number);
        Some(req)
    }

    /// Scan for timed-out requests, removing and returning them.
    pub fn drain_timeouts(&mut self, now_tick: u64) -> Vec<(PendingRequest, TimeoutKind)> {
        let mut timed_out = Vec::new();
        self.pending.retain(|_, req| {
            let elapsed = now_tick.saturating_sub(req.state_entered_tick);
            let kind = match req.state {
                PendingState::SentWaitConfirm if elapsed >= APS_CONFIRM_TIMEOUT_SECS => {
                    Some(TimeoutKind::LocalConfirm)
                }
                PendingState::SentWaitResponse => {
                    let budget = if req.is_end_device {
                        APP_RESPONSE_TIMEOUT_END_DEVICE_SECS
                    } else {
                        APP_RESPONSE_TIMEOUT_SECS
                    };
                    if elapsed >= budget {
                        Some(TimeoutKind::ApplicationResponse)
                    } else {
                        None
                    }
                }
                _ => None,
            };
            match kind {
                Some(kind) => {
                    timed_out.push((*req, kind));
                    false
                }
                None => true,
            }
        });
        timed_out
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Decoded inbound indication handed to a per-cluster handler.
#[derive(Debug, Clone)]
pub struct Indication {
    pub src_short_address: u16,
    pub src_ext_address: Option<u64>,
    pub src_endpoint: u8,
    pub cluster_id: u16,
    pub profile_id: u16,
    pub header: ZclHeader,
    pub payload: Vec<u8>,
}

/// Sequence generator and transaction table shared by every cluster
/// handler the runtime dispatches a decoded [`Indication`] to.
#[derive(Default)]
pub struct ClusterProtocolEngine {
    pub sequences: SequenceGenerator,
    pub transactions: TransactionTable,
}

impl ClusterProtocolEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes` into a [`ZclFrame`] and hand the caller back a
    /// [`Indication`] ready to route to a per-cluster handler. Parse errors
    /// are returned rather than swallowed, matching §4.8's "reject ... and
    /// report a decode error rather than partially apply state changes":
    /// the caller logs and drops them without aborting the scheduler tick.
    pub fn dispatch(
        &mut self,
        cluster_id: u16,
        profile_id: u16,
        src_short_address: u16,
        src_ext_address: Option<u64>,
        src_endpoint: u8,
        bytes: &[u8],
    ) -> crate::error::Result<Indication> {
        let frame = decode_frame(bytes)?;
        Ok(Indication {
            src_short_address,
            src_ext_address,
            src_endpoint,
            cluster_id,
            profile_id,
            header: frame.header,
            payload: frame.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_generator_wraps_and_skips_zero() {
        let mut gen = SequenceGenerator::new();
        let mut last = gen.next();
        assert_eq!(last, 1);
        for _ in 0..254 {
            last = gen.next();
        }
        assert_eq!(last, 255);
        let wrapped = gen.next();
        assert_eq!(wrapped, 1); // never zero
    }

    #[test]
    fn response_outside_correlation_window_is_not_matched() {
        let mut table = TransactionTable::new();
        table.submit(5, false, 0);
        assert!(table.take_matching_response(5, 7).is_none());
        table.submit(5, false, 0);
        assert!(table.take_matching_response(5, 6).is_some());
    }

    #[test]
    fn local_confirm_timeout_after_eight_seconds() {
        let mut table = TransactionTable::new();
        table.submit(1, false, 0);
        assert!(table.drain_timeouts(7).is_empty());
        let timed_out = table.drain_timeouts(8);
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].1, TimeoutKind::LocalConfirm);
    }

    #[test]
    fn application_response_timeout_differs_for_end_devices() {
        let mut mains = TransactionTable::new();
        mains.submit(1, false, 0);
        mains.on_aps_confirm(1, 1);
        assert!(mains.drain_timeouts(16).len() == 1);

        let mut end_device = TransactionTable::new();
        end_device.submit(1, true, 0);
        end_device.on_aps_confirm(1, 1);
        assert!(end_device.drain_timeouts(16).is_empty());
        assert_eq!(end_device.drain_timeouts(72).len(), 1);
    }

    #[test]
    fn dispatch_reports_decode_error_without_panicking() {
        let mut engine = ClusterProtocolEngine::new();
        let result = engine.dispatch(0x0006, 0x0104, 1, None, 1, &[]);
        assert!(result.is_err());
    }
}
