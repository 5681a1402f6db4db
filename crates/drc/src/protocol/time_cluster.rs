// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time cluster built-in handler (`SPEC_FULL.md` §2, grounded on
//! `utils/timecluster.cpp`).
//!
//! The engine answers an incoming Time cluster (0x000A) attribute read
//! with the gateway's own wall clock rather than delegating to a DDF
//! hook, since every gateway registers this cluster the same way. The
//! epoch is the ZCL "J2000" epoch (seconds since 2000-01-01T00:00:00Z),
//! not Unix time.

bitflags::bitflags! {
    /// `TimeStatus` attribute bits (0x0001).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimeStatus: u8 {
        const MASTER          = 0b0000_0010;
        const SYNCHRONIZED     = 0b0000_0100;
        const SUPERSEDING      = 0b0000_1000;
        const MASTER_ZONE_DST  = 0b0001_0000;
    }
}

/// Seconds between the Unix epoch and the ZCL "J2000" epoch
/// (2000-01-01T00:00:00Z).
pub const J2000_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Default validity window for `time_valid_until` (`spec.md` §4.8 analog:
/// one day, matching the original's `default_validity_period`).
pub const DEFAULT_VALIDITY_PERIOD_SECS: u32 = 3600 * 24;

/// A snapshot of the Time cluster's attribute set, computed from a wall
/// clock and a fixed daylight-saving schedule supplied by the caller
/// (the core has no timezone database of its own).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeClusterSnapshot {
    pub utc_time: u32,
    pub time_status: TimeStatus,
    pub timezone_offset_secs: i32,
    pub dst_start: u32,
    pub dst_end: u32,
    pub dst_shift_secs: i32,
    pub standard_time: u32,
    pub local_time: u32,
    pub time_valid_until: u32,
}

/// Optional daylight-saving schedule for the current year, expressed as
/// J2000-epoch second offsets. `None` means the timezone has no DST
/// transitions (the common case for fixed-offset zones).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DstSchedule {
    pub start: u32,
    pub end: u32,
    pub shift_secs: i32,
}

/// Compute the Time cluster snapshot for `now_unix_secs`, a fixed
/// `timezone_offset_secs` (the standard-time offset from UTC), and an
/// optional `dst` schedule for the current year.
pub fn current_time(now_unix_secs: i64, timezone_offset_secs: i32, dst: Option<DstSchedule>) -> TimeClusterSnapshot {
    let utc_time = (now_unix_secs - J2000_EPOCH_OFFSET_SECS).max(0) as u32;
    let mut status = TimeStatus::MASTER | TimeStatus::SUPERSEDING;
    let standard_time = (utc_time as i64 + timezone_offset_secs as i64) as u32;
    let mut local_time = standard_time;

    if let Some(schedule) = dst {
        status |= TimeStatus::MASTER_ZONE_DST;
        let in_dst = utc_time >= schedule.start && utc_time <= schedule.end;
        if in_dst {
            local_time = (standard_time as i64 + schedule.shift_secs as i64) as u32;
        }
        TimeClusterSnapshot {
            utc_time,
            time_status: status,
            timezone_offset_secs,
            dst_start: schedule.start,
            dst_end: schedule.end,
            dst_shift_secs: schedule.shift_secs,
            standard_time,
            local_time,
            time_valid_until: utc_time.saturating_add(DEFAULT_VALIDITY_PERIOD_SECS),
        }
    } else {
        TimeClusterSnapshot {
            utc_time,
            time_status: status,
            timezone_offset_secs,
            dst_start: 0,
            dst_end: 0,
            dst_shift_secs: 0,
            standard_time,
            local_time,
            time_valid_until: utc_time.saturating_add(DEFAULT_VALIDITY_PERIOD_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_time_is_seconds_since_j2000_not_unix_epoch() {
        let snapshot = current_time(J2000_EPOCH_OFFSET_SECS + 100, 0, None);
        assert_eq!(snapshot.utc_time, 100);
    }

    #[test]
    fn without_dst_schedule_standard_and_local_time_match() {
        let snapshot = current_time(J2000_EPOCH_OFFSET_SECS + 1000, 3600, None);
        assert_eq!(snapshot.standard_time, snapshot.local_time);
        assert!(!snapshot.time_status.contains(TimeStatus::MASTER_ZONE_DST));
    }

    #[test]
    fn inside_dst_window_local_time_gets_shifted() {
        let schedule = DstSchedule { start: 1000, end: 2000, shift_secs: 3600 };
        let snapshot = current_time(J2000_EPOCH_OFFSET_SECS + 1500, 0, Some(schedule));
        assert_eq!(snapshot.local_time, snapshot.standard_time + 3600);
        assert!(snapshot.time_status.contains(TimeStatus::MASTER_ZONE_DST));
    }

    #[test]
    fn outside_dst_window_local_time_matches_standard_time() {
        let schedule = DstSchedule { start: 1000, end: 2000, shift_secs: 3600 };
        let snapshot = current_time(J2000_EPOCH_OFFSET_SECS + 50, 0, Some(schedule));
        assert_eq!(snapshot.local_time, snapshot.standard_time);
    }

    #[test]
    fn time_valid_until_is_one_day_ahead() {
        let snapshot = current_time(J2000_EPOCH_OFFSET_SECS + 500, 0, None);
        assert_eq!(snapshot.time_valid_until, 500 + DEFAULT_VALIDITY_PERIOD_SECS);
    }
}
