// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-threaded, ordered event queue (`spec.md` §4.3).
//!
//! Two lanes: urgent and non-urgent. A tick drains the urgent lane
//! completely, then takes one non-urgent event, repeating until either lane
//! is empty or the tick's time budget is spent. Events are single-shot;
//! there is no cancellation. Handlers must never call back into the bus
//! synchronously — they enqueue follow-up events, which are only delivered
//! on a later drain.

use crate::atom::Atom;
use crate::resource::ResourcePrefix;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Soft cap on the non-urgent queue (`spec.md` §4.3). Beyond this, the
/// oldest events are kept and new duplicates are rejected outright.
pub const NON_URGENT_SOFT_CAP: usize = 1024;

/// Budget a single `drain` call spends before yielding back to the
/// scheduler.
pub const DRAIN_BUDGET: Duration = Duration::from_millis(10);

/// A single event on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub prefix: ResourcePrefix,
    /// Item suffix, or a well-known event tag atom for non-item events.
    pub suffix: Atom,
    pub numeric: i64,
    pub payload: Vec<u8>,
    /// Device key (extended address), when the event is device-scoped.
    pub device_key: Option<u64>,
}

impl Event {
    fn dedupe_key(&self) -> (ResourcePrefix, Atom, i64, Option<u64>, usize) {
        (self.prefix, self.suffix, self.numeric, self.device_key, self.payload.len())
    }
}

/// Priority lane an event is enqueued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Urgent,
    NonUrgent,
}

/// The ordered event queue itself.
#[derive(Debug, Default)]
pub struct EventBus {
    urgent: VecDeque<Event>,
    non_urgent: VecDeque<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event on the given lane. Non-urgent enqueues deduplicate
    /// against every event already queued (not yet dispatched) with an
    /// identical (prefix, suffix, numeric, device key, payload length);
    /// duplicates are silently dropped. When the non-urgent queue is at or
    /// above [`NON_URGENT_SOFT_CAP`], new *duplicate* events are rejected
    /// but the oldest entries are never evicted to make room for novel
    /// ones — backpressure caps growth, it does not reorder.
    pub fn enqueue(&mut self, event: Event, lane: Lane) {
        match lane {
            Lane::Urgent => self.urgent.push_back(event),
            Lane::NonUrgent => {
                let key = event.dedupe_key();
                if self.non_urgent.iter().any(|e| e.dedupe_key() == key) {
                    return;
                }
                if self.non_urgent.len() >= NON_URGENT_SOFT_CAP {
                    tracing::warn!(
                        target: "drc::event_bus",
                        "non-urgent queue at soft cap ({}), dropping new event",
                        NON_URGENT_SOFT_CAP
                    );
                    return;
                }
                self.non_urgent.push_back(event);
            }
        }
    }

    pub fn urgent_len(&self) -> usize {
        self.urgent.len()
    }

    pub fn non_urgent_len(&self) -> usize {
        self.non_urgent.len()
    }

    /// Drain events for up to [`DRAIN_BUDGET`], urgent-first, calling
    /// `handler` for each. Any events `handler` enqueues are appended to
    /// the live queues and may be drained by a *subsequent* call, never by
    /// this one re-entering `handler` synchronously.
    pub fn drain(&mut self, mut handler: impl FnMut(Event)) {
        self.drain_with_clock(Instant::now, DRAIN_BUDGET, &mut handler);
    }

    /// Test seam: drive the drain loop with an explicit clock/budget so
    /// deterministic unit tests don't depend on wall-clock timing.
    fn drain_with_clock(
        &mut self,
        now: impl Fn() -> Instant,
        budget: Duration,
        handler: &mut impl FnMut(Event),
    ) {
        let start = now();
        loop {
            while let Some(ev) = self.urgent.pop_front() {
                handler(ev);
                if now().duration_since(start) >= budget {
                    return;
                }
            }
            match self.non_urgent.pop_front() {
                Some(ev) => handler(ev),
                None => return,
            }
            if now().duration_since(start) >= budget {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(numeric: i64) -> Event {
        Event {
            prefix: ResourcePrefix::Sensor,
            suffix: Atom::INVALID,
            numeric,
            payload: Vec::new(),
            device_key: None,
        }
    }

    #[test]
    fn non_urgent_events_dispatch_in_enqueue_order() {
        let mut bus = EventBus::new();
        bus.enqueue(ev(1), Lane::NonUrgent);
        bus.enqueue(ev(2), Lane::NonUrgent);

        let mut seen = Vec::new();
        bus.drain(|e| seen.push(e.numeric));
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn duplicate_non_urgent_event_delivered_once() {
        let mut bus = EventBus::new();
        bus.enqueue(ev(1), Lane::NonUrgent);
        bus.enqueue(ev(1), Lane::NonUrgent);
        assert_eq!(bus.non_urgent_len(), 1);

        let mut count = 0;
        bus.drain(|_| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn urgent_lane_fully_drained_before_non_urgent() {
        let mut bus = EventBus::new();
        bus.enqueue(ev(100), Lane::NonUrgent);
        bus.enqueue(ev(1), Lane::Urgent);
        bus.enqueue(ev(2), Lane::Urgent);

        let mut seen = Vec::new();
        bus.drain(|e| seen.push(e.numeric));
        assert_eq!(seen, vec![1, 2, 100]);
    }

    #[test]
    fn soft_cap_rejects_new_duplicates_without_evicting_old() {
        let mut bus = EventBus::new();
        for i in 0..NON_URGENT_SOFT_CAP {
            bus.enqueue(ev(i as i64), Lane::NonUrgent);
        }
        assert_eq!(bus.non_urgent_len(), NON_URGENT_SOFT_CAP);
        bus.enqueue(ev(NON_URGENT_SOFT_CAP as i64), Lane::NonUrgent);
        assert_eq!(bus.non_urgent_len(), NON_URGENT_SOFT_CAP);
    }
}
