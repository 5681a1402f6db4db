// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cooperative scheduler and timer queue (`spec.md` §4.13, §5).
//!
//! A single tick dispatcher drives the whole core: a 1-second "slow"
//! tick advances timers and the device lifecycle/coordinator machinery,
//! a 50 ms "fast" tick only drains the event bus. Both ticks are driven
//! by the embedder calling [`Scheduler::fast_tick`]/[`Scheduler::slow_tick`]
//! on its own wall-clock timer; the scheduler itself never sleeps or
//! spawns a thread, matching the single-threaded cooperative model of
//! `spec.md` §5.
//!
//! Timers are one-shot, identified by a generation-tagged [`TimerHandle`]
//! so that `cancel` on an already-fired or already-cancelled handle is a
//! harmless no-op rather than an error (`spec.md` §4.13 "Cancellation").
//! Within one slow tick, every due timer callback fires before the event
//! bus is drained (`spec.md` §4.13 "Ordering").

use std::collections::BinaryHeap;
use std::cmp::Ordering as CmpOrdering;

/// Opaque, idempotent-to-cancel handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    slot: u32,
    generation: u32,
}

struct Entry {
    deadline_tick: u64,
    slot: u32,
    generation: u32,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_tick == other.deadline_tick
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; we want the earliest deadline first.
        other.deadline_tick.cmp(&self.deadline_tick)
    }
}

/// A monotonic-deadline timer queue. Deadlines are expressed in absolute
/// tick numbers, never as a countdown, so a timer's remaining time is
/// always `deadline - now` and never drifts from repeated decrements
/// (Design Notes §9).
#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Entry>,
    generations: Vec<u32>,
    cancelled: Vec<bool>,
    now_tick: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_tick(&self) -> u64 {
        self.now_tick
    }

    /// Schedule a one-shot timer to fire at `now_tick + delay_ticks`.
    pub fn schedule(&mut self, delay_ticks: u64) -> TimerHandle {
        let deadline = self.now_tick + delay_ticks;
        let slot = self.generations.len() as u32;
        self.generations.push(0);
        self.cancelled.push(false);
        self.heap.push(Entry { deadline_tick: deadline, slot, generation: 0 });
        TimerHandle { slot, generation: 0 }
    }

    /// Cancel a timer. Cancelling a handle that already fired or was
    /// already cancelled is a no-op, not an error.
    pub fn cancel(&mut self, handle: TimerHandle) {
        if let Some(slot) = self.cancelled.get_mut(handle.slot as usize) {
            if self.generations[handle.slot as usize] == handle.generation {
                *slot = true;
            }
        }
    }

    /// Advance to `now_tick` and drain every timer whose deadline has
    /// passed, in deadline order. Cancelled timers are dropped silently.
    pub fn drain_due(&mut self, now_tick: u64) -> Vec<TimerHandle> {
        self.now_tick = now_tick;
        let mut fired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline_tick > now_tick {
                break;
            }
            let entry = self.heap.pop().unwrap();
            let slot = entry.slot as usize;
            if !self.cancelled[slot] && self.generations[slot] == entry.generation {
                self.generations[slot] = self.generations[slot].wrapping_add(1);
                fired.push(TimerHandle { slot: entry.slot, generation: entry.generation });
            }
        }
        fired
    }
}

/// Drives the whole core from two tick sources. Owns the [`TimerQueue`]
/// and the [`crate::event_bus::EventBus`] and enforces their firing
/// order within one slow tick.
pub struct Scheduler {
    pub timers: TimerQueue,
    pub bus: crate::event_bus::EventBus,
    fast_tick_ms: u64,
    slow_tick_accum_ms: u64,
}

/// Slow tick period (`spec.md` §4.13).
pub const SLOW_TICK_MS: u64 = 1000;
/// Fast tick period, used only to drain the event bus.
pub const FAST_TICK_MS: u64 = 50;

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            timers: TimerQueue::new(),
            bus: crate::event_bus::EventBus::new(),
            fast_tick_ms: 0,
            slow_tick_accum_ms: 0,
        }
    }

    /// Drain the event bus only, calling `handler` for each event in
    /// order. Called every [`FAST_TICK_MS`].
    pub fn fast_tick(&mut self, handler: impl FnMut(crate::event_bus::Event)) {
        self.fast_tick_ms += FAST_TICK_MS;
        self.bus.drain(handler);
    }

    /// Advance timers to `now_tick` (one logical second per call) and
    /// return the handles of every timer that fired, in deadline order.
    /// Callers must act on the returned timers before touching whatever
    /// the subsequent `fast_tick` drains, to preserve the "timers before
    /// event-bus drain" ordering within the same wall-clock second.
    pub fn slow_tick(&mut self, now_tick: u64) -> Vec<TimerHandle> {
        self.slow_tick_accum_ms += SLOW_TICK_MS;
        self.timers.drain_due(now_tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut q = TimerQueue::new();
        let far = q.schedule(10);
        let near = q.schedule(2);
        let fired = q.drain_due(2);
        assert_eq!(fired, vec![near]);
        let fired = q.drain_due(10);
        assert_eq!(fired, vec![far]);
    }

    #[test]
    fn cancel_is_idempotent_and_silent_on_stale_handle() {
        let mut q = TimerQueue::new();
        let handle = q.schedule(5);
        q.cancel(handle);
        q.cancel(handle); // second cancel: no panic, no effect
        assert!(q.drain_due(5).is_empty());
    }

    #[test]
    fn cancel_after_fire_does_not_affect_a_reused_slot() {
        let mut q = TimerQueue::new();
        let first = q.schedule(1);
        assert_eq!(q.drain_due(1), vec![first]);
        let second = q.schedule(1); // distinct slot; same deadline as `first`
        q.cancel(first); // stale handle: must not cancel `second`
        assert_eq!(q.drain_due(2), vec![second]);
    }

    #[test]
    fn deadline_is_absolute_not_a_countdown() {
        let mut q = TimerQueue::new();
        let h = q.schedule(3);
        assert!(q.drain_due(1).is_empty());
        assert!(q.drain_due(2).is_empty());
        assert_eq!(q.drain_due(3), vec![h]);
    }

    #[test]
    fn scheduler_exposes_both_tick_periods() {
        let mut sched = Scheduler::new();
        let mut drained = 0;
        sched.fast_tick(|_| drained += 1);
        assert_eq!(drained, 0);
        assert!(sched.slow_tick(1).is_empty());
        assert_eq!(FAST_TICK_MS, 50);
        assert_eq!(SLOW_TICK_MS, 1000);
    }
}
