// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Binding/Reporting Coordinator (`spec.md` §4.7).

use super::task::{Action, Task, TaskKey};
use crate::ddf::model::ReportConfig;
use std::collections::{HashSet, VecDeque};

/// At most this many binding tasks may be `InProgress`/waiting at once.
pub const MAX_ACTIVE_BINDING_TASKS: usize = 3;

/// The six-tuple the coordinator deduplicates a device's binding table
/// entries by (`spec.md` §4.7 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingEntryKey {
    pub src_ext_address: u64,
    pub src_endpoint: u8,
    pub cluster_id: u16,
    pub dst_mode: DstMode,
    pub dst_addr: u64,
    pub dst_endpoint: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DstMode {
    Group,
    Unicast,
}

/// Per-device binding-table-read progress, one reader per device address
/// queried via a paginated ZDP "mgmt bind" request.
#[derive(Debug, Clone)]
pub struct BindingTableReader {
    pub device_ext_address: u64,
    pub next_start_index: u16,
    pub entries: HashSet<BindingEntryKey>,
    pub done: bool,
}

impl BindingTableReader {
    pub fn new(device_ext_address: u64) -> Self {
        Self {
            device_ext_address,
            next_start_index: 0,
            entries: HashSet::new(),
            done: false,
        }
    }

    /// Merge one ZDP response page. `total_entries` advances
    /// `next_start_index`; the reader is `done` once every entry has been
    /// retrieved.
    pub fn ingest_page(&mut self, page: &[BindingEntryKey], total_entries: u16) {
        for e in page {
            self.entries.insert(*e);
        }
        self.next_start_index += page.len() as u16;
        self.done = self.next_start_index >= total_entries;
    }
}

/// Raw Configure Reporting response payload: either one status applying
/// to every attribute in the request, or a status per attribute
/// (`spec.md` §4.7: "Responses may be a single status ... or per-attribute
/// status; both forms must be parsed").
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigureReportingResponse {
    SingleStatus(u8),
    PerAttribute(Vec<(u16, u8)>),
}

/// `true` if every attribute in `report` was accepted (ZCL status 0x00).
pub fn configure_reporting_succeeded(report: &[ReportConfig], response: &ConfigureReportingResponse) -> bool {
    match response {
        ConfigureReportingResponse::SingleStatus(status) => *status == 0,
        ConfigureReportingResponse::PerAttribute(statuses) => report.iter().all(|r| {
            statuses
                .iter()
                .find(|(attr, _)| *attr == r.attribute_id)
                .map(|(_, status)| *status == 0)
                .unwrap_or(false)
        }),
    }
}

/// A required binding not yet settled, queued for a `Bind`/`Unbind`/
/// `ConfigureReporting` task.
#[derive(Debug, Clone)]
pub struct BindingTask {
    pub task: Task,
    pub report: Vec<ReportConfig>,
}

/// Holds the reader and task queues and applies fair scheduling
/// (`spec.md` §4.7: "the coordinator picks the oldest idle task whose
/// device is currently reachable").
#[derive(Debug, Default)]
pub struct Coordinator {
    readers: Vec<BindingTableReader>,
    queue: VecDeque<BindingTask>,
    /// Set when an image block transfer happened within the last 60
    /// seconds (`spec.md` §4.7 "Back-pressure"); OTA bookkeeping updates
    /// this directly rather than the coordinator polling it.
    ota_busy: bool,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reader_for(&mut self, device_ext_address: u64) -> &mut BindingTableReader {
        if let Some(pos) = self.readers.iter().position(|r| r.device_ext_address == device_ext_address) {
            return &mut self.readers[pos];
        }
        self.readers.push(BindingTableReader::new(device_ext_address));
        self.readers.last_mut().unwrap()
    }

    /// Enqueue a binding task, rejecting duplicates by `TaskKey`
    /// (`spec.md` §3 Task invariant).
    pub fn enqueue(&mut self, key: TaskKey, is_end_device: bool, report: Vec<ReportConfig>, now_tick: u64) -> bool {
        if self.queue.iter().any(|t| t.task.key == key) {
            return false;
        }
        self.queue.push_back(BindingTask { task: Task::new(key, is_end_device, now_tick), report });
        true
    }

    pub fn set_ota_busy(&mut self, busy: bool) {
        self.ota_busy = busy;
    }

    /// Returns up to [`MAX_ACTIVE_BINDING_TASKS`] minus however many are
    /// already active, picking the oldest idle task whose device is
    /// reachable. `reachable` is supplied by the caller (it knows the
    /// registry's per-device last-seen bookkeeping). High-priority actions
    /// (`Unbind`) still flow during OTA back-pressure; only new `Bind`/
    /// `ConfigureReporting` traffic pauses.
    pub fn pick_next_tasks(&mut self, reachable: impl Fn(u64) -> bool) -> Vec<&mut BindingTask> {
        use super::task::TaskState;

        let active = self
            .queue
            .iter()
            .filter(|t| !matches!(t.task.state, TaskState::Idle | TaskState::Finished))
            .count();
        let slots = MAX_ACTIVE_BINDING_TASKS.saturating_sub(active);
        if slots == 0 {
            return Vec::new();
        }

        let mut candidate_indices: Vec<usize> = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, t)| t.task.state == TaskState::Idle)
            .filter(|(_, t)| reachable(t.task.key.src_ext_address))
            .filter(|(_, t)| !(self.ota_busy && t.task.key.action != Action::Unbind))
            .map(|(i, _)| i)
            .collect();
        candidate_indices.sort_by_key(|&i| self.queue[i].task.created_tick);
        candidate_indices.truncate(slots);

        let mut picked = Vec::with_capacity(candidate_indices.len());
        for (pos, task) in self.queue.iter_mut().enumerate() {
            if candidate_indices.contains(&pos) {
                picked.push(task);
            }
        }
        picked
    }

    /// Drop finished tasks from the queue, returning how many were
    /// cleared.
    pub fn sweep_finished(&mut self) -> usize {
        use super::task::TaskState;
        let before = self.queue.len();
        self.queue.retain(|t| t.task.state != TaskState::Finished);
        before - self.queue.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Look up a queued task by key, for timeout handling and confirm/
    /// response correlation outside of `pick_next_tasks`' fairness pass.
    pub fn task_mut(&mut self, key: TaskKey) -> Option<&mut Task> {
        self.queue.iter_mut().find(|t| t.task.key == key).map(|t| &mut t.task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(addr: u64, action: Action) -> TaskKey {
        TaskKey { src_ext_address: addr, cluster_id: 6, action, direction_in: false }
    }

    #[test]
    fn rejects_duplicate_task_key() {
        let mut c = Coordinator::new();
        assert!(c.enqueue(key(1, Action::Bind), false, vec![], 0));
        assert!(!c.enqueue(key(1, Action::Bind), false, vec![], 1));
        assert_eq!(c.queue_len(), 1);
    }

    #[test]
    fn caps_active_tasks_at_three() {
        let mut c = Coordinator::new();
        for i in 0..5u64 {
            c.enqueue(key(i, Action::Bind), false, vec![], i);
        }
        let picked = c.pick_next_tasks(|_| true);
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn unreachable_end_device_is_skipped() {
        let mut c = Coordinator::new();
        c.enqueue(key(1, Action::Bind), true, vec![], 0);
        c.enqueue(key(2, Action::Bind), false, vec![], 1);
        let picked = c.pick_next_tasks(|addr| addr != 1);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].task.key.src_ext_address, 2);
    }

    #[test]
    fn ota_busy_pauses_bind_but_not_unbind() {
        let mut c = Coordinator::new();
        c.set_ota_busy(true);
        c.enqueue(key(1, Action::Bind), false, vec![], 0);
        c.enqueue(key(2, Action::Unbind), false, vec![], 1);
        let picked = c.pick_next_tasks(|_| true);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].task.key.action, Action::Unbind);
    }

    #[test]
    fn single_status_reporting_response() {
        let report = vec![ReportConfig {
            attribute_id: 0x0000,
            datatype: 0x21,
            min_interval: 1,
            max_interval: 300,
            reportable_change: 1,
            manufacturer_code: None,
        }];
        assert!(configure_reporting_succeeded(&report, &ConfigureReportingResponse::SingleStatus(0)));
        assert!(!configure_reporting_succeeded(&report, &ConfigureReportingResponse::SingleStatus(1)));
    }

    #[test]
    fn per_attribute_reporting_response_requires_all_ok() {
        let report = vec![
            ReportConfig { attribute_id: 1, datatype: 0x21, min_interval: 1, max_interval: 2, reportable_change: 1, manufacturer_code: None },
            ReportConfig { attribute_id: 2, datatype: 0x21, min_interval: 1, max_interval: 2, reportable_change: 1, manufacturer_code: None },
        ];
        let ok = ConfigureReportingResponse::PerAttribute(vec![(1, 0), (2, 0)]);
        let partial = ConfigureReportingResponse::PerAttribute(vec![(1, 0), (2, 1)]);
        assert!(configure_reporting_succeeded(&report, &ok));
        assert!(!configure_reporting_succeeded(&report, &partial));
    }
}
