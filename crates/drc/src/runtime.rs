// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The top-level orchestrator wiring every subsystem together
//! (`spec.md` §2 "Architecture").
//!
//! [`DeviceRuntime`] owns the registry, the DDF loader, the cluster
//! protocol engine, the binding/reporting coordinator, per-device OTA
//! and poll-control state, the action map, and the scheduler. It is
//! driven entirely by the embedder: there is no background thread or
//! async task anywhere in this crate. A REST handler, a serial port
//! read loop, or a test harness all look the same from here: construct
//! once, then repeatedly call [`DeviceRuntime::on_indication`],
//! [`DeviceRuntime::drive_coordinator`], and [`DeviceRuntime::tick`].
//!
//! `on_indication` is the one inbound door every device passes through.
//! It discovers the device, learns its Basic-cluster identity, matches
//! a DDF and instantiates sub-devices and bindings the first time both
//! are known, annotates the indication through the action map, and
//! finally routes it to the Tuya/Poll Control/Time cluster handler.
//! `drive_coordinator` and `tick`'s state-change driving are the
//! corresponding outbound doors: the former turns queued binding tasks
//! into real Bind/Unbind/Configure Reporting requests, the latter turns
//! a sub-device's stale attribute into a Write Attributes request.

use crate::atom::Atom;
use crate::config::RuntimeConfig;
use crate::coordinator::{Action, Coordinator, TaskKey};
use crate::ddf::compat::{self, LegacyUniqueIdLookup};
use crate::ddf::model::ReportConfig;
use crate::ddf::{DdfLoader, DdfPolicy, ItemHandle};
use crate::error::Result;
use crate::event_bus::{Event, Lane};
use crate::iface::{ApsDestination, ApsIndication, ApsRequest, PersistenceAdapter, RadioDriver};
use crate::ota::OtaState;
use crate::poll_control::{CheckIn, PendingConfig, PollControlAction, PollControlState};
use crate::protocol::attribute::decode_report_attributes;
use crate::protocol::{
    self, encode_attribute, ActionMap, AttributeValue, ClusterProtocolEngine, DataType,
    FrameControl, Indication, ZclFrame, ZclHeader,
};
use crate::registry::state_change::PendingWrite;
use crate::registry::{state_machine, DeviceState, Lifecycle, Registry, Transition};
use crate::resource::item::{Access, TypeTag, Value, ValueSource};
use crate::resource::{DeviceBody, Resource, ResourceBody, ResourceHandle, ResourceHeader, ResourcePrefix};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::tuya;
use std::collections::HashMap;

/// Tuya's manufacturer-tunnel cluster id, dispatched separately from the
/// generic attribute-reporting path (`spec.md` §4.9).
const TUYA_CLUSTER_ID: u16 = tuya::CLUSTER_ID;
/// Poll Control cluster id (ZCL).
const POLL_CONTROL_CLUSTER_ID: u16 = 0x0020;
/// Basic cluster id, whose manufacturer name / model id attributes feed
/// DDF selection (`spec.md` §4.4 step 1 analog: `ApsIndication` carries
/// no node descriptor, so identity is learned from Basic reports).
const BASIC_CLUSTER_ID: u16 = 0x0000;
const ATTR_MANUFACTURER_NAME: u16 = 0x0004;
const ATTR_MODEL_ID: u16 = 0x0005;
/// Time cluster id, answered directly by [`DeviceRuntime::handle_time_cluster`]
/// rather than through a DDF hook (`SPEC_FULL.md` §2).
const TIME_CLUSTER_ID: u16 = 0x000A;

const HA_PROFILE_ID: u16 = 0x0104;
const ZDP_PROFILE_ID: u16 = 0x0000;
const ZDP_BIND_REQ_CLUSTER: u16 = 0x0021;
const ZDP_UNBIND_REQ_CLUSTER: u16 = 0x0022;

const WRITE_ATTRIBUTES_COMMAND: u8 = 0x02;
const CONFIGURE_REPORTING_COMMAND: u8 = 0x06;

/// No legacy storage to consult: this runtime has no persistence-backed
/// lookup of prior uniqueids, so [`compat::resolve_legacy_uniqueid`]
/// always falls through to the freshly computed candidate.
struct NoLegacyLookup;

impl LegacyUniqueIdLookup for NoLegacyLookup {
    fn legacy_uniqueids(&self, _device_uniqueid: &str, _sub_device_type: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Everything the core needs to run, minus the external collaborators
/// (radio, persistence) which are passed in per call rather than stored,
/// so the embedder controls their lifetime.
pub struct DeviceRuntime {
    pub config: RuntimeConfig,
    pub registry: Registry,
    pub ddf_loader: DdfLoader,
    pub protocol: ClusterProtocolEngine,
    pub coordinator: Coordinator,
    pub scheduler: Scheduler,
    ota: HashMap<u64, OtaState>,
    poll_control: HashMap<u64, PollControlState>,
    action_map: ActionMap,
    /// Correlates a fired binding-task timeout timer back to the task it
    /// was scheduled for (`spec.md` §4.7).
    pending_timers: HashMap<TimerHandle, TaskKey>,
}

impl DeviceRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            ddf_loader: DdfLoader::new(),
            protocol: ClusterProtocolEngine::new(),
            coordinator: Coordinator::new(),
            scheduler: Scheduler::new(),
            ota: HashMap::new(),
            poll_control: HashMap::new(),
            action_map: ActionMap::new(),
            pending_timers: HashMap::new(),
        }
    }

    /// Looks up (creating on first sight) the OTA bookkeeping state for a
    /// device, keyed by extended address.
    pub fn ota_state(&mut self, ext_address: u64) -> &mut OtaState {
        self.ota.entry(ext_address).or_insert_with(|| OtaState::new(true))
    }

    pub fn poll_control_state(&mut self, ext_address: u64) -> &mut PollControlState {
        self.poll_control.entry(ext_address).or_insert_with(PollControlState::new)
    }

    /// Route one inbound indication through the full discovery/matching
    /// pipeline, then to its cluster handler (`spec.md` §2 "Primary data
    /// flow"). Decode failures are logged and dropped (`spec.md` §7):
    /// this method never returns an error for a malformed *frame*, only
    /// for a radio-submission failure downstream of a handler that
    /// answers the indication.
    pub fn on_indication(
        &mut self,
        ind: &ApsIndication,
        now_tick: u64,
        radio: &mut dyn RadioDriver,
    ) -> Result<()> {
        let indication = match self.protocol.dispatch(
            ind.cluster_id,
            ind.profile_id,
            ind.src_short_address,
            ind.src_ext_address,
            ind.src_endpoint,
            &ind.payload,
        ) {
            Ok(indication) => indication,
            Err(err) => {
                tracing::debug!(cluster_id = ind.cluster_id, error = %err, "dropping undecodable indication");
                return Ok(());
            }
        };

        let Some(ext_address) = indication.src_ext_address else {
            return self.dispatch_cluster(&indication, radio, now_tick);
        };

        self.ensure_device(ext_address, indication.src_short_address, indication.src_endpoint, indication.cluster_id, now_tick);

        if indication.cluster_id == BASIC_CLUSTER_ID {
            self.learn_basic_cluster_identity(ext_address, &indication.payload);
        }
        self.try_match_ddf_and_init_sub_devices(ext_address, now_tick);

        if let Some(action) = self.action_map.lookup(
            indication.cluster_id,
            indication.header.command_id,
            indication.payload.first().copied(),
        ) {
            self.scheduler.bus.enqueue(
                Event {
                    prefix: ResourcePrefix::Device,
                    suffix: action,
                    numeric: 0,
                    payload: Vec::new(),
                    device_key: Some(ext_address),
                },
                Lane::NonUrgent,
            );
        }

        self.dispatch_cluster(&indication, radio, now_tick)
    }

    /// Register a device on its first-ever indication, then refresh its
    /// "seen" bookkeeping on every subsequent one (`spec.md` §3 "Device").
    fn ensure_device(&mut self, ext_address: u64, short_address: u16, endpoint: u8, cluster_id: u16, now_tick: u64) {
        if self.registry.device(ext_address).is_none() {
            let uniqueid = format!("{ext_address:016x}");
            let resource = Resource::new(
                ResourceHeader {
                    handle: ResourceHandle { index: 0, generation: 0 },
                    prefix: ResourcePrefix::Device,
                    uniqueid,
                    parent: None,
                },
                ResourceBody::Device(DeviceBody { ext_address, short_address, sub_devices: Vec::new() }),
            );
            self.registry.discover_device(ext_address, short_address, false, resource);
        }

        let should_advance = {
            let device = match self.registry.device_mut(ext_address) {
                Some(device) => device,
                None => return,
            };
            let advance = matches!(device.lifecycle, Lifecycle::Active(DeviceState::New));
            device.last_seen_tick = now_tick;
            device.short_address = short_address;
            let clusters = device.endpoints.entry(endpoint).or_default();
            if !clusters.contains(&cluster_id) {
                clusters.push(cluster_id);
            }
            advance
        };

        if should_advance {
            self.advance_lifecycle(ext_address, Transition::FirstIndication);
        }
    }

    /// Apply one lifecycle transition, a no-op if the device is in
    /// backoff or the transition doesn't apply to its current state
    /// (`spec.md` §4.6).
    fn advance_lifecycle(&mut self, ext_address: u64, transition: Transition) {
        if let Some(device) = self.registry.device_mut(ext_address) {
            if let Lifecycle::Active(state) = device.lifecycle {
                if let Some(next) = state_machine::apply(state, transition) {
                    device.lifecycle = Lifecycle::Active(next);
                }
            }
        }
    }

    /// Learn a device's manufacturer name / model id from a Basic cluster
    /// attribute report, since `ApsIndication` carries no node/simple
    /// descriptor to read them from directly.
    fn learn_basic_cluster_identity(&mut self, ext_address: u64, payload: &[u8]) {
        for (attribute_id, value) in decode_report_attributes(payload) {
            let AttributeValue::Str(s) = value else { continue };
            let Some(atom) = self.ddf_loader.atoms.intern(&s) else { continue };
            if let Some(device) = self.registry.device_mut(ext_address) {
                match attribute_id {
                    ATTR_MANUFACTURER_NAME => device.manufacturer = Some(atom),
                    ATTR_MODEL_ID => device.model = Some(atom),
                    _ => {}
                }
            }
        }
    }

    /// Once both manufacturer and model are known and no DDF is matched
    /// yet, select one and instantiate its sub-devices, items, and
    /// desired bindings (`spec.md` §4.4, §4.7). `NodeDescriptorAnswered`/
    /// `EndpointsEnumerated` are applied back-to-back here rather than
    /// waiting on a real ZDP round-trip: `ApsIndication` carries no
    /// node/simple descriptor fields for this runtime to wait on.
    fn try_match_ddf_and_init_sub_devices(&mut self, ext_address: u64, now_tick: u64) {
        let (manufacturer, model, device_resource) = {
            let Some(device) = self.registry.device(ext_address) else { return };
            if device.ddf.is_some() {
                return;
            }
            let (Some(manufacturer), Some(model)) = (device.manufacturer, device.model) else { return };
            (manufacturer, model, device.resource)
        };

        let device_uniqueid = self
            .registry
            .resource(device_resource)
            .map(|r| r.header.uniqueid.clone())
            .unwrap_or_default();

        let Some(ddf_ref) = self.ddf_loader.select_ddf(manufacturer, model, DdfPolicy::default(), None, |_| true) else {
            return;
        };
        let Some(ddf) = self.ddf_loader.ddf(ddf_ref.index as usize).cloned() else { return };

        self.advance_lifecycle(ext_address, Transition::NodeDescriptorAnswered);
        self.advance_lifecycle(ext_address, Transition::EndpointsEnumerated);

        let is_end_device = ddf.sleeper;
        let lookup = NoLegacyLookup;
        let mut sub_device_handles = Vec::with_capacity(ddf.sub_devices.len());

        for (subdevice_index, sub) in ddf.sub_devices.iter().enumerate() {
            let candidate_uniqueid = format!("{device_uniqueid}-{:02x}", sub.endpoint);
            let uniqueid = compat::resolve_legacy_uniqueid(&lookup, &ddf, sub, &device_uniqueid, &candidate_uniqueid);

            let (mut resource, manufacturer_override, model_override) = compat::init_resource_from_description(
                &ddf,
                sub,
                &self.ddf_loader.atoms,
                ResourceHandle { index: 0, generation: 0 },
                device_resource,
                uniqueid,
            );

            for (item_index, ddf_item) in sub.items.iter().enumerate() {
                let type_tag = infer_type_tag(&ddf_item.default);
                let access = if ddf_item.hooks.write_expr.is_some() { Access::ReadWrite } else { Access::ReadOnly };
                let descriptor = compat::dynamic_descriptor(ddf_item.suffix, type_tag, access);
                let mut item = compat::new_dynamic_item(descriptor, ddf_item.is_public);
                item.handle = Some(ItemHandle::pack(ddf_ref.load_counter, ddf_ref.index, subdevice_index as u32, item_index as u32));
                if let Some(value) = json_default_to_value(ddf_item.default.as_ref(), type_tag, &mut self.ddf_loader.atoms) {
                    item.set_value(value, ValueSource::Internal, now_tick);
                }
                resource.add_item(item);
            }

            let handle = self.registry.register_resource(resource);
            sub_device_handles.push(handle);

            if let Some(manufacturer_override) = manufacturer_override {
                self.set_static_string_item(handle, "attr/manufacturername", &manufacturer_override, now_tick);
            }
            if let Some(model_override) = model_override {
                self.set_static_string_item(handle, "attr/modelid", &model_override, now_tick);
            }

            for binding in &ddf.bindings {
                if binding.src_endpoint != sub.endpoint {
                    continue;
                }
                let bind_key = TaskKey {
                    src_ext_address: ext_address,
                    cluster_id: binding.cluster_id,
                    action: Action::Bind,
                    direction_in: false,
                };
                self.coordinator.enqueue(bind_key, is_end_device, Vec::new(), now_tick);
                if !binding.reports.is_empty() {
                    let report_key = TaskKey {
                        src_ext_address: ext_address,
                        cluster_id: binding.cluster_id,
                        action: Action::ConfigureReporting,
                        direction_in: false,
                    };
                    self.coordinator.enqueue(report_key, is_end_device, binding.reports.clone(), now_tick);
                }
            }
        }

        if let Some(device) = self.registry.device_mut(ext_address) {
            device.ddf = Some(ddf_ref);
            device.is_end_device = is_end_device;
            device.sub_devices = sub_device_handles.clone();
        }
        if let Some(resource) = self.registry.resource_mut(device_resource) {
            if let ResourceBody::Device(body) = &mut resource.body {
                body.sub_devices = sub_device_handles;
            }
        }

        self.advance_lifecycle(ext_address, Transition::SubDevicesInitialized);
    }

    /// Set a static manufacturer/model override item, creating the
    /// dynamic descriptor the first time it's needed
    /// (`ddf::compat::init_resource_from_description`'s static-string
    /// overrides).
    fn set_static_string_item(&mut self, handle: ResourceHandle, suffix_name: &str, value: &str, now_tick: u64) {
        let Some(suffix) = self.ddf_loader.atoms.intern(suffix_name) else { return };
        let Some(value_atom) = self.ddf_loader.atoms.intern(value) else { return };
        if let Some(resource) = self.registry.resource_mut(handle) {
            if resource.item(suffix).is_none() {
                let descriptor = compat::dynamic_descriptor(suffix, TypeTag::String, Access::ReadOnly);
                resource.add_item(compat::new_dynamic_item(descriptor, true));
            }
            if let Some(item) = resource.item_mut(suffix) {
                item.set_value(Value::Str(value_atom), ValueSource::Internal, now_tick);
            }
        }
    }

    /// Set a resource item's value by suffix name, allocating a dynamic
    /// descriptor if none exists yet, then replay the change into group
    /// membership bookkeeping and any pending [`crate::registry::StateChange`]
    /// on the owning device.
    pub fn set_item_value(&mut self, handle: ResourceHandle, suffix_name: &str, value: Value, source: ValueSource, now_tick: u64) {
        let Some(suffix) = self.ddf_loader.atoms.intern(suffix_name) else { return };
        self.apply_item_value(handle, suffix, value, source, now_tick);
    }

    fn apply_item_value(&mut self, handle: ResourceHandle, suffix: Atom, value: Value, source: ValueSource, now_tick: u64) {
        let group_suffix = self.ddf_loader.atoms.find("config/group");

        if let Some(resource) = self.registry.resource_mut(handle) {
            if resource.item(suffix).is_none() {
                let type_tag = infer_type_tag_for_value(&value);
                let descriptor = compat::dynamic_descriptor(suffix, type_tag, Access::ReadWrite);
                resource.add_item(compat::new_dynamic_item(descriptor, true));
            }
            if let Some(item) = resource.item_mut(suffix) {
                item.set_value(value.clone(), source, now_tick);
            }
        }

        if Some(suffix) == group_suffix {
            if let Some(group_id) = value.to_number() {
                self.registry.set_group_membership(handle, group_id as u16);
            }
        }

        if let Some(ext_address) = self.owning_device_ext_address(handle) {
            if let Some(device) = self.registry.device_mut(ext_address) {
                for change in &mut device.state_changes {
                    change.observe(suffix, &value);
                }
            }
        }
    }

    /// Resolve the extended address of the device owning a resource
    /// (a device resource owns itself; a sub-device's owner is its
    /// `header.parent`).
    fn owning_device_ext_address(&self, handle: ResourceHandle) -> Option<u64> {
        let resource = self.registry.resource(handle)?;
        let device_handle = resource.header.parent.unwrap_or(handle);
        let device_resource = self.registry.resource(device_handle)?;
        match &device_resource.body {
            ResourceBody::Device(body) => Some(body.ext_address),
            _ => None,
        }
    }

    /// Stamp `state/last_checkin` on every sub-device of a device that
    /// just checked in (`spec.md` §4.11 S5).
    fn update_last_checkin_on_sub_devices(&mut self, ext_address: u64, now_tick: u64) {
        let Some(suffix) = self.ddf_loader.atoms.intern("state/last_checkin") else { return };
        let sub_devices = match self.registry.device(ext_address) {
            Some(device) => device.sub_devices.clone(),
            None => return,
        };
        for handle in sub_devices {
            if let Some(resource) = self.registry.resource_mut(handle) {
                if resource.item(suffix).is_none() {
                    let descriptor = compat::dynamic_descriptor(suffix, TypeTag::TimePoint, Access::ReadOnly);
                    resource.add_item(compat::new_dynamic_item(descriptor, true));
                }
                if let Some(item) = resource.item_mut(suffix) {
                    item.set_value(Value::TimePoint(now_tick as i64), ValueSource::Device, now_tick);
                }
            }
        }
    }

    fn handle_tuya(&mut self, indication: &Indication) {
        let Some(ext_address) = indication.src_ext_address else { return };
        match tuya::decode_frame(&indication.payload) {
            Ok(frame) => tracing::trace!(ext_address, datapoints = frame.datapoints.len(), "tuya frame decoded"),
            Err(err) => tracing::debug!(ext_address, error = %err, "tuya decode error"),
        }
    }

    /// Answer a Poll Control check-in and opportunistically apply any
    /// pending configuration in the same pass, then record the sub-devices'
    /// last check-in time (`spec.md` §4.11).
    fn handle_poll_control(&mut self, indication: &Indication, radio: &mut dyn RadioDriver, now_tick: u64) -> Result<()> {
        let Some(ext_address) = indication.src_ext_address else { return Ok(()) };
        let actions = self.poll_control_state(ext_address).on_checkin(CheckIn { fast_poll_timeout: 0 });

        for action in &actions {
            let (command_id, payload, cluster_specific) = match action {
                PollControlAction::CheckInResponse { .. } => (0x00u8, Vec::new(), true),
                PollControlAction::WritePollCheckinInterval(interval) => {
                    let mut payload = Vec::new();
                    payload.extend_from_slice(&0x0000u16.to_le_bytes()); // Checkin Interval attribute
                    payload.push(0x23); // Uint32
                    payload.extend_from_slice(&interval.to_le_bytes());
                    (WRITE_ATTRIBUTES_COMMAND, payload, false)
                }
                PollControlAction::SetLongPollInterval(interval) => (0x03u8, interval.to_le_bytes().to_vec(), true),
            };

            let sequence = self.protocol.sequences.next();
            let frame = ZclFrame {
                header: ZclHeader {
                    frame_control: if cluster_specific { FrameControl::CLUSTER_SPECIFIC } else { FrameControl::empty() },
                    manufacturer_code: None,
                    sequence_number: sequence,
                    command_id,
                },
                payload,
            };
            let req = ApsRequest {
                destination: ApsDestination::Unicast {
                    short_address: indication.src_short_address,
                    ext_address: Some(ext_address),
                    endpoint: indication.src_endpoint,
                },
                profile_id: HA_PROFILE_ID,
                cluster_id: POLL_CONTROL_CLUSTER_ID,
                src_endpoint: self.config.gateway_endpoint,
                payload: protocol::encode_frame(&frame),
            };
            radio.submit_aps_request(req)?;
        }

        for action in actions {
            match action {
                PollControlAction::WritePollCheckinInterval(_) => {
                    self.poll_control_state(ext_address).mark_applied(PendingConfig::WRITE_POLL_CHECKIN_INTERVAL)
                }
                PollControlAction::SetLongPollInterval(_) => {
                    self.poll_control_state(ext_address).mark_applied(PendingConfig::SET_LONG_POLL_INTERVAL)
                }
                PollControlAction::CheckInResponse { .. } => {}
            }
        }

        self.update_last_checkin_on_sub_devices(ext_address, now_tick);
        Ok(())
    }

    /// Answer a Time cluster attribute read with the gateway's own wall
    /// clock (`SPEC_FULL.md` §2).
    fn handle_time_cluster(&mut self, indication: &Indication, radio: &mut dyn RadioDriver, now_tick: u64) -> Result<()> {
        if indication.header.command_id != 0x00 {
            return Ok(());
        }
        let snapshot = protocol::current_time(now_tick as i64, 0, None);

        let mut payload = Vec::new();
        payload.extend_from_slice(&0x0000u16.to_le_bytes()); // Time attribute
        payload.push(0x00); // status: success
        payload.push(0x23); // Uint32
        payload.extend_from_slice(&snapshot.utc_time.to_le_bytes());

        let frame = ZclFrame {
            header: ZclHeader {
                frame_control: FrameControl::empty(),
                manufacturer_code: None,
                sequence_number: indication.header.sequence_number,
                command_id: 0x01, // Read Attributes Response
            },
            payload,
        };
        let req = ApsRequest {
            destination: ApsDestination::Unicast {
                short_address: indication.src_short_address,
                ext_address: indication.src_ext_address,
                endpoint: indication.src_endpoint,
            },
            profile_id: HA_PROFILE_ID,
            cluster_id: TIME_CLUSTER_ID,
            src_endpoint: self.config.gateway_endpoint,
            payload: protocol::encode_frame(&frame),
        };
        radio.submit_aps_request(req)?;
        Ok(())
    }

    fn dispatch_cluster(&mut self, indication: &Indication, radio: &mut dyn RadioDriver, now_tick: u64) -> Result<()> {
        match indication.cluster_id {
            TUYA_CLUSTER_ID => {
                self.handle_tuya(indication);
                Ok(())
            }
            POLL_CONTROL_CLUSTER_ID => self.handle_poll_control(indication, radio, now_tick),
            TIME_CLUSTER_ID => self.handle_time_cluster(indication, radio, now_tick),
            _ => Ok(()),
        }
    }

    /// Submit every task the coordinator currently allows to run, given
    /// which devices are reachable. Returns the number of APS requests
    /// actually handed to the radio driver (`spec.md` §4.7).
    pub fn drive_coordinator(
        &mut self,
        radio: &mut dyn RadioDriver,
        reachable: impl Fn(u64) -> bool,
        now_tick: u64,
    ) -> Result<usize> {
        let mut submitted = 0;
        for binding_task in self.coordinator.pick_next_tasks(reachable) {
            let key = binding_task.task.key;
            let sequence = self.protocol.sequences.next();

            let (src_endpoint, dst_short_address) = match self.registry.device(key.src_ext_address) {
                Some(device) => {
                    let endpoint = device
                        .endpoints
                        .iter()
                        .find(|(_, clusters)| clusters.contains(&key.cluster_id))
                        .map(|(ep, _)| *ep)
                        .or_else(|| device.endpoints.keys().next().copied())
                        .unwrap_or(1);
                    (endpoint, device.short_address)
                }
                None => (1, 0),
            };

            let (cluster_id, profile_id, dst_endpoint, payload) = match key.action {
                Action::Bind | Action::Unbind => {
                    let zdp_cluster = if key.action == Action::Bind { ZDP_BIND_REQ_CLUSTER } else { ZDP_UNBIND_REQ_CLUSTER };
                    let mut payload = vec![sequence];
                    payload.extend_from_slice(&key.src_ext_address.to_le_bytes());
                    payload.push(src_endpoint);
                    payload.extend_from_slice(&key.cluster_id.to_le_bytes());
                    payload.push(0x03); // destination addressing mode: 64-bit extended address
                    payload.extend_from_slice(&self.config.gateway_ext_address.to_le_bytes());
                    payload.push(self.config.gateway_endpoint);
                    (zdp_cluster, ZDP_PROFILE_ID, 0u8, payload)
                }
                Action::ConfigureReporting => {
                    let frame = ZclFrame {
                        header: ZclHeader {
                            frame_control: FrameControl::empty(),
                            manufacturer_code: None,
                            sequence_number: sequence,
                            command_id: CONFIGURE_REPORTING_COMMAND,
                        },
                        payload: build_configure_reporting_args(&binding_task.report),
                    };
                    (key.cluster_id, HA_PROFILE_ID, src_endpoint, protocol::encode_frame(&frame))
                }
            };

            let req = ApsRequest {
                destination: ApsDestination::Unicast {
                    short_address: dst_short_address,
                    ext_address: Some(key.src_ext_address),
                    endpoint: dst_endpoint,
                },
                profile_id,
                cluster_id,
                src_endpoint: self.config.gateway_endpoint,
                payload,
            };
            radio.submit_aps_request(req)?;
            binding_task.task.mark_sent(sequence, now_tick);

            let budget = if binding_task.task.is_end_device {
                self.config.binding_timeout_end_device_ticks
            } else {
                self.config.binding_timeout_ticks
            };
            let timer = self.scheduler.timers.schedule(budget);
            self.pending_timers.insert(timer, key);

            submitted += 1;
        }
        self.coordinator.sweep_finished();
        Ok(submitted)
    }

    /// Advance the scheduler by one logical second, act on every fired
    /// timer, drive pending state changes, then flush dirty items to
    /// persistence — in that order, matching `spec.md` §4.13's "timers
    /// before event-bus drain" ordering.
    pub fn tick(&mut self, now_tick: u64, persistence: &mut dyn PersistenceAdapter, radio: &mut dyn RadioDriver) -> Result<()> {
        let fired = self.scheduler.slow_tick(now_tick);
        for handle in fired {
            if let Some(key) = self.pending_timers.remove(&handle) {
                self.handle_binding_timeout(key, now_tick);
            }
        }
        self.drive_state_changes(radio, now_tick)?;
        self.flush_needs_store(persistence)?;
        Ok(())
    }

    /// A binding task's timeout timer fired: record the failed attempt
    /// and, once retries are exhausted, schedule device-level backoff
    /// (`spec.md` §4.6, §4.7).
    fn handle_binding_timeout(&mut self, key: TaskKey, now_tick: u64) {
        let exhausted_attempt = {
            let Some(task) = self.coordinator.task_mut(key) else { return };
            if !task.is_timed_out(now_tick) {
                return;
            }
            if task.fail_attempt() {
                Some(task.retries)
            } else {
                None
            }
        };
        let Some(attempt) = exhausted_attempt else { return };
        if let Some(device) = self.registry.device_mut(key.src_ext_address) {
            if let Lifecycle::Active(state) = device.lifecycle {
                device.lifecycle = Lifecycle::Backoff(state_machine::backoff_from(state, attempt, now_tick));
            }
        }
    }

    /// Drive every device's pending [`crate::registry::StateChange`]s,
    /// submitting a Write Attributes request for each value still out of
    /// sync (`spec.md` §4.6).
    fn drive_state_changes(&mut self, radio: &mut dyn RadioDriver, now_tick: u64) -> Result<()> {
        let ext_addresses: Vec<u64> = self.registry.devices().map(|(addr, _)| *addr).collect();
        for ext_address in ext_addresses {
            let pending: Vec<(String, PendingWrite)> = {
                let Some(device) = self.registry.device_mut(ext_address) else { continue };
                device.state_changes.retain(|c| !c.is_expired(now_tick));
                let mut pending = Vec::new();
                for change in &mut device.state_changes {
                    for write in change.drive(now_tick) {
                        pending.push((change.sub_device_uniqueid.clone(), write));
                    }
                }
                device.state_changes.retain(|c| !c.is_complete());
                pending
            };
            for (uniqueid, write) in pending {
                self.submit_item_write(&uniqueid, write, radio, now_tick)?;
            }
        }
        Ok(())
    }

    /// Encode and submit one out-of-sync value as a Write Attributes
    /// request, resolving the target cluster/attribute/datatype from the
    /// backing DDF item's hook parameters.
    fn submit_item_write(&mut self, sub_device_uniqueid: &str, write: PendingWrite, radio: &mut dyn RadioDriver, now_tick: u64) -> Result<()> {
        let _ = now_tick;
        let Some(handle) = self.registry.find_by_uniqueid(sub_device_uniqueid) else { return Ok(()) };

        let resolved = {
            let Some(resource) = self.registry.resource(handle) else { return Ok(()) };
            let Some(item) = resource.item(write.suffix) else { return Ok(()) };
            let Some(item_handle) = item.handle else { return Ok(()) };
            let Some((_ddf, ddf_item)) = self.ddf_loader.get_item(item_handle) else { return Ok(()) };
            let cluster_id = ddf_item.hooks.params.get("cluster").and_then(|v| v.as_u64()).map(|v| v as u16);
            let attribute_id = ddf_item.hooks.params.get("attribute").and_then(|v| v.as_u64()).map(|v| v as u16);
            let datatype_id = ddf_item.hooks.params.get("datatype").and_then(|v| v.as_u64()).map(|v| v as u8);
            match (cluster_id, attribute_id, datatype_id) {
                (Some(c), Some(a), Some(d)) => Some((c, a, d)),
                _ => None,
            }
        };
        let Some((cluster_id, attribute_id, datatype_id)) = resolved else { return Ok(()) };
        let Some(data_type) = DataType::from_zcl_id(datatype_id) else { return Ok(()) };

        let attribute_value = match &write.target {
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::UInt(v) => AttributeValue::UInt(*v),
            Value::Int(v) => AttributeValue::Int(*v),
            Value::Real(v) => AttributeValue::Int(*v as i64),
            Value::Str(atom) => AttributeValue::Str(self.ddf_loader.atoms.get(*atom).to_string()),
            Value::TimePoint(v) => AttributeValue::Int(*v),
            Value::TimePattern(_) | Value::Empty => return Ok(()),
        };
        let Ok(encoded_value) = encode_attribute(&attribute_value, data_type) else { return Ok(()) };

        let mut payload = Vec::new();
        payload.extend_from_slice(&attribute_id.to_le_bytes());
        payload.push(datatype_id);
        payload.extend_from_slice(&encoded_value);

        let Some(ext_address) = self.owning_device_ext_address(handle) else { return Ok(()) };
        let (short_address, src_endpoint) = match self.registry.device(ext_address) {
            Some(device) => {
                let endpoint = device
                    .endpoints
                    .iter()
                    .find(|(_, clusters)| clusters.contains(&cluster_id))
                    .map(|(ep, _)| *ep)
                    .or_else(|| device.endpoints.keys().next().copied())
                    .unwrap_or(1);
                (device.short_address, endpoint)
            }
            None => (0, 1),
        };

        let sequence = self.protocol.sequences.next();
        let frame = ZclFrame {
            header: ZclHeader {
                frame_control: FrameControl::empty(),
                manufacturer_code: None,
                sequence_number: sequence,
                command_id: WRITE_ATTRIBUTES_COMMAND,
            },
            payload,
        };
        let req = ApsRequest {
            destination: ApsDestination::Unicast { short_address, ext_address: Some(ext_address), endpoint: src_endpoint },
            profile_id: HA_PROFILE_ID,
            cluster_id,
            src_endpoint: self.config.gateway_endpoint,
            payload: protocol::encode_frame(&frame),
        };
        radio.submit_aps_request(req)?;
        Ok(())
    }

    /// Drain every resource item with `needs_store` set and hand it to
    /// the persistence adapter, clearing the bit only once the write
    /// succeeds (`spec.md` §4.2 "Change tracking", §6).
    fn flush_needs_store(&mut self, persistence: &mut dyn PersistenceAdapter) -> Result<()> {
        for uniqueid in self.registry.uniqueids_with_pending_store() {
            let items = self.registry.collect_pending_store_items(&uniqueid, &self.ddf_loader.atoms);
            if items.is_empty() {
                continue;
            }
            persistence.store_items(&uniqueid, &items)?;
            self.registry.clear_needs_store(&uniqueid);
        }
        Ok(())
    }
}

/// Guess a dynamic item's type from its DDF-declared default value.
fn infer_type_tag(default: &Option<serde_json::Value>) -> TypeTag {
    match default {
        Some(serde_json::Value::Bool(_)) => TypeTag::Bool,
        Some(serde_json::Value::String(_)) => TypeTag::String,
        Some(serde_json::Value::Number(n)) if n.is_f64() => TypeTag::Real,
        _ => TypeTag::Int64,
    }
}

fn infer_type_tag_for_value(value: &Value) -> TypeTag {
    match value {
        Value::Bool(_) => TypeTag::Bool,
        Value::UInt(_) => TypeTag::UInt64,
        Value::Int(_) => TypeTag::Int64,
        Value::Real(_) => TypeTag::Real,
        Value::Str(_) => TypeTag::String,
        Value::TimePoint(_) => TypeTag::TimePoint,
        Value::TimePattern(_) => TypeTag::TimePattern,
        Value::Empty => TypeTag::Int64,
    }
}

fn json_default_to_value(default: Option<&serde_json::Value>, type_tag: TypeTag, atoms: &mut crate::atom::AtomTable) -> Option<Value> {
    match default? {
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::String(s) => atoms.intern(s).map(Value::Str),
        serde_json::Value::Number(n) if type_tag == TypeTag::Real => n.as_f64().map(Value::Real),
        serde_json::Value::Number(n) => n.as_i64().map(Value::Int),
        _ => None,
    }
}

/// Encode a Configure Reporting command's attribute-report records
/// (`spec.md` §4.7: direction, attribute id, datatype, min/max interval,
/// reportable change).
fn build_configure_reporting_args(report: &[ReportConfig]) -> Vec<u8> {
    let mut payload = Vec::new();
    for r in report {
        payload.push(0x00); // direction: reports to be sent by the device
        payload.extend_from_slice(&r.attribute_id.to_le_bytes());
        payload.push(r.datatype);
        payload.extend_from_slice(&r.min_interval.to_le_bytes());
        payload.extend_from_slice(&r.max_interval.to_le_bytes());
        if let Some(data_type) = DataType::from_zcl_id(r.datatype) {
            if let Ok(encoded) = encode_attribute(&AttributeValue::Int(r.reportable_change), data_type) {
                payload.extend_from_slice(&encoded);
            }
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::{ApsRequestId, IdentifierPair, PersistedItem, RadioParameter, RadioParameterValue};

    struct NullRadio;
    impl RadioDriver for NullRadio {
        fn submit_aps_request(&mut self, _req: ApsRequest) -> Result<ApsRequestId> {
            Ok(ApsRequestId(1))
        }
        fn get_parameter(&self, _key: RadioParameter) -> Result<RadioParameterValue> {
            Ok(RadioParameterValue::U16(0))
        }
        fn set_parameter(&mut self, _key: RadioParameter, _value: RadioParameterValue) -> Result<()> {
            Ok(())
        }
    }

    struct NullPersistence;
    impl PersistenceAdapter for NullPersistence {
        fn store_secret(&mut self, _uniqueid: &str, _state: i32, _blob: &[u8]) -> Result<()> {
            Ok(())
        }
        fn load_secret(&self, _uniqueid: &str) -> Result<Option<(i32, Vec<u8>)>> {
            Ok(None)
        }
        fn store_items(&mut self, _uniqueid: &str, _items: &[PersistedItem]) -> Result<()> {
            Ok(())
        }
        fn load_items(&self, _uniqueid: &str) -> Result<Vec<PersistedItem>> {
            Ok(Vec::new())
        }
        fn cache_zcl_value(&mut self, _uniqueid: &str, _endpoint: u8, _cluster_id: u16, _attribute_id: u16, _value: i64) -> Result<()> {
            Ok(())
        }
        fn identifier_pairs(&self) -> Result<Vec<IdentifierPair>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn new_runtime_has_empty_registry_and_coordinator() {
        let runtime = DeviceRuntime::new(RuntimeConfig::default());
        assert_eq!(runtime.coordinator.queue_len(), 0);
    }

    #[test]
    fn tick_does_not_error_with_nothing_pending() {
        let mut runtime = DeviceRuntime::new(RuntimeConfig::default());
        let mut persistence = NullPersistence;
        let mut radio = NullRadio;
        assert!(runtime.tick(1, &mut persistence, &mut radio).is_ok());
    }

    #[test]
    fn drive_coordinator_submits_nothing_when_queue_empty() {
        let mut runtime = DeviceRuntime::new(RuntimeConfig::default());
        let mut radio = NullRadio;
        let submitted = runtime.drive_coordinator(&mut radio, |_| true, 1).unwrap();
        assert_eq!(submitted, 0);
    }

    #[test]
    fn ota_state_is_created_lazily_per_device() {
        let mut runtime = DeviceRuntime::new(RuntimeConfig::default());
        assert!(!runtime.ota_state(42).is_ota_busy(0));
    }

    fn basic_cluster_identity_payload(manufacturer: &str, model: &str) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&ATTR_MANUFACTURER_NAME.to_le_bytes());
        payload.push(0x42); // CharString
        payload.push(manufacturer.len() as u8);
        payload.extend_from_slice(manufacturer.as_bytes());
        payload.extend_from_slice(&ATTR_MODEL_ID.to_le_bytes());
        payload.push(0x42);
        payload.push(model.len() as u8);
        payload.extend_from_slice(model.as_bytes());
        payload
    }

    #[test]
    fn on_indication_discovers_device_learns_identity_and_advances_lifecycle() {
        let mut runtime = DeviceRuntime::new(RuntimeConfig::default());
        let mut radio = NullRadio;
        let mut frame = vec![FrameControl::empty().bits(), 1, 0x01];
        frame.extend_from_slice(&basic_cluster_identity_payload("LUMI", "lumi.sensor_magnet"));
        let ind = ApsIndication {
            src_short_address: 0x1234,
            src_ext_address: Some(0x00124b0001abcdef),
            src_endpoint: 1,
            profile_id: HA_PROFILE_ID,
            cluster_id: BASIC_CLUSTER_ID,
            payload: frame,
            link_quality: 255,
        };

        runtime.on_indication(&ind, 1, &mut radio).unwrap();

        let device = runtime.registry.device(0x00124b0001abcdef).unwrap();
        assert_eq!(device.lifecycle, Lifecycle::Active(DeviceState::NodeDescriptorRead));
        assert!(device.manufacturer.is_some());
        assert!(device.model.is_some());
    }

    #[test]
    fn on_indication_with_no_ext_address_only_dispatches_cluster_handler() {
        let mut runtime = DeviceRuntime::new(RuntimeConfig::default());
        let mut radio = NullRadio;
        let ind = ApsIndication {
            src_short_address: 0x1234,
            src_ext_address: None,
            src_endpoint: 1,
            profile_id: HA_PROFILE_ID,
            cluster_id: TUYA_CLUSTER_ID,
            payload: vec![FrameControl::CLUSTER_SPECIFIC.bits(), 1, 0x00, 0x00, 0x00],
            link_quality: 255,
        };
        assert!(runtime.on_indication(&ind, 1, &mut radio).is_ok());
        assert_eq!(runtime.registry.device_count(), 0);
    }
}
