// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device Registry (`spec.md` §4.6): owns every [`Resource`] and
//! [`Device`], enforces uniqueid uniqueness, and drives the per-device
//! lifecycle state machine.

pub mod device;
pub mod state_change;
pub mod state_machine;

pub use device::{Device, Lifecycle};
pub use state_change::StateChange;
pub use state_machine::{DeviceState, Transition};

use crate::atom::AtomTable;
use crate::iface::PersistedItem;
use crate::resource::item::ItemFlags;
use crate::resource::{Resource, ResourceHandle};
use std::collections::HashMap;

/// Owns the resource table (devices, sub-devices, groups, ...) and the
/// per-device lifecycle records. A resource's uniqueid is globally unique
/// (`spec.md` §3 invariant): re-registering an existing uniqueid returns
/// the original handle rather than creating a duplicate.
#[derive(Debug, Default)]
pub struct Registry {
    resources: Vec<Option<Resource>>,
    generations: Vec<u32>,
    free_slots: Vec<u32>,
    by_uniqueid: HashMap<String, ResourceHandle>,
    devices: HashMap<u64, Device>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `resource`, or return the existing handle if its uniqueid
    /// is already present (§3 invariant).
    pub fn register_resource(&mut self, resource: Resource) -> ResourceHandle {
        if let Some(existing) = self.by_uniqueid.get(&resource.header.uniqueid) {
            return *existing;
        }
        let handle = if let Some(index) = self.free_slots.pop() {
            let generation = self.generations[index as usize];
            self.resources[index as usize] = Some(resource);
            ResourceHandle { index, generation }
        } else {
            let index = self.resources.len() as u32;
            self.generations.push(0);
            self.resources.push(Some(resource));
            ResourceHandle { index, generation: 0 }
        };
        self.by_uniqueid
            .insert(self.resources[handle.index as usize].as_ref().unwrap().header.uniqueid.clone(), handle);
        handle
    }

    /// Remove a resource, bumping its slot's generation so any handle
    /// still referencing the old generation resolves to `None` instead of
    /// aliasing whatever gets allocated into the slot next.
    pub fn remove_resource(&mut self, handle: ResourceHandle) {
        if self.generations.get(handle.index as usize) != Some(&handle.generation) {
            return;
        }
        if let Some(Some(resource)) = self.resources.get(handle.index as usize) {
            self.by_uniqueid.remove(&resource.header.uniqueid);
        }
        self.resources[handle.index as usize] = None;
        self.generations[handle.index as usize] += 1;
        self.free_slots.push(handle.index);
    }

    pub fn resource(&self, handle: ResourceHandle) -> Option<&Resource> {
        if self.generations.get(handle.index as usize) != Some(&handle.generation) {
            return None;
        }
        self.resources.get(handle.index as usize)?.as_ref()
    }

    pub fn resource_mut(&mut self, handle: ResourceHandle) -> Option<&mut Resource> {
        if self.generations.get(handle.index as usize) != Some(&handle.generation) {
            return None;
        }
        self.resources.get_mut(handle.index as usize)?.as_mut()
    }

    pub fn find_by_uniqueid(&self, uniqueid: &str) -> Option<ResourceHandle> {
        self.by_uniqueid.get(uniqueid).copied()
    }

    pub fn device(&self, ext_address: u64) -> Option<&Device> {
        self.devices.get(&ext_address)
    }

    pub fn device_mut(&mut self, ext_address: u64) -> Option<&mut Device> {
        self.devices.get_mut(&ext_address)
    }

    /// Insert a freshly discovered device, or return the existing one
    /// (`spec.md` §3: "created on first indication from a new address").
    pub fn discover_device(&mut self, ext_address: u64, short_address: u16, is_end_device: bool, resource: Resource) -> ResourceHandle {
        if let Some(existing) = self.devices.get(&ext_address) {
            return existing.resource;
        }
        let handle = self.register_resource(resource);
        self.devices
            .insert(ext_address, Device::new(handle, ext_address, short_address, is_end_device));
        handle
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Every discovered device keyed by extended address, in arbitrary
    /// (hash-map) order. Used by read-mostly consumers (the REST view
    /// model's device list) that don't need registration order.
    pub fn devices(&self) -> impl Iterator<Item = (&u64, &Device)> {
        self.devices.iter()
    }

    /// Groups with no members are kept rather than auto-garbage-collected
    /// (Open Question #2, resolved in `SPEC_FULL.md` §4: the legacy
    /// behavior is preserved since some clients rely on stable group
    /// resources persisting across membership churn). Explicit callers that
    /// want the old auto-GC behavior call this directly.
    pub fn prune_empty_groups(&mut self) {
        use crate::resource::ResourceBody;
        let empty_group_handles: Vec<ResourceHandle> = self
            .resources
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let resource = slot.as_ref()?;
                match &resource.body {
                    ResourceBody::Group(g) if g.members.is_empty() => Some(ResourceHandle {
                        index: index as u32,
                        generation: self.generations[index],
                    }),
                    _ => None,
                }
            })
            .collect();
        for handle in empty_group_handles {
            self.remove_resource(handle);
        }
    }

    /// Every uniqueid with at least one item whose `NEEDS_STORE` bit is
    /// set, in registry iteration order (`spec.md` §4.2 "Change
    /// tracking", §6 "Persistence adapter").
    pub fn uniqueids_with_pending_store(&self) -> Vec<String> {
        self.resources
            .iter()
            .filter_map(|slot| {
                let resource = slot.as_ref()?;
                resource
                    .items()
                    .iter()
                    .any(|item| item.flags.contains(ItemFlags::NEEDS_STORE))
                    .then(|| resource.header.uniqueid.clone())
            })
            .collect()
    }

    /// Snapshot the `(name, value, timestamp)` rows a persistence adapter
    /// should write for one resource's pending items, resolving each
    /// item's suffix atom to a string via `atoms`.
    pub fn collect_pending_store_items(&self, uniqueid: &str, atoms: &AtomTable) -> Vec<PersistedItem> {
        let Some(handle) = self.find_by_uniqueid(uniqueid) else { return Vec::new() };
        let Some(resource) = self.resource(handle) else { return Vec::new() };
        resource
            .items()
            .iter()
            .filter(|item| item.flags.contains(ItemFlags::NEEDS_STORE))
            .map(|item| PersistedItem {
                name: atoms.get(item.descriptor.suffix).to_string(),
                value: item.to_variant().clone(),
                timestamp_ms: item.last_set as i64,
            })
            .collect()
    }

    /// Clear `NEEDS_STORE` on every item of `uniqueid`, once the
    /// persistence adapter has confirmed the write.
    pub fn clear_needs_store(&mut self, uniqueid: &str) {
        let Some(handle) = self.find_by_uniqueid(uniqueid) else { return };
        if let Some(resource) = self.resource_mut(handle) {
            for item in resource.items_mut() {
                item.clear_needs_store();
            }
        }
    }

    /// Move `member` into group `group_id`'s membership list, creating the
    /// group resource the first time it's referenced, and removing
    /// `member` from every other group it was in (`spec.md` §3 "Group
    /// membership bookkeeping"). `group_id == 0` removes membership
    /// without creating or touching any group resource.
    pub fn set_group_membership(&mut self, member: ResourceHandle, group_id: u16) {
        use crate::resource::{GroupBody, ResourceBody, ResourceHeader, ResourcePrefix};

        for slot in self.resources.iter_mut().flatten() {
            if let ResourceBody::Group(g) = &mut slot.body {
                g.members.retain(|&m| m != member);
            }
        }
        if group_id == 0 {
            return;
        }

        let uniqueid = format!("grp-{group_id:04x}");
        let handle = if let Some(handle) = self.find_by_uniqueid(&uniqueid) {
            handle
        } else {
            let resource = Resource::new(
                ResourceHeader {
                    handle: ResourceHandle { index: 0, generation: 0 },
                    prefix: ResourcePrefix::Group,
                    uniqueid,
                    parent: None,
                },
                ResourceBody::Group(GroupBody { group_id, members: Vec::new() }),
            );
            self.register_resource(resource)
        };

        if let Some(resource) = self.resource_mut(handle) {
            if let ResourceBody::Group(g) = &mut resource.body {
                if !g.members.contains(&member) {
                    g.members.push(member);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourceBody, ResourceHeader, ResourcePrefix, SensorBody};

    fn sensor(uniqueid: &str) -> Resource {
        Resource::new(
            ResourceHeader {
                handle: ResourceHandle { index: 0, generation: 0 },
                prefix: ResourcePrefix::Sensor,
                uniqueid: uniqueid.to_string(),
                parent: None,
            },
            ResourceBody::Sensor(SensorBody::default()),
        )
    }

    #[test]
    fn registering_same_uniqueid_twice_returns_same_handle() {
        let mut registry = Registry::new();
        let a = registry.register_resource(sensor("dev-1-01"));
        let b = registry.register_resource(sensor("dev-1-01"));
        assert_eq!(a, b);
    }

    #[test]
    fn removed_handle_does_not_alias_reused_slot() {
        let mut registry = Registry::new();
        let a = registry.register_resource(sensor("dev-1-01"));
        registry.remove_resource(a);
        let b = registry.register_resource(sensor("dev-1-02"));
        assert_eq!(a.index, b.index); // slot reused
        assert_ne!(a.generation, b.generation);
        assert!(registry.resource(a).is_none());
        assert!(registry.resource(b).is_some());
    }

    #[test]
    fn discover_device_is_idempotent_per_ext_address() {
        let mut registry = Registry::new();
        let a = registry.discover_device(0x1122, 1, false, sensor("dev-1"));
        let b = registry.discover_device(0x1122, 1, false, sensor("dev-1-dup"));
        assert_eq!(a, b);
        assert_eq!(registry.device_count(), 1);
    }
}
