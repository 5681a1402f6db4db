// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device compatibility shims (`spec.md` §2 supplement, grounded on
//! `device_compat.cpp`).
//!
//! The legacy plugin special-cased two migration concerns when building a
//! sub-device resource out of a DDF template: (1) a single-subdevice
//! `ZHASwitch` may already have a `sensors` table row under a *different*
//! uniqueid endpoint/cluster suffix than the current DDF declares, because
//! older firmware reported a different simple descriptor; the existing row
//! must keep winning. (2) a DDF may pin a sub-device's manufacturer/model
//! strings as static item defaults (e.g. a composite device whose
//! sub-devices report different model strings than the physical node).
//! Both rules are preserved here in the new resource model.

use crate::ddf::model::{Ddf, DdfItem, SubDeviceTemplate};
use crate::resource::item::{Access, ItemDescriptor, ResourceItem, TypeTag};
use crate::resource::{
    LightBody, Resource, ResourceBody, ResourceHandle, ResourceHeader, ResourcePrefix, SensorBody,
};
use crate::atom::AtomTable;

/// Looks up uniqueids the persistence adapter already has on file for a
/// device + sub-device type, so compat resolution doesn't depend on a
/// concrete storage backend.
pub trait LegacyUniqueIdLookup {
    fn legacy_uniqueids(&self, device_uniqueid: &str, sub_device_type: &str) -> Vec<String>;
}

fn endpoint_from_uniqueid(uniqueid: &str) -> Option<u8> {
    let parts: Vec<&str> = uniqueid.split('-').collect();
    let ep_hex = parts.get(1)?;
    u8::from_str_radix(ep_hex, 16).ok()
}

/// Resolve which uniqueid a sub-device resource should actually be stored
/// under, preserving an existing legacy row's uniqueid when the DDF is the
/// device's sole sub-device of type `ZHASwitch` and the endpoints agree
/// (`device_compat.cpp` `DEV_InitSensorNodeFromDescription`).
pub fn resolve_legacy_uniqueid(
    lookup: &dyn LegacyUniqueIdLookup,
    ddf: &Ddf,
    sub: &SubDeviceTemplate,
    device_uniqueid: &str,
    candidate_uniqueid: &str,
) -> String {
    if ddf.sub_devices.len() != 1 || sub.kind != "ZHASwitch" {
        return candidate_uniqueid.to_string();
    }
    let existing = lookup.legacy_uniqueids(device_uniqueid, &sub.kind);
    let [only] = existing.as_slice() else {
        return candidate_uniqueid.to_string();
    };
    if only == candidate_uniqueid {
        return candidate_uniqueid.to_string();
    }
    let (Some(candidate_ep), Some(legacy_ep)) = (
        endpoint_from_uniqueid(candidate_uniqueid),
        endpoint_from_uniqueid(only),
    ) else {
        return candidate_uniqueid.to_string();
    };
    if candidate_ep == legacy_ep {
        only.clone()
    } else {
        candidate_uniqueid.to_string()
    }
}

/// Extract a static string default for `suffix_name` from a sub-device's
/// items, if one is both present and marked `is_static`
/// (`device_compat.cpp` `DEV_InitLightNodeFromDescription`'s "static
/// modelid / manufacturername" scan).
fn static_string_default(sub: &SubDeviceTemplate, atoms: &AtomTable, suffix_name: &str) -> Option<String> {
    let suffix = atoms.find(suffix_name)?;
    let item: &DdfItem = sub.items.iter().find(|i| i.suffix == suffix && i.is_static)?;
    item.default.as_ref()?.as_str().map(str::to_string)
}

/// Build a `Resource` for one sub-device, mirroring
/// `DEV_InitCompatNodeFromDescription`'s dispatch on REST API family. A
/// `kind` of `"Light"` builds a light; anything else builds a sensor. The
/// caller is expected to then populate items from the sub-device template
/// via [`crate::resource::Resource::add_item`].
pub fn init_resource_from_description(
    ddf: &Ddf,
    sub: &SubDeviceTemplate,
    atoms: &AtomTable,
    handle: ResourceHandle,
    parent: ResourceHandle,
    uniqueid: String,
) -> (Resource, Option<String>, Option<String>) {
    let manufacturer_override = static_string_default(sub, atoms, "attr/manufacturername");
    let model_override = static_string_default(sub, atoms, "attr/modelid");

    let (prefix, body) = if sub.kind == "Light" {
        (ResourcePrefix::Light, ResourceBody::Light(LightBody::default()))
    } else {
        let cluster = sub
            .items
            .iter()
            .filter_map(|i| i.hooks.params.get("cluster").and_then(|v| v.as_u64()))
            .next()
            .map(|c| c as u16);
        (ResourcePrefix::Sensor, ResourceBody::Sensor(SensorBody { cluster }))
    };

    let header = ResourceHeader {
        handle,
        prefix,
        uniqueid,
        parent: Some(parent),
    };
    let _ = ddf; // kept for symmetry with the legacy signature; selection already applied upstream
    (Resource::new(header, body), manufacturer_override, model_override)
}

/// Allocate a dynamic item descriptor for a suffix the built-in registry
/// doesn't know about, matching `spec.md` §4.2 "Dynamic descriptors".
pub fn dynamic_descriptor(suffix: crate::atom::Atom, type_tag: TypeTag, access: Access) -> ItemDescriptor {
    ItemDescriptor {
        suffix,
        type_tag,
        access,
        range: None,
        dynamic: true,
    }
}

pub fn new_dynamic_item(descriptor: ItemDescriptor, public: bool) -> ResourceItem {
    ResourceItem::new(descriptor, public)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddf::model::{DdfCategory, DdfOrigin, DdfStatus};

    struct FakeLookup(Vec<String>);
    impl LegacyUniqueIdLookup for FakeLookup {
        fn legacy_uniqueids(&self, _device_uniqueid: &str, _sub_device_type: &str) -> Vec<String> {
            self.0.clone()
        }
    }

    fn ddf_with_one_subdevice(kind: &str) -> Ddf {
        Ddf {
            manufacturer_names: vec![],
            model_ids: vec![],
            product: None,
            status: DdfStatus::Gold,
            sleeper: false,
            sub_devices: vec![SubDeviceTemplate {
                kind: kind.to_string(),
                endpoint: 1,
                items: vec![],
            }],
            bindings: vec![],
            matchexpr: None,
            content_hash: [0; 32],
            category: DdfCategory::RawJson,
            origin: DdfOrigin::System,
            last_modified: 0,
        }
    }

    #[test]
    fn keeps_legacy_uniqueid_when_endpoints_agree() {
        let ddf = ddf_with_one_subdevice("ZHASwitch");
        let sub = &ddf.sub_devices[0];
        let lookup = FakeLookup(vec!["00:11:22:33:44:55:66:77-01-0006".to_string()]);
        let resolved = resolve_legacy_uniqueid(
            &lookup,
            &ddf,
            sub,
            "00:11:22:33:44:55:66:77",
            "00:11:22:33:44:55:66:77-01-1000",
        );
        assert_eq!(resolved, "00:11:22:33:44:55:66:77-01-0006");
    }

    #[test]
    fn ignores_legacy_uniqueid_when_endpoints_differ() {
        let ddf = ddf_with_one_subdevice("ZHASwitch");
        let sub = &ddf.sub_devices[0];
        let lookup = FakeLookup(vec!["00:11:22:33:44:55:66:77-02-0006".to_string()]);
        let resolved = resolve_legacy_uniqueid(
            &lookup,
            &ddf,
            sub,
            "00:11:22:33:44:55:66:77-01-1000",
            "00:11:22:33:44:55:66:77-01-1000",
        );
        assert_eq!(resolved, "00:11:22:33:44:55:66:77-01-1000");
    }

    #[test]
    fn multi_subdevice_ddf_never_applies_legacy_rule() {
        let mut ddf = ddf_with_one_subdevice("ZHASwitch");
        ddf.sub_devices.push(SubDeviceTemplate {
            kind: "ZHASwitch".to_string(),
            endpoint: 2,
            items: vec![],
        });
        let sub = &ddf.sub_devices[0];
        let lookup = FakeLookup(vec!["x-02-0006".to_string()]);
        let resolved = resolve_legacy_uniqueid(&lookup, &ddf, sub, "dev", "x-01-1000");
        assert_eq!(resolved, "x-01-1000");
    }
}
