// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DDF loader orchestration (`spec.md` §4.4).
//!
//! Drives the six load phases: index build, constants, generic items,
//! sub-device templates, device files, and signed bundles. Owns the
//! current generation's DDF table and hands out packed item handles.

use super::bundle::{classify_signatures, parse_bundle, Bundle, SignatureVerifier, TrustTier};
use super::constants::ConstantsTable;
use super::handle::{ItemHandle, MAX_LOAD_COUNTER};
use super::json::{RawDeviceFile, RawItem, SCHEMA_DEVCAP1};
use super::matching::{select, Candidate};
use super::model::{
    BindingTemplate, Ddf, DdfCategory, DdfItem, DdfOrigin, DdfPolicy, DdfRef, DdfStatus,
    HookParams, ReportConfig, SubDeviceTemplate,
};
use crate::atom::{Atom, AtomTable};
use crate::error::{Error, Result};
use std::collections::HashMap;

fn convert_item(raw: &RawItem, atoms: &mut AtomTable) -> Option<DdfItem> {
    let suffix = atoms.intern(&raw.name)?;
    let mut item = DdfItem::new(suffix);
    item.default = raw.default.clone();
    item.hooks = HookParams {
        read_expr: raw.read.as_ref().and_then(|h| h.eval.clone()),
        write_expr: raw.write.as_ref().and_then(|h| h.eval.clone()),
        parse_expr: raw.parse.as_ref().and_then(|h| h.eval.clone()),
        params: raw
            .parse
            .as_ref()
            .map(|h| h.params.clone())
            .unwrap_or_default(),
    };
    item.refresh_interval = raw.refresh_interval;
    item.is_static = raw.r#static;
    item.is_public = raw.public;
    item.is_awake = raw.awake;
    Some(item)
}

/// Loads and indexes Device Description Files. One instance owns the
/// atom table so manufacturer/model strings and item suffixes share the
/// same interning space as the rest of the runtime.
pub struct DdfLoader {
    pub atoms: AtomTable,
    constants: ConstantsTable,
    generic_items: HashMap<Atom, DdfItem>,
    /// Sub-device kind -> ordered list of item suffixes (human-readable
    /// ordering and defaults, §4.4 phase 4).
    generic_subdevices: HashMap<String, Vec<Atom>>,
    ddfs: Vec<Ddf>,
    load_counter: u32,
    /// (manufacturer atom, model atom) pairs currently in use, supplied by
    /// the persistence adapter (§4.4 phase 1).
    identifier_pairs: Vec<(Atom, Atom)>,
}

impl Default for DdfLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DdfLoader {
    pub fn new() -> Self {
        Self {
            atoms: AtomTable::new(),
            constants: ConstantsTable::new(),
            generic_items: HashMap::new(),
            generic_subdevices: HashMap::new(),
            ddfs: Vec::new(),
            load_counter: 0,
            identifier_pairs: Vec::new(),
        }
    }

    /// Phase 1: record the (manufacturer, model) pairs the persistence
    /// adapter reports are in use, for case-insensitive manufacturer
    /// lookups during matching.
    pub fn set_identifier_pairs(&mut self, pairs: Vec<(Atom, Atom)>) {
        self.identifier_pairs = pairs;
    }

    pub fn identifier_pairs(&self) -> &[(Atom, Atom)] {
        &self.identifier_pairs
    }

    /// Phase 2: define a `$NAME` constant. Later calls win; see
    /// [`ConstantsTable::define`].
    pub fn define_constant(&mut self, name: &str, value: &str) -> bool {
        self.constants.define(name, value)
    }

    pub fn constants(&self) -> &ConstantsTable {
        &self.constants
    }

    /// Phase 3: fully replace the generic item template table (a reload
    /// drops all previous templates, matching "later reloads fully
    /// replace earlier entries").
    pub fn load_generic_items(&mut self, items: &[RawItem]) {
        self.generic_items.clear();
        for raw in items {
            if let Some(item) = convert_item(raw, &mut self.atoms) {
                self.generic_items.insert(item.suffix, item);
            }
        }
    }

    /// Phase 4: fully replace the generic sub-device ordering/defaults
    /// table.
    pub fn load_generic_subdevices(&mut self, kind: &str, item_names: &[&str]) {
        let suffixes = item_names
            .iter()
            .filter_map(|n| self.atoms.intern(n))
            .collect();
        self.generic_subdevices.insert(kind.to_string(), suffixes);
    }

    /// Phase 5: parse and index one device JSON file, applying the generic
    /// merge rule to each item. Returns the index the DDF was stored at.
    pub fn load_device_json(
        &mut self,
        text: &str,
        origin: DdfOrigin,
        last_modified: i64,
        content_hash: [u8; 32],
    ) -> Result<usize> {
        let raw: RawDeviceFile =
            serde_json::from_str(text).map_err(|e| Error::Decode(format!("DDF json: {e}")))?;
        if raw.schema != SCHEMA_DEVCAP1 {
            return Err(Error::InvalidArgument(format!(
                "unsupported DDF schema: {}",
                raw.schema
            )));
        }
        self.build_ddf(raw, origin, DdfCategory::RawJson, last_modified, content_hash)
    }

    /// Phase 6: parse and index a signed bundle.
    pub fn load_bundle(
        &mut self,
        bytes: &[u8],
        origin: DdfOrigin,
        last_modified: i64,
        verifier: &dyn SignatureVerifier,
        stable_keys: &[Vec<u8>],
        beta_keys: &[Vec<u8>],
    ) -> Result<usize> {
        let bundle = parse_bundle(bytes)?;
        let device_json = bundle
            .device_json()
            .ok_or_else(|| Error::Decode("bundle: no DDFC device json".into()))?;
        let text = std::str::from_utf8(&device_json.payload)
            .map_err(|e| Error::Decode(format!("bundle: device json not utf-8: {e}")))?;
        let raw: RawDeviceFile =
            serde_json::from_str(text).map_err(|e| Error::Decode(format!("DDF json: {e}")))?;
        if raw.schema != SCHEMA_DEVCAP1 {
            return Err(Error::InvalidArgument(format!(
                "unsupported DDF schema: {}",
                raw.schema
            )));
        }

        let category = self.classify_bundle(&bundle, verifier, stable_keys, beta_keys);
        let identity = bundle.identity();
        self.build_ddf(raw, origin, category, last_modified, identity)
    }

    fn classify_bundle(
        &self,
        bundle: &Bundle,
        verifier: &dyn SignatureVerifier,
        stable_keys: &[Vec<u8>],
        beta_keys: &[Vec<u8>],
    ) -> DdfCategory {
        match classify_signatures(bundle, verifier, stable_keys, beta_keys) {
            Some(TrustTier::Stable) => DdfCategory::StableBundle,
            Some(TrustTier::Beta) => DdfCategory::BetaBundle,
            None => DdfCategory::UserBundle,
        }
    }

    fn build_ddf(
        &mut self,
        raw: RawDeviceFile,
        origin: DdfOrigin,
        category: DdfCategory,
        last_modified: i64,
        content_hash: [u8; 32],
    ) -> Result<usize> {
        let manufacturer_names = raw
            .manufacturername
            .iter()
            .filter_map(|n| self.atoms.intern(n))
            .collect();
        let model_ids = raw.modelid.iter().filter_map(|n| self.atoms.intern(n)).collect();

        let status = match raw.status {
            super::json::RawStatus::Draft => DdfStatus::Draft,
            super::json::RawStatus::Beta => DdfStatus::Beta,
            super::json::RawStatus::Gold => DdfStatus::Gold,
        };

        let mut sub_devices = Vec::with_capacity(raw.subdevices.len());
        for sd in &raw.subdevices {
            let mut items = Vec::with_capacity(sd.items.len());
            for raw_item in &sd.items {
                if let Some(mut item) = convert_item(raw_item, &mut self.atoms) {
                    if let Some(generic) = self.generic_items.get(&item.suffix).cloned() {
                        item.merge_generic(&generic);
                    }
                    items.push(item);
                }
            }
            sub_devices.push(SubDeviceTemplate {
                kind: sd.kind.clone(),
                endpoint: sd.ep,
                items,
            });
        }

        let bindings = raw
            .bindings
            .iter()
            .map(|b| BindingTemplate {
                src_endpoint: b.src_ep,
                cluster_id: b.cl,
                reports: b
                    .report
                    .iter()
                    .map(|r| ReportConfig {
                        attribute_id: r.at,
                        datatype: r.dt,
                        min_interval: r.mn,
                        max_interval: r.mx,
                        reportable_change: r.change,
                        manufacturer_code: r.mf,
                    })
                    .collect(),
            })
            .collect();

        let ddf = Ddf {
            manufacturer_names,
            model_ids,
            product: raw.product,
            status,
            sleeper: raw.sleeper,
            sub_devices,
            bindings,
            matchexpr: raw.matchexpr,
            content_hash,
            category,
            origin,
            last_modified,
        };
        self.ddfs.push(ddf);
        Ok(self.ddfs.len() - 1)
    }

    /// Advance the load generation and (re)assign packed item handles to
    /// every loaded DDF's items. Call after a batch of `load_*` calls.
    pub fn finalize_generation(&mut self) {
        self.load_counter = (self.load_counter + 1) % (MAX_LOAD_COUNTER + 1);
    }

    pub fn load_counter(&self) -> u32 {
        self.load_counter
    }

    pub fn ddf(&self, index: usize) -> Option<&Ddf> {
        self.ddfs.get(index)
    }

    /// Resolve a packed handle back to its `(Ddf, DdfItem)`, honoring the
    /// generation check (`spec.md` §8 property 3). Returns `None` both for
    /// an out-of-range handle and for a stale generation — the caller must
    /// tell those apart only by "it's gone, relookup by suffix".
    pub fn get_item(&self, handle: ItemHandle) -> Option<(&Ddf, &DdfItem)> {
        if !handle.is_current(self.load_counter) {
            return None;
        }
        let ddf = self.ddfs.get(handle.ddf_index() as usize)?;
        let sd = ddf.sub_devices.get(handle.subdevice_index() as usize)?;
        let item = sd.items.get(handle.item_index() as usize)?;
        Some((ddf, item))
    }

    /// Relookup an item by suffix within a known `(ddf_index,
    /// subdevice_index)`, used after a handle goes stale.
    pub fn find_item_by_suffix(
        &self,
        ddf_index: usize,
        subdevice_index: usize,
        suffix: Atom,
    ) -> Option<(&DdfItem, ItemHandle)> {
        let ddf = self.ddfs.get(ddf_index)?;
        let sd = ddf.sub_devices.get(subdevice_index)?;
        let (item_index, item) = sd
            .items
            .iter()
            .enumerate()
            .find(|(_, i)| i.suffix == suffix)?;
        let handle = ItemHandle::pack(
            self.load_counter,
            ddf_index as u32,
            subdevice_index as u32,
            item_index as u32,
        );
        Some((item, handle))
    }

    /// Scan the DDF table for candidates matching `(manufacturer, model)`,
    /// evaluate `matchexpr` via `matchexpr_eval`, and apply `policy`
    /// (`spec.md` §4.4 "Matching and selection"). `matchexpr_eval` returns
    /// `true` when no `matchexpr` is present or when it evaluates truthy.
    pub fn select_ddf(
        &self,
        manufacturer: Atom,
        model: Atom,
        policy: DdfPolicy,
        pinned_hash: Option<&[u8; 32]>,
        mut matchexpr_eval: impl FnMut(&str) -> bool,
    ) -> Option<DdfRef> {
        let manufacturer_hash = self.atoms.lower_case_hash(manufacturer);
        let mut candidates = Vec::new();
        for (index, ddf) in self.ddfs.iter().enumerate() {
            let manufacturer_match = ddf.manufacturer_names.iter().any(|m| {
                *m == manufacturer || self.atoms.lower_case_hash(*m) == manufacturer_hash
            });
            let model_match = ddf.model_ids.iter().any(|m| *m == model);
            if !manufacturer_match || !model_match {
                continue;
            }
            if let Some(expr) = &ddf.matchexpr {
                if !matchexpr_eval(expr) {
                    continue;
                }
            }
            candidates.push(Candidate { ddf, index });
        }
        let picked = select(candidates, policy, pinned_hash)?;
        Some(DdfRef {
            index: picked.index as u32,
            load_counter: self.load_counter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddf::bundle::SignatureVerifier;

    struct AlwaysValid;
    impl SignatureVerifier for AlwaysValid {
        fn verify(&self, _identity: &[u8; 32], _public_key: &[u8], _signature: &[u8]) -> bool {
            true
        }
    }

    fn device_json() -> &'static str {
        r#"{
            "schema": "devcap1",
            "manufacturername": ["LUMI"],
            "modelid": ["lumi.sensor_magnet"],
            "status": "gold",
            "subdevices": [
                {"type": "ZHAOpenClose", "ep": 1, "items": [
                    {"name": "state/open", "default": false}
                ]}
            ]
        }"#
    }

    #[test]
    fn loads_device_json_and_merges_generic() {
        let mut loader = DdfLoader::new();
        loader.load_generic_items(&[RawItem {
            name: "state/open".into(),
            default: Some(serde_json::json!(false)),
            read: None,
            write: None,
            parse: None,
            refresh_interval: Some(300),
            r#static: false,
            public: true,
            awake: false,
        }]);
        let idx = loader
            .load_device_json(device_json(), DdfOrigin::System, 1, [0u8; 32])
            .unwrap();
        loader.finalize_generation();

        let ddf = loader.ddf(idx).unwrap();
        let item = &ddf.sub_devices[0].items[0];
        assert!(item.is_generic_refresh);
        assert_eq!(item.refresh_interval, Some(300));
    }

    #[test]
    fn handle_roundtrips_until_reload_then_goes_stale() {
        let mut loader = DdfLoader::new();
        let idx = loader
            .load_device_json(device_json(), DdfOrigin::System, 1, [0u8; 32])
            .unwrap();
        loader.finalize_generation();

        let suffix = loader.atoms.find("state/open").unwrap();
        let (_item, handle) = loader.find_item_by_suffix(idx, 0, suffix).unwrap();
        assert!(loader.get_item(handle).is_some());

        loader.finalize_generation();
        assert!(loader.get_item(handle).is_none());

        // Relookup by suffix succeeds with a fresh handle.
        let (_item, fresh) = loader.find_item_by_suffix(idx, 0, suffix).unwrap();
        assert!(loader.get_item(fresh).is_some());
    }

    #[test]
    fn select_ddf_matches_manufacturer_case_insensitively() {
        let mut loader = DdfLoader::new();
        loader
            .load_device_json(device_json(), DdfOrigin::System, 1, [0u8; 32])
            .unwrap();
        loader.finalize_generation();

        let manufacturer = loader.atoms.find("LUMI").unwrap();
        let model = loader.atoms.find("lumi.sensor_magnet").unwrap();
        let picked = loader.select_ddf(manufacturer, model, DdfPolicy::LatestPreferStable, None, |_| true);
        assert!(picked.is_some());
    }

    #[test]
    fn load_bundle_classifies_via_verifier() {
        let mut loader = DdfLoader::new();
        let ddfb_payload = device_json().as_bytes().to_vec();
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(b"DDFB");
        buf.extend_from_slice(&(ddfb_payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&ddfb_payload);
        buf.extend_from_slice(b"EXTF");
        buf.extend_from_slice(b"DDFC");
        buf.extend_from_slice(b"device.json\0");
        buf.extend_from_slice(&(ddfb_payload.len() as u64).to_le_bytes());
        buf.extend_from_slice(&ddfb_payload);

        let idx = loader
            .load_bundle(&buf, DdfOrigin::System, 1, &AlwaysValid, &[], &[])
            .unwrap();
        assert_eq!(loader.ddf(idx).unwrap().category, DdfCategory::UserBundle);
    }
}
