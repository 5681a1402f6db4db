// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DDF data model (`spec.md` §3, §4.4).

use crate::atom::Atom;
use serde::{Deserialize, Serialize};

/// Publication status declared on a device file or bundle manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DdfStatus {
    Draft,
    Beta,
    Gold,
}

/// Where a DDF candidate came from, used for tie-breaking (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdfOrigin {
    System,
    User,
}

/// The classification a DDF candidate is assigned after signature
/// verification (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdfCategory {
    RawJson,
    StableBundle,
    BetaBundle,
    UserBundle,
}

/// `attr/ddf_policy` values (§4.4 "Selection").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DdfPolicy {
    RawJson,
    #[default]
    LatestPreferStable,
    Latest,
    Pin,
}

/// A Configure Reporting template attached to a [`Binding`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReportConfig {
    pub attribute_id: u16,
    pub datatype: u8,
    pub min_interval: u16,
    pub max_interval: u16,
    pub reportable_change: i64,
    pub manufacturer_code: Option<u16>,
}

/// Destination of a [`Binding`]: either a unicast endpoint or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingDestination {
    Unicast { ext_address: u64, endpoint: u8 },
    Group { group_id: u16 },
}

/// A device-resident binding table entry, as desired or observed by the
/// coordinator. Fully resolved: carries the concrete source address and
/// destination, unlike [`BindingTemplate`] which a DDF declares in the
/// abstract.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub src_ext_address: u64,
    pub src_endpoint: u8,
    pub cluster_id: u16,
    pub destination: BindingDestination,
    pub report: Option<ReportConfig>,
}

/// A binding a DDF declares its device needs, before the coordinator
/// resolves it against a concrete device address and gateway endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingTemplate {
    pub src_endpoint: u8,
    pub cluster_id: u16,
    pub reports: Vec<ReportConfig>,
}

/// Hook parameters for a DDF item's `read`/`write`/`parse` behavior. The
/// expression text is compiled once per DDF load by
/// [`crate::expr::Evaluator`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookParams {
    pub read_expr: Option<String>,
    pub write_expr: Option<String>,
    pub parse_expr: Option<String>,
    /// Extra static parameters (e.g. Tuya dp_id/dp_type) carried alongside
    /// the expression, keyed by name.
    pub params: std::collections::BTreeMap<String, serde_json::Value>,
}

/// One item template within a [`SubDeviceTemplate`].
#[derive(Debug, Clone)]
pub struct DdfItem {
    pub suffix: Atom,
    pub default: Option<serde_json::Value>,
    pub hooks: HookParams,
    /// Seconds between scheduled reads, or `None` if never polled.
    pub refresh_interval: Option<u32>,
    pub is_static: bool,
    pub is_public: bool,
    /// Item is expected to be present even while the device sleeps.
    pub is_awake: bool,
    /// Whether each optional field above came from the generic template
    /// rather than an explicit override (§4.4 "Merge rule").
    pub is_generic_default: bool,
    pub is_generic_read: bool,
    pub is_generic_write: bool,
    pub is_generic_parse: bool,
    pub is_generic_refresh: bool,
}

impl DdfItem {
    pub fn new(suffix: Atom) -> Self {
        Self {
            suffix,
            default: None,
            hooks: HookParams::default(),
            refresh_interval: None,
            is_static: false,
            is_public: true,
            is_awake: false,
            is_generic_default: false,
            is_generic_read: false,
            is_generic_write: false,
            is_generic_parse: false,
            is_generic_refresh: false,
        }
    }

    /// Apply the `spec.md` §4.4 merge rule: any field left unset inherits
    /// from `generic`, tagged `is_generic_*`.
    pub fn merge_generic(&mut self, generic: &DdfItem) {
        if self.default.is_none() {
            self.default = generic.default.clone();
            self.is_generic_default = true;
        }
        if self.hooks.read_expr.is_none() {
            self.hooks.read_expr = generic.hooks.read_expr.clone();
            self.is_generic_read = true;
        }
        if self.hooks.write_expr.is_none() {
            self.hooks.write_expr = generic.hooks.write_expr.clone();
            self.is_generic_write = true;
        }
        if self.hooks.parse_expr.is_none() {
            self.hooks.parse_expr = generic.hooks.parse_expr.clone();
            self.is_generic_parse = true;
        }
        if self.refresh_interval.is_none() {
            self.refresh_interval = generic.refresh_interval;
            self.is_generic_refresh = true;
        }
    }
}

/// One sub-device declared inside a device file.
#[derive(Debug, Clone)]
pub struct SubDeviceTemplate {
    /// Sub-device type, e.g. "ZHATemperature" in the original; kept
    /// abstract here as a free-form tag used for uniqueid suffixing and
    /// ordering templates.
    pub kind: String,
    pub endpoint: u8,
    pub items: Vec<DdfItem>,
}

/// A fully loaded, parsed device description.
#[derive(Debug, Clone)]
pub struct Ddf {
    pub manufacturer_names: Vec<Atom>,
    pub model_ids: Vec<Atom>,
    pub product: Option<String>,
    pub status: DdfStatus,
    pub sleeper: bool,
    pub sub_devices: Vec<SubDeviceTemplate>,
    pub bindings: Vec<BindingTemplate>,
    pub matchexpr: Option<String>,
    pub content_hash: [u8; 32],
    pub category: DdfCategory,
    pub origin: DdfOrigin,
    /// Unix epoch seconds.
    pub last_modified: i64,
}

impl Ddf {
    pub fn content_hash_hex(&self) -> String {
        self.content_hash.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// A handle-and-generation pair into the loader's DDF table, so readers
/// hold indexes rather than pointers into a table that may be swapped
/// wholesale on reload (§5 "DDF table").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdfRef {
    pub index: u32,
    pub load_counter: u32,
}
