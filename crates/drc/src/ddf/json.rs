// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw JSON shapes for DDF files (`spec.md` §4.4 phases 2-5), deserialized
//! with `serde_json` before being resolved into the interned [`super::model`]
//! types.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct RawHookParams {
    #[serde(default)]
    pub eval: Option<String>,
    #[serde(default)]
    pub parse: Option<serde_json::Value>,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawItem {
    pub name: String,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub read: Option<RawHookParams>,
    #[serde(default)]
    pub write: Option<RawHookParams>,
    #[serde(default)]
    pub parse: Option<RawHookParams>,
    #[serde(default)]
    pub refresh_interval: Option<u32>,
    #[serde(default)]
    pub r#static: bool,
    #[serde(default = "default_true")]
    pub public: bool,
    #[serde(default)]
    pub awake: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawReportConfig {
    pub at: u16,
    pub dt: u8,
    pub mn: u16,
    pub mx: u16,
    pub change: i64,
    #[serde(default)]
    pub mf: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBinding {
    pub bind: String,
    pub src_ep: u8,
    pub cl: u16,
    #[serde(default)]
    pub report: Vec<RawReportConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSubDevice {
    #[serde(rename = "type")]
    pub kind: String,
    pub ep: u8,
    #[serde(default)]
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawStatus {
    Draft,
    Beta,
    Gold,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDeviceFile {
    pub schema: String,
    #[serde(default)]
    pub manufacturername: Vec<String>,
    #[serde(default)]
    pub modelid: Vec<String>,
    #[serde(default)]
    pub matchexpr: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    pub status: RawStatus,
    #[serde(default)]
    pub sleeper: bool,
    #[serde(default)]
    pub subdevices: Vec<RawSubDevice>,
    #[serde(default)]
    pub bindings: Vec<RawBinding>,
}

/// The one schema tag `spec.md` §4.4 recognizes for device files.
pub const SCHEMA_DEVCAP1: &str = "devcap1";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_device_file() {
        let text = r#"{
            "schema": "devcap1",
            "manufacturername": ["LUMI"],
            "modelid": ["lumi.sensor_magnet"],
            "status": "gold",
            "subdevices": [
                {
                    "type": "ZHAOpenClose",
                    "ep": 1,
                    "items": [
                        {"name": "state/open", "default": false}
                    ]
                }
            ]
        }"#;
        let raw: RawDeviceFile = serde_json::from_str(text).unwrap();
        assert_eq!(raw.schema, SCHEMA_DEVCAP1);
        assert_eq!(raw.manufacturername, vec!["LUMI"]);
        assert_eq!(raw.subdevices[0].items[0].name, "state/open");
    }
}
