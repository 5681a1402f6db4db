// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Vendor Tunnel Handler (`spec.md` §4.9), grounded on `tuya.h`/`tuya.cpp`.
//!
//! Cluster `0xEF00` tunnels a list of typed datapoints inside one ZCL
//! frame. The mapping from `(dp_id, dp_type)` to resource item suffix is
//! declared per device in the DDF parse hook parameters (§4.9), so this
//! module only concerns itself with the frame/datapoint codec and the
//! scaling rule demonstrated by the worked example in `spec.md` §8 (S4).

use crate::error::{Error, Result};

/// The vendor cluster id this handler tunnels (`0xEF00` in the source).
pub const CLUSTER_ID: u16 = 0xEF00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpType {
    Raw,
    Bool,
    Value,
    String,
    Enum,
    Fault,
}

impl DpType {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x00 => DpType::Raw,
            0x01 => DpType::Bool,
            0x02 => DpType::Value,
            0x03 => DpType::String,
            0x04 => DpType::Enum,
            0x05 => DpType::Fault,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        match self {
            DpType::Raw => 0x00,
            DpType::Bool => 0x01,
            DpType::Value => 0x02,
            DpType::String => 0x03,
            DpType::Enum => 0x04,
            DpType::Fault => 0x05,
        }
    }
}

/// Tuya outer command ids (`tuya.h` `TUYA_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuyaCommand {
    Request,
    Reporting,
    Query,
    TimeSynchronisation,
}

impl TuyaCommand {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x00 => TuyaCommand::Request,
            0x01 => TuyaCommand::Reporting,
            0x02 => TuyaCommand::Query,
            0x24 => TuyaCommand::TimeSynchronisation,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        match self {
            TuyaCommand::Request => 0x00,
            TuyaCommand::Reporting => 0x01,
            TuyaCommand::Query => 0x02,
            TuyaCommand::TimeSynchronisation => 0x24,
        }
    }
}

/// Well-known `dp_id` values for a thermostat sub-device (`tuya.h`
/// `DP_IDENTIFIER_THERMOSTAT_*`); kept for mapping tables built on top of
/// this codec.
pub const DP_IDENTIFIER_THERMOSTAT_HEATSETPOINT: u8 = 0x02;
pub const DP_IDENTIFIER_WINDOW_OPEN: u8 = 0x12;

#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    pub dp_id: u8,
    pub dp_type: DpType,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TuyaFrame {
    pub status: u8,
    pub transaction_id: u8,
    pub datapoints: Vec<Datapoint>,
}

/// Decode a Tuya tunnel frame: `status(1) transaction_id(1)
/// (dp_id(1) dp_type(1) length(2 BE) data(length))*`. Rejects a datapoint
/// whose declared length exceeds the remaining bytes.
pub fn decode_frame(bytes: &[u8]) -> Result<TuyaFrame> {
    let status = *bytes.get(0).ok_or_else(|| Error::Decode("tuya: empty frame".into()))?;
    let transaction_id = *bytes
        .get(1)
        .ok_or_else(|| Error::Decode("tuya: missing transaction id".into()))?;

    let mut pos = 2;
    let mut datapoints = Vec::new();
    while pos < bytes.len() {
        let dp_id = *bytes
            .get(pos)
            .ok_or_else(|| Error::Decode("tuya: truncated datapoint id".into()))?;
        let dp_type_byte = *bytes
            .get(pos + 1)
            .ok_or_else(|| Error::Decode("tuya: truncated datapoint type".into()))?;
        let dp_type = DpType::from_byte(dp_type_byte)
            .ok_or_else(|| Error::Decode(format!("tuya: unknown dp_type 0x{dp_type_byte:02x}")))?;
        let len_bytes = bytes
            .get(pos + 2..pos + 4)
            .ok_or_else(|| Error::Decode("tuya: truncated datapoint length".into()))?;
        let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        let data_start = pos + 4;
        let data = bytes
            .get(data_start..data_start + len)
            .ok_or_else(|| Error::Decode("tuya: datapoint data exceeds buffer".into()))?
            .to_vec();
        datapoints.push(Datapoint { dp_id, dp_type, data });
        pos = data_start + len;
    }

    Ok(TuyaFrame { status, transaction_id, datapoints })
}

pub fn encode_frame(frame: &TuyaFrame) -> Vec<u8> {
    let mut buf = vec![frame.status, frame.transaction_id];
    for dp in &frame.datapoints {
        buf.push(dp.dp_id);
        buf.push(dp.dp_type.to_byte());
        buf.extend_from_slice(&(dp.data.len() as u16).to_be_bytes());
        buf.extend_from_slice(&dp.data);
    }
    buf
}

/// Decode a `value` datapoint's payload as the 32-bit signed big-endian
/// integer `spec.md` §4.9 specifies.
pub fn decode_value(data: &[u8]) -> Result<i32> {
    let bytes: [u8; 4] = data
        .try_into()
        .map_err(|_| Error::Decode(format!("tuya: value datapoint must be 4 bytes, got {}", data.len())))?;
    Ok(i32::from_be_bytes(bytes))
}

pub fn encode_value(value: i32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// The `(0x02, value) -> config/heatsetpoint` mapping scales the raw
/// datapoint value by 10 (`spec.md` §8 scenario S4).
pub fn scale_heatsetpoint(raw: i32) -> i32 {
    raw * 10
}

/// Deterministic replacement for the legacy `isTuyaManufacturerName`
/// regex (`spec.md` §9 Design Notes, "Shared vendor name matching"):
/// `_T` + one uppercase letter + four alphanumerics + `_` + eight
/// lowercase alphanumerics, e.g. `_TZ3000_mmtwjmaq`.
pub fn is_tuya_manufacturer_name(name: &str) -> bool {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() != 16 {
        return false;
    }
    chars[0] == '_'
        && chars[1] == 'T'
        && chars[2].is_ascii_uppercase()
        && chars[3..7].iter().all(|c| c.is_ascii_alphanumeric())
        && chars[7] == '_'
        && chars[8..16].iter().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}
