// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network credential backup/restore (`spec.md` §4.12).
//!
//! Produces and consumes a portable snapshot of the radio's network
//! credentials. Restore validates every field before applying anything
//! to the [`crate::iface::RadioDriver`]; reset draws fresh randomness
//! from a CSPRNG with a PRNG fallback.

use crate::error::{Error, Result};
use rand::rngs::OsRng;
use rand::{thread_rng, Rng, RngCore};

/// Fixed security mode: "high security, trust-center link key". The
/// original supports other modes; this runtime only ever produces and
/// accepts this one.
pub const SECURITY_MODE_HIGH_TC_LINK_KEY: u8 = 3;

/// Endpoint descriptor, regenerated from a fixed template on restore
/// (`spec.md` §4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
}

/// Home Automation endpoint template.
pub const HA_ENDPOINT_TEMPLATE: EndpointDescriptor =
    EndpointDescriptor { endpoint: 0x01, profile_id: 0x0104, device_id: 0x0005 };
/// Green Power endpoint template.
pub const GP_ENDPOINT_TEMPLATE: EndpointDescriptor =
    EndpointDescriptor { endpoint: 0xF2, profile_id: 0xA1E0, device_id: 0x0061 };

/// A portable snapshot of network credentials (`spec.md` §4.12).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkBackup {
    pub device_type: String,
    pub pan_id: u16,
    pub extended_pan_id: u64,
    pub channel: u8,
    pub network_key_hex: String,
    pub tc_link_key_hex: String,
    pub network_update_id: u8,
    pub frame_counter: Option<u32>,
    pub ha_endpoint: EndpointDescriptor,
    pub gp_endpoint: EndpointDescriptor,
    pub trust_center_address: u64,
    pub mac_address: u64,
}

impl NetworkBackup {
    /// Validate every field per `spec.md` §4.12, auto-correcting the
    /// trust-center address to the MAC address rather than rejecting a
    /// mismatch (the one field the spec calls out as self-healing).
    pub fn validate(&mut self) -> Result<()> {
        if self.pan_id == 0 {
            return Err(Error::InvalidArgument("pan_id must be non-zero".into()));
        }
        if !(11..=26).contains(&self.channel) {
            return Err(Error::InvalidArgument("channel must be in 11..=26".into()));
        }
        if self.network_key_hex.len() != 32 || !self.network_key_hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidArgument("network_key_hex must be 32 hex chars".into()));
        }
        if self.tc_link_key_hex.len() != 32 || !self.tc_link_key_hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidArgument("tc_link_key_hex must be 32 hex chars".into()));
        }
        if self.trust_center_address != self.mac_address {
            self.trust_center_address = self.mac_address;
        }
        Ok(())
    }
}

/// Applies a validated backup to a radio driver and returns the restored
/// (and endpoint-regenerated) credentials. The caller is responsible for
/// persisting the frame counter ratchet decision (Open Question #1,
/// see [`reconcile_frame_counter`]) before this call if it wishes to
/// combine both steps atomically.
pub fn restore(driver: &mut dyn crate::iface::RadioDriver, mut backup: NetworkBackup) -> Result<NetworkBackup> {
    backup.validate()?;
    backup.ha_endpoint = HA_ENDPOINT_TEMPLATE;
    backup.gp_endpoint = GP_ENDPOINT_TEMPLATE;

    use crate::iface::{RadioParameter, RadioParameterValue as V};
    driver.set_parameter(RadioParameter::PanId, V::U16(backup.pan_id))?;
    driver.set_parameter(RadioParameter::ExtendedPanId, V::U64(backup.extended_pan_id))?;
    driver.set_parameter(RadioParameter::Channel, V::U32(backup.channel as u32))?;
    driver.set_parameter(RadioParameter::NetworkKey, V::Bytes(hex_decode(&backup.network_key_hex)))?;
    driver.set_parameter(RadioParameter::TrustCenterLinkKey, V::Bytes(hex_decode(&backup.tc_link_key_hex)))?;
    driver.set_parameter(RadioParameter::NetworkUpdateId, V::U32(backup.network_update_id as u32))?;
    driver.set_parameter(RadioParameter::TrustCenterAddress, V::U64(backup.trust_center_address))?;
    if let Some(fc) = backup.frame_counter {
        driver.set_parameter(RadioParameter::FrameCounter, V::U32(fc))?;
    }
    Ok(backup)
}

/// Resolves Open Question #1: an imported frame counter is accepted only
/// if it is greater than or equal to the counter currently on the radio
/// (a monotonic ratchet). A smaller imported value is rejected outright
/// rather than silently clamped, since silently advancing past it would
/// reuse frame counter values the network has already seen.
pub fn reconcile_frame_counter(current: u32, imported: Option<u32>) -> Result<u32> {
    match imported {
        None => Ok(current),
        Some(value) if value >= current => Ok(value),
        Some(_) => Err(Error::InvalidArgument("imported frame counter is smaller than the current one".into())),
    }
}

/// Generates fresh network credentials for a reset: a random PAN id and
/// network key, drawn from a cryptographic random source with a
/// best-effort fallback to a uniform PRNG if the system source cannot be
/// reached (`spec.md` §4.12). The fallback path returns [`Error::Crypto`]
/// via the caller logging, not by failing the reset: reset must always
/// succeed.
pub fn reset_credentials() -> NetworkBackup {
    let (pan_id, network_key_hex) = match try_os_rng() {
        Some((pan_id, key)) => (pan_id, key),
        None => {
            let mut rng = thread_rng();
            let pan_id = loop {
                let candidate = rng.gen::<u16>();
                if candidate != 0 {
                    break candidate;
                }
            };
            let mut key = [0u8; 16];
            rng.fill_bytes(&mut key);
            (pan_id, hex_encode(&key))
        }
    };
    NetworkBackup {
        device_type: "Coordinator".to_string(),
        pan_id,
        extended_pan_id: 0,
        channel: 11,
        network_key_hex,
        tc_link_key_hex: "00".repeat(16),
        network_update_id: 0,
        frame_counter: Some(0),
        ha_endpoint: HA_ENDPOINT_TEMPLATE,
        gp_endpoint: GP_ENDPOINT_TEMPLATE,
        trust_center_address: 0,
        mac_address: 0,
    }
}

fn try_os_rng() -> Option<(u16, String)> {
    let mut rng = OsRng;
    let mut pan_bytes = [0u8; 2];
    rng.try_fill_bytes(&mut pan_bytes).ok()?;
    let pan_id = u16::from_be_bytes(pan_bytes).max(1);
    let mut key = [0u8; 16];
    rng.try_fill_bytes(&mut key).ok()?;
    Some((pan_id, hex_encode(&key)))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(hex: &str) -> Vec<u8> {
    (0..hex.len())
        .step_by(2)
        .filter_map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::{ApsRequest, ApsRequestId, RadioDriver, RadioParameter, RadioParameterValue};
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeRadio {
        params: HashMap<u8, RadioParameterValue>,
    }

    fn key(p: RadioParameter) -> u8 {
        match p {
            RadioParameter::PanId => 0,
            RadioParameter::ExtendedPanId => 1,
            RadioParameter::Channel => 2,
            RadioParameter::NetworkKey => 3,
            RadioParameter::TrustCenterLinkKey => 4,
            RadioParameter::NetworkUpdateId => 5,
            RadioParameter::FrameCounter => 6,
            RadioParameter::TrustCenterAddress => 7,
            RadioParameter::MacAddress => 8,
        }
    }

    impl RadioDriver for FakeRadio {
        fn submit_aps_request(&mut self, _req: ApsRequest) -> Result<ApsRequestId> {
            Ok(ApsRequestId(1))
        }
        fn get_parameter(&self, p: RadioParameter) -> Result<RadioParameterValue> {
            self.params.get(&key(p)).cloned().ok_or_else(|| Error::NotFound("parameter".into()))
        }
        fn set_parameter(&mut self, p: RadioParameter, value: RadioParameterValue) -> Result<()> {
            self.params.insert(key(p), value);
            Ok(())
        }
    }

    fn sample_backup() -> NetworkBackup {
        NetworkBackup {
            device_type: "Coordinator".to_string(),
            pan_id: 0x1234,
            extended_pan_id: 0xAABBCCDD,
            channel: 15,
            network_key_hex: "00112233445566778899aabbccddeeff".chars().take(32).collect(),
            tc_link_key_hex: "5a6967426565416c6c69616e63653039".to_string(),
            network_update_id: 1,
            frame_counter: Some(42),
            ha_endpoint: HA_ENDPOINT_TEMPLATE,
            gp_endpoint: GP_ENDPOINT_TEMPLATE,
            trust_center_address: 0xDEAD,
            mac_address: 0xBEEF,
        }
    }

    #[test]
    fn validate_rejects_zero_pan_id() {
        let mut backup = sample_backup();
        backup.pan_id = 0;
        assert!(backup.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_channel() {
        let mut backup = sample_backup();
        backup.channel = 30;
        assert!(backup.validate().is_err());
    }

    #[test]
    fn validate_auto_corrects_trust_center_address() {
        let mut backup = sample_backup();
        backup.validate().unwrap();
        assert_eq!(backup.trust_center_address, backup.mac_address);
    }

    #[test]
    fn restore_regenerates_endpoints_from_template() {
        let mut radio = FakeRadio::default();
        let mut backup = sample_backup();
        backup.ha_endpoint = EndpointDescriptor { endpoint: 9, profile_id: 0, device_id: 0 };
        let restored = restore(&mut radio, backup).unwrap();
        assert_eq!(restored.ha_endpoint, HA_ENDPOINT_TEMPLATE);
        assert_eq!(restored.gp_endpoint, GP_ENDPOINT_TEMPLATE);
    }

    #[test]
    fn restore_applies_parameters_to_radio() {
        let mut radio = FakeRadio::default();
        let backup = sample_backup();
        restore(&mut radio, backup.clone()).unwrap();
        assert_eq!(radio.get_parameter(RadioParameter::PanId).unwrap(), RadioParameterValue::U16(backup.pan_id));
    }

    #[test]
    fn frame_counter_reimport_rejects_smaller_value() {
        assert!(reconcile_frame_counter(100, Some(50)).is_err());
        assert_eq!(reconcile_frame_counter(100, Some(150)).unwrap(), 150);
        assert_eq!(reconcile_frame_counter(100, Some(100)).unwrap(), 100);
        assert_eq!(reconcile_frame_counter(100, None).unwrap(), 100);
    }

    #[test]
    fn reset_produces_non_zero_pan_id_and_32_char_key() {
        let backup = reset_credentials();
        assert_ne!(backup.pan_id, 0);
        assert_eq!(backup.network_key_hex.len(), 32);
    }
}
