// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! External interfaces (`spec.md` §6): the traits the core is driven
//! through. Nothing in this module touches a socket or a database; the
//! radio, the persistence layer, and the REST surface are all external
//! collaborators implementing these traits.

use crate::error::Result;

/// Addressing mode for an outbound APS request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApsDestination {
    Unicast { short_address: u16, ext_address: Option<u64>, endpoint: u8 },
    Group { group_id: u16 },
}

/// An outbound request submitted to the radio driver.
#[derive(Debug, Clone)]
pub struct ApsRequest {
    pub destination: ApsDestination,
    pub profile_id: u16,
    pub cluster_id: u16,
    pub src_endpoint: u8,
    pub payload: Vec<u8>,
}

/// Opaque id the radio driver assigns a submitted request, used to
/// correlate the later confirm callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApsRequestId(pub u16);

/// Inbound data indication, as delivered by `on_aps_data_indication`.
#[derive(Debug, Clone)]
pub struct ApsIndication {
    pub src_short_address: u16,
    pub src_ext_address: Option<u64>,
    pub src_endpoint: u8,
    pub profile_id: u16,
    pub cluster_id: u16,
    pub payload: Vec<u8>,
    pub link_quality: u8,
}

/// Inbound confirm, as delivered by `on_aps_data_confirm`.
#[derive(Debug, Clone, Copy)]
pub struct ApsConfirm {
    pub request_id: ApsRequestId,
    pub status: u8,
    pub dst_short_address: u16,
}

/// Network-credential or endpoint-configuration key understood by
/// `get_parameter`/`set_parameter` (`spec.md` §4.12, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioParameter {
    PanId,
    ExtendedPanId,
    Channel,
    NetworkKey,
    TrustCenterLinkKey,
    NetworkUpdateId,
    FrameCounter,
    TrustCenterAddress,
    MacAddress,
}

/// Value carried by a radio parameter get/set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioParameterValue {
    U16(u16),
    U32(u32),
    U64(u64),
    Bytes(Vec<u8>),
}

/// The serial/HCI radio driver, consumed by the core (`spec.md` §6
/// "Radio driver"). Submission is non-blocking: `submit_aps_request`
/// returns as soon as the request is queued on the radio side, and the
/// eventual outcome arrives through `on_aps_data_confirm`.
pub trait RadioDriver {
    /// Queue `req` for transmission. Returns a correlation id on success,
    /// or an `Io`/`Busy` error if the local radio cannot accept it.
    fn submit_aps_request(&mut self, req: ApsRequest) -> Result<ApsRequestId>;

    fn get_parameter(&self, key: RadioParameter) -> Result<RadioParameterValue>;

    fn set_parameter(&mut self, key: RadioParameter, value: RadioParameterValue) -> Result<()>;
}

/// Callbacks the radio driver invokes on the core. Kept separate from
/// [`RadioDriver`] because the core implements this trait while an
/// external driver implementation calls it; the driver never needs to
/// hand back a `&mut dyn RadioDriver` to do so.
pub trait RadioEventSink {
    fn on_aps_data_indication(&mut self, ind: ApsIndication);
    fn on_aps_data_confirm(&mut self, conf: ApsConfirm);
}

/// A single `(name, value, timestamp_ms)` resource item row as persisted
/// or loaded (`spec.md` §6 "Persistence adapter").
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedItem {
    pub name: String,
    pub value: crate::resource::item::Value,
    pub timestamp_ms: i64,
}

/// A `(manufacturer, model)` pair as stored in the database, used by the
/// DDF loader's index build (`spec.md` §4.4 step 1, §6). Reported as
/// plain strings rather than [`Atom`]s: the adapter has no access to the
/// core's atom table, so the caller interns each pair (via
/// [`crate::atom::AtomTable::intern`]) before handing it to
/// [`crate::ddf::DdfLoader::set_identifier_pairs`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentifierPair {
    pub manufacturer: String,
    pub model: String,
}

/// The SQLite-backed (or otherwise) persistence adapter, consumed by the
/// core (`spec.md` §6 "Persistence adapter"). Every write is serialized
/// and debounced by the caller (`config::RuntimeConfig`'s
/// `db_short_save_delay_secs`/`db_long_save_delay_secs`); the core never
/// reads its own writes back from this trait to confirm them — it treats
/// in-memory state as authoritative between saves (`spec.md` §5).
pub trait PersistenceAdapter {
    /// Store an opaque secrets blob (network credentials, keys) keyed by
    /// uniqueid, alongside a small state integer the caller interprets.
    fn store_secret(&mut self, uniqueid: &str, state: i32, blob: &[u8]) -> Result<()>;
    fn load_secret(&self, uniqueid: &str) -> Result<Option<(i32, Vec<u8>)>>;

    /// Persist every item on a sub-device/device whose `needs_store` bit
    /// is set. The caller clears the bit only after this returns `Ok`.
    fn store_items(&mut self, uniqueid: &str, items: &[PersistedItem]) -> Result<()>;
    fn load_items(&self, uniqueid: &str) -> Result<Vec<PersistedItem>>;

    /// Write a ZCL attribute's latest numeric value to the cache, but
    /// only the first time that (cluster, attribute) pair is seen for
    /// the device — a cache miss on subsequent identical values is not
    /// an error, just a no-op from the adapter's point of view.
    fn cache_zcl_value(&mut self, uniqueid: &str, endpoint: u8, cluster_id: u16, attribute_id: u16, value: i64) -> Result<()>;

    fn identifier_pairs(&self) -> Result<Vec<IdentifierPair>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullAdapter;

    impl PersistenceAdapter for NullAdapter {
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
    fn null_adapter_satisfies_trait_object_safety() {
        let mut adapter = NullAdapter;
        let dynamic: &mut dyn PersistenceAdapter = &mut adapter;
        assert!(dynamic.load_items("x").unwrap().is_empty());
    }
}
