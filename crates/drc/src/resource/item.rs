// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resource item model (`spec.md` §4.2).

use crate::atom::Atom;
use crate::ddf::handle::ItemHandle;

/// Who originated a `set_value` call. Used to decide whether a change
/// should be pushed to the REST view model and/or re-written to the
/// device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// Came in over the management API (a write request).
    Api,
    /// Came in from the device itself (a report or read response).
    Device,
    /// Synthesized internally (derived items, defaults).
    Internal,
}

/// The declared type of a [`ResourceItem`]'s value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Bool,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Real,
    /// Interned short string.
    String,
    /// Milliseconds since epoch.
    TimePoint,
    /// Opaque time-pattern string (cron-like).
    TimePattern,
}

/// Read/write access mode declared on a [`ResourceItem`]'s descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// An inclusive numeric range constraint, checked by `set_value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

/// The immutable part of a [`ResourceItem`]: what it is, not what it holds.
#[derive(Debug, Clone)]
pub struct ItemDescriptor {
    pub suffix: Atom,
    pub type_tag: TypeTag,
    pub access: Access,
    pub range: Option<NumericRange>,
    /// Set for items allocated at runtime because a DDF referenced a
    /// suffix unknown to the built-in registry (§4.2 "Dynamic descriptors").
    pub dynamic: bool,
}

/// A tagged value union matching [`TypeTag`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Real(f64),
    Str(Atom),
    TimePoint(i64),
    TimePattern(String),
    /// No value has ever been set.
    Empty,
}

impl Value {
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::UInt(v) => Some(*v != 0),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::UInt(v) => Some(*v as f64),
            Value::Int(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::TimePoint(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn to_string_atom(&self) -> Option<Atom> {
        match self {
            Value::Str(a) => Some(*a),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Change-tracking bits on a [`ResourceItem`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ItemFlags: u8 {
        /// The item is exposed to the REST view model.
        const PUBLIC        = 0b0000_0001;
        /// A value change has not yet been pushed to the view model.
        const NEEDS_PUSH     = 0b0000_0010;
        /// A value change has not yet been written by the persistence adapter.
        const NEEDS_STORE    = 0b0000_0100;
        /// Allocated at runtime rather than from the built-in registry.
        const DYNAMIC        = 0b0000_1000;
    }
}

/// A single typed attribute cell on a [`super::Resource`].
#[derive(Debug, Clone)]
pub struct ResourceItem {
    pub descriptor: ItemDescriptor,
    value: Value,
    /// Monotonic logical-tick timestamp of the last `set_value` call,
    /// regardless of whether the value changed.
    pub last_set: u64,
    /// Monotonic logical-tick timestamp of the last value *change*.
    pub last_changed: u64,
    /// Timestamp the device last successfully applied a Configure Reporting
    /// request for this item (§4.7).
    pub last_configured: Option<u64>,
    pub flags: ItemFlags,
    /// Resolved DDF item handle, or `None` if this item has no backing DDF
    /// template (a built-in, non-DDF item).
    pub handle: Option<ItemHandle>,
}

impl ResourceItem {
    pub fn new(descriptor: ItemDescriptor, public: bool) -> Self {
        let mut flags = ItemFlags::empty();
        if public {
            flags |= ItemFlags::PUBLIC;
        }
        if descriptor.dynamic {
            flags |= ItemFlags::DYNAMIC;
        }
        Self {
            descriptor,
            value: Value::Empty,
            last_set: 0,
            last_changed: 0,
            last_configured: None,
            flags,
            handle: None,
        }
    }

    /// Apply a new value at logical tick `now`. `last_set` always advances;
    /// `last_changed` advances only if the value actually differs. Raises
    /// `NEEDS_PUSH` when the item is public and the value changed, and
    /// `NEEDS_STORE` on any changed value regardless of `source`: §4.2
    /// draws no distinction in storage behavior by origin, and an
    /// API-driven write that skipped persistence would silently revert on
    /// the next load.
    pub fn set_value(&mut self, v: Value, source: ValueSource, now: u64) {
        let _ = source;
        let changed = v != self.value;
        self.value = v;
        self.last_set = now;
        if changed {
            self.last_changed = now;
            if self.flags.contains(ItemFlags::PUBLIC) {
                self.flags |= ItemFlags::NEEDS_PUSH;
            }
            self.flags |= ItemFlags::NEEDS_STORE;
        }
    }

    pub fn to_variant(&self) -> &Value {
        &self.value
    }

    pub fn to_bool(&self) -> Option<bool> {
        self.value.to_bool()
    }

    pub fn to_number(&self) -> Option<f64> {
        self.value.to_number()
    }

    /// Cleared by the persistence adapter once the value has been written.
    pub fn clear_needs_store(&mut self) {
        self.flags.remove(ItemFlags::NEEDS_STORE);
    }

    /// Cleared by the REST view model once the change has been observed.
    pub fn clear_needs_push(&mut self) {
        self.flags.remove(ItemFlags::NEEDS_PUSH);
    }
}
