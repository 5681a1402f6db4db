// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Button/action maps (`SPEC_FULL.md` §2, grounded on `button_maps.cpp`).
//!
//! A small table mapping a cluster command (plus an optional payload
//! discriminator, e.g. a scene/group id byte) to a semantic action tag —
//! "on", "off", "scene_1", and so on. Consulted by the cluster protocol
//! engine after a frame is dispatched, to annotate the command with a
//! human-meaningful action recorded as a resource item update rather
//! than left as raw cluster/command numbers.
//!
//! The original keeps a `ButtonMapRef{index, hash}` so a reference taken
//! before a table reload is detected as stale rather than silently
//! aliasing whatever moved into that slot; `ActionMapRef` mirrors that
//! shape the same way [`crate::ddf::handle::ItemHandle`] does for DDF
//! items.

use crate::atom::Atom;
use std::collections::HashMap;

/// Identifies one command an action map entry matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub cluster_id: u16,
    pub command_id: u8,
    /// First payload byte, when the action depends on it (e.g. a scene
    /// or level value); `None` matches regardless of payload.
    pub payload_discriminator: Option<u8>,
}

/// A resolved reference into an [`ActionMap`], validated against the
/// table's generation before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionMapRef {
    index: u32,
    generation: u32,
}

struct Entry {
    key: ActionKey,
    action: Atom,
}

/// Static-ish lookup table from [`ActionKey`] to a semantic action atom.
/// Entries are added once at startup per product/DDF and rarely change
/// afterward, but the table supports wholesale reload (a new DDF
/// generation can register a different map), bumping the generation so
/// any [`ActionMapRef`] taken before the reload is rejected rather than
/// resolved against the wrong entry.
#[derive(Default)]
pub struct ActionMap {
    entries: Vec<Entry>,
    by_key: HashMap<ActionKey, u32>,
    generation: u32,
}

impl ActionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry, returning a ref for later fast lookup. A
    /// duplicate key overwrites the previous entry in place (same index,
    /// same generation) rather than appending.
    pub fn register(&mut self, key: ActionKey, action: Atom) -> ActionMapRef {
        if let Some(&index) = self.by_key.get(&key) {
            self.entries[index as usize].action = action;
            return ActionMapRef { index, generation: self.generation };
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry { key, action });
        self.by_key.insert(key, index);
        ActionMapRef { index, generation: self.generation }
    }

    /// Discard every entry and bump the generation, invalidating every
    /// ref handed out so far.
    pub fn reload(&mut self) {
        self.entries.clear();
        self.by_key.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    /// Resolve a ref taken before the last [`ActionMap::reload`]. Returns
    /// `None` for a stale ref rather than panicking or aliasing.
    pub fn resolve(&self, r: ActionMapRef) -> Option<Atom> {
        if r.generation != self.generation {
            return None;
        }
        self.entries.get(r.index as usize).map(|e| e.action)
    }

    /// Look up the action for an inbound command. Tries an exact
    /// payload-discriminator match first, then falls back to a
    /// wildcard (`payload_discriminator: None`) entry for the same
    /// cluster/command.
    pub fn lookup(&self, cluster_id: u16, command_id: u8, payload_discriminator: Option<u8>) -> Option<Atom> {
        let exact = ActionKey { cluster_id, command_id, payload_discriminator };
        if let Some(&index) = self.by_key.get(&exact) {
            return Some(self.entries[index as usize].action);
        }
        if payload_discriminator.is_some() {
            let wildcard = ActionKey { cluster_id, command_id, payload_discriminator: None };
            if let Some(&index) = self.by_key.get(&wildcard) {
                return Some(self.entries[index as usize].action);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomTable;

    #[test]
    fn exact_payload_match_wins_over_wildcard() {
        let mut atoms = AtomTable::new();
        let on = atoms.intern("on").unwrap();
        let scene_1 = atoms.intern("scene_1").unwrap();
        let mut map = ActionMap::new();
        map.register(ActionKey { cluster_id: 0x0006, command_id: 0x01, payload_discriminator: None }, on);
        map.register(ActionKey { cluster_id: 0x0005, command_id: 0x05, payload_discriminator: Some(1) }, scene_1);

        assert_eq!(map.lookup(0x0005, 0x05, Some(1)), Some(scene_1));
        assert_eq!(map.lookup(0x0006, 0x01, Some(7)), Some(on));
        assert_eq!(map.lookup(0x0099, 0x00, None), None);
    }

    #[test]
    fn stale_ref_after_reload_resolves_to_none() {
        let mut atoms = AtomTable::new();
        let on = atoms.intern("on").unwrap();
        let mut map = ActionMap::new();
        let r = map.register(ActionKey { cluster_id: 6, command_id: 1, payload_discriminator: None }, on);
        assert_eq!(map.resolve(r), Some(on));
        map.reload();
        assert_eq!(map.resolve(r), None);
    }

    #[test]
    fn registering_same_key_twice_overwrites_in_place() {
        let mut atoms = AtomTable::new();
        let on = atoms.intern("on").unwrap();
        let off = atoms.intern("off").unwrap();
        let mut map = ActionMap::new();
        let key = ActionKey { cluster_id: 6, command_id: 0, payload_discriminator: None };
        let first = map.register(key, on);
        let second = map.register(key, off);
        assert_eq!(first, second);
        assert_eq!(map.lookup(6, 0, None), Some(off));
    }
}
