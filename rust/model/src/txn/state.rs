// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-entity record of one transaction: what the entity looked like before
//! and after, and how it took part (created, modified, deleted, recycled).

use std::collections::BTreeMap;

use crate::arena::Arena;
use crate::entity::{EntityFlag, EntityFlags, EntityNode};
use crate::field::{all_fields, FieldDescriptor, FieldValue};
use crate::keys::{EntityKey, EntityType};

/// Field name → dumped value.
pub type Snapshot = BTreeMap<String, FieldValue>;

/// Which snapshot was applied to the entity last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnDirection {
    /// Recorded live; nothing has been replayed yet.
    #[default]
    Default,
    Undo,
    Redo,
}

/// How an entity took part in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnType {
    Creation,
    Modification,
    Deletion,
    /// The `Removed` flag was toggled without releasing any links.
    Recycling,
}

/// Dumps every field of a node.
pub(crate) fn full_snapshot(node: &EntityNode, arena: &Arena) -> Snapshot {
    all_fields(node.kind())
        .filter_map(|f| f.read(node, arena).map(|v| (f.name.to_string(), v)))
        .collect()
}

#[derive(Debug, Clone)]
pub struct EntityTxnState {
    pub(crate) key: EntityKey,
    pub(crate) tag: String,
    pub(crate) kind: EntityType,
    pub(crate) current_state: TxnDirection,
    pub(crate) txn_type: TxnType,
    pub(crate) data_before: Snapshot,
    pub(crate) data_after: Snapshot,
}

impl EntityTxnState {
    pub(crate) fn new(key: EntityKey, node: &EntityNode, txn_type: TxnType) -> Self {
        Self {
            key,
            tag: node.tag.clone(),
            kind: node.kind(),
            current_state: TxnDirection::Default,
            txn_type,
            data_before: Snapshot::new(),
            data_after: Snapshot::new(),
        }
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> EntityType {
        self.kind
    }

    pub fn current_state(&self) -> TxnDirection {
        self.current_state
    }

    pub fn txn_type(&self) -> TxnType {
        self.txn_type
    }

    pub fn data_before(&self) -> &Snapshot {
        &self.data_before
    }

    pub fn data_after(&self) -> &Snapshot {
        &self.data_after
    }

    /// Records the value a field holds before its first change.
    ///
    /// Later calls for the same field are ignored, so the value from the
    /// start of the transaction survives. Created entities keep no "before"
    /// data.
    pub(crate) fn transact(&mut self, field: &FieldDescriptor, node: &EntityNode, arena: &Arena) {
        if self.txn_type == TxnType::Creation || self.data_before.contains_key(field.name) {
            return;
        }
        if let Some(value) = field.read(node, arena) {
            self.data_before.insert(field.name.to_string(), value);
        }
    }

    /// Merges a full dump into `data_before`, keeping values already recorded.
    pub(crate) fn record_full(&mut self, snapshot: Snapshot) {
        for (name, value) in snapshot {
            self.data_before.entry(name).or_insert(value);
        }
    }

    /// Fixes the type once the entity's final state is known.
    ///
    /// A deleted entity that is live again was only modified; a recycled
    /// entity whose other fields changed too was modified.
    pub(crate) fn promote(&mut self, removed: bool) {
        match self.txn_type {
            TxnType::Deletion if !removed => self.txn_type = TxnType::Modification,
            TxnType::Recycling if self.data_before.keys().any(|k| k != "flags") => {
                self.txn_type = TxnType::Modification
            }
            _ => {}
        }
    }

    /// Fills `data_after` from the entity's current state.
    ///
    /// Returns `false` when the entity ended up unchanged, in which case the
    /// state should be dropped.
    pub(crate) fn commit(&mut self, node: &EntityNode, arena: &Arena) -> bool {
        self.promote(node.is_removed());
        match self.txn_type {
            TxnType::Creation | TxnType::Deletion => {
                self.data_after = full_snapshot(node, arena);
                true
            }
            TxnType::Modification | TxnType::Recycling => {
                let fields = all_fields(self.kind);
                let mut after = Snapshot::new();
                for field in fields {
                    if !self.data_before.contains_key(field.name) {
                        continue;
                    }
                    if let Some(value) = field.read(node, arena) {
                        after.insert(field.name.to_string(), value);
                    }
                }
                self.data_before
                    .retain(|name, before| after.get(name) != Some(before));
                after.retain(|name, _| self.data_before.contains_key(name));
                self.data_after = after;
                !self.data_before.is_empty()
            }
        }
    }

    /// Returns the snapshot that moves the entity toward `target`.
    ///
    /// Undoing a creation loads a tombstone: the `Removed` flag set and every
    /// ownership link released.
    pub fn snapshot_for(&self, target: TxnDirection) -> Snapshot {
        match (target, self.txn_type) {
            (TxnDirection::Undo, TxnType::Creation) => {
                let mut flags = match self.data_after.get("flags") {
                    Some(FieldValue::Flags(bits)) => EntityFlags::from_bits(*bits),
                    _ => EntityFlags::empty(),
                };
                flags.insert(EntityFlag::Removed);
                let mut tombstone = Snapshot::new();
                tombstone.insert("flags".into(), FieldValue::Flags(flags.bits()));
                tombstone.insert("parents".into(), FieldValue::Refs(Vec::new()));
                tombstone.insert("children".into(), FieldValue::Refs(Vec::new()));
                tombstone
            }
            (TxnDirection::Undo, _) => self.data_before.clone(),
            (_, _) => self.data_after.clone(),
        }
    }

    /// Every tag mentioned by either snapshot, the entity's own included.
    pub(crate) fn referenced_tags(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.tag.as_str()).chain(
            self.data_before
                .values()
                .chain(self.data_after.values())
                .flat_map(FieldValue::referenced_tags),
        )
    }
}
