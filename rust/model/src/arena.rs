// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Arena-based storage for the entity graph.
//!
//! The [`Document`] is the central owner of all entities. Every entity lives
//! in one slot map with stable, generational keys, and a registry maps each
//! entity's string tag back to its key. Ownership links (parents/children)
//! and topological links (co-edge rings, partners) are stored as keys, so
//! the graph can contain cycles without any reference-counting.
//!
//! ## Soft deletion
//!
//! Destroying an entity only sets its `Removed` flag and releases its links.
//! The slot is kept until no transaction inside the undo/redo window refers
//! to it, at which point it is purged. Undo therefore brings deleted
//! entities back under their original key and tag.

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::config::ModelConfig;
use crate::entity::{
    CoEdgeData, EdgeData, EntityData, EntityNode, LoopData, OpeningData, RoomRegionData, SlabData,
    VertexData,
};
use crate::error::GraphError;
use crate::keys::{EntityKey, EntityType};
use crate::signal::Signals;
use crate::txn::TxnManager;

/// Storage of all entity nodes.
pub(crate) type Arena = SlotMap<EntityKey, EntityNode>;

/// Tag → key lookup table.
pub(crate) type Registry = FxHashMap<String, EntityKey>;

/// The entity graph: arena, tag registry, transaction history, and signals.
///
/// # Example
///
/// ```
/// use roomgraph_model::Document;
///
/// let mut doc = Document::new();
/// let outline = doc
///     .loop_from_points(&[[0.0, 0.0, 0.0], [4.0, 0.0, 0.0], [4.0, 3.0, 0.0]])
///     .unwrap();
///
/// assert_eq!(doc.loop_len(outline).unwrap(), 3);
/// assert!(doc.verify(outline, false));
/// ```
#[derive(Debug)]
pub struct Document {
    pub(crate) entities: Arena,
    pub(crate) registry: Registry,
    next_serial: u64,
    pub(crate) config: ModelConfig,
    pub(crate) txn: TxnManager,
    pub(crate) signals: Signals,
}

impl Document {
    /// Creates a new, empty document with default configuration.
    pub fn new() -> Self {
        Self::with_config(ModelConfig::default())
    }

    /// Creates a new, empty document.
    pub fn with_config(config: ModelConfig) -> Self {
        Self {
            entities: SlotMap::with_key(),
            registry: FxHashMap::default(),
            next_serial: 1,
            config,
            txn: TxnManager::default(),
            signals: Signals::default(),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn signals_mut(&mut self) -> &mut Signals {
        &mut self.signals
    }

    // --- Lookup ---

    /// Returns the node for a key, or `None` if it was purged or never existed.
    pub fn node(&self, key: EntityKey) -> Option<&EntityNode> {
        self.entities.get(key)
    }

    /// Returns the node for a key, or `GraphError::NotFound`.
    pub fn get(&self, key: EntityKey) -> Result<&EntityNode, GraphError> {
        self.entities.get(key).ok_or(GraphError::NotFound(key))
    }

    pub(crate) fn get_mut(&mut self, key: EntityKey) -> Result<&mut EntityNode, GraphError> {
        self.entities.get_mut(key).ok_or(GraphError::NotFound(key))
    }

    /// Returns the node if it exists and has the expected kind.
    pub fn expect_kind(&self, key: EntityKey, kind: EntityType) -> Result<&EntityNode, GraphError> {
        let node = self.get(key)?;
        if node.kind() != kind {
            return Err(GraphError::WrongKind {
                tag: node.tag.clone(),
                expected: kind,
                found: node.kind(),
            });
        }
        Ok(node)
    }

    /// Like [`expect_kind`](Self::expect_kind), but also rejects removed entities.
    pub(crate) fn expect_live(&self, key: EntityKey, kind: EntityType) -> Result<&EntityNode, GraphError> {
        let node = self.expect_kind(key, kind)?;
        if node.is_removed() {
            return Err(GraphError::Removed(node.tag.clone()));
        }
        Ok(node)
    }

    /// Returns the tag of an entity.
    pub fn tag(&self, key: EntityKey) -> Option<&str> {
        self.entities.get(key).map(|n| n.tag.as_str())
    }

    /// Tag used in diagnostics; falls back to the debug form of the key.
    pub fn describe(&self, key: EntityKey) -> String {
        self.tag(key)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{key:?}"))
    }

    /// Resolves a tag through the registry.
    pub fn key_by_tag(&self, tag: &str) -> Option<EntityKey> {
        self.registry.get(tag).copied()
    }

    /// Returns `true` if the key references a stored entity (removed or not).
    pub fn contains(&self, key: EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    /// Returns `true` if the key references a stored entity that is not removed.
    pub fn is_live(&self, key: EntityKey) -> bool {
        self.entities.get(key).is_some_and(|n| !n.is_removed())
    }

    /// Returns the number of stored entities, removed ones included.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Returns the number of live entities of a kind.
    pub fn count_of(&self, kind: EntityType) -> usize {
        self.entities
            .values()
            .filter(|n| n.kind() == kind && !n.is_removed())
            .count()
    }

    /// Iterates over all live entities.
    pub fn iter(&self) -> impl Iterator<Item = (EntityKey, &EntityNode)> {
        self.entities.iter().filter(|(_, n)| !n.is_removed())
    }

    /// Returns live entities without parents (the tops of ownership trees).
    pub fn roots(&self) -> Vec<EntityKey> {
        self.iter()
            .filter(|(_, n)| n.parents.is_empty())
            .map(|(k, _)| k)
            .collect()
    }

    // --- Typed access ---

    pub fn vertex(&self, key: EntityKey) -> Result<&VertexData, GraphError> {
        self.expect_kind(key, EntityType::Vertex)?
            .as_vertex()
            .ok_or(GraphError::NotFound(key))
    }

    pub fn edge(&self, key: EntityKey) -> Result<&EdgeData, GraphError> {
        self.expect_kind(key, EntityType::Edge)?
            .as_edge()
            .ok_or(GraphError::NotFound(key))
    }

    pub fn coedge(&self, key: EntityKey) -> Result<&CoEdgeData, GraphError> {
        self.expect_kind(key, EntityType::CoEdge)?
            .as_coedge()
            .ok_or(GraphError::NotFound(key))
    }

    pub fn loop_data(&self, key: EntityKey) -> Result<&LoopData, GraphError> {
        self.expect_kind(key, EntityType::Loop)?
            .as_loop()
            .ok_or(GraphError::NotFound(key))
    }

    pub fn opening(&self, key: EntityKey) -> Result<&OpeningData, GraphError> {
        self.expect_kind(key, EntityType::Opening)?
            .as_opening()
            .ok_or(GraphError::NotFound(key))
    }

    pub fn slab(&self, key: EntityKey) -> Result<&SlabData, GraphError> {
        self.expect_kind(key, EntityType::Slab)?
            .as_slab()
            .ok_or(GraphError::NotFound(key))
    }

    pub fn room(&self, key: EntityKey) -> Result<&RoomRegionData, GraphError> {
        self.expect_kind(key, EntityType::RoomRegion)?
            .as_room()
            .ok_or(GraphError::NotFound(key))
    }

    // --- Tracked writes ---
    //
    // Every write to a dumped field goes through one of these so the open
    // transaction, if any, sees the value before it changes.

    pub(crate) fn update_node<R>(
        &mut self,
        key: EntityKey,
        field: &'static str,
        f: impl FnOnce(&mut EntityNode) -> R,
    ) -> Result<R, GraphError> {
        self.get(key)?;
        self.touch(key, field);
        Ok(f(self.get_mut(key)?))
    }

    fn update_data<R>(
        &mut self,
        key: EntityKey,
        kind: EntityType,
        field: &'static str,
        f: impl FnOnce(&mut EntityData) -> Option<R>,
    ) -> Result<R, GraphError> {
        self.expect_kind(key, kind)?;
        self.touch(key, field);
        f(&mut self.get_mut(key)?.data).ok_or(GraphError::NotFound(key))
    }

    pub(crate) fn update_vertex<R>(
        &mut self,
        key: EntityKey,
        field: &'static str,
        f: impl FnOnce(&mut VertexData) -> R,
    ) -> Result<R, GraphError> {
        self.update_data(key, EntityType::Vertex, field, |data| match data {
            EntityData::Vertex(v) => Some(f(v)),
            _ => None,
        })
    }

    pub(crate) fn update_edge<R>(
        &mut self,
        key: EntityKey,
        field: &'static str,
        f: impl FnOnce(&mut EdgeData) -> R,
    ) -> Result<R, GraphError> {
        self.update_data(key, EntityType::Edge, field, |data| match data {
            EntityData::Edge(e) => Some(f(e)),
            _ => None,
        })
    }

    pub(crate) fn update_coedge<R>(
        &mut self,
        key: EntityKey,
        field: &'static str,
        f: impl FnOnce(&mut CoEdgeData) -> R,
    ) -> Result<R, GraphError> {
        self.update_data(key, EntityType::CoEdge, field, |data| match data {
            EntityData::CoEdge(c) => Some(f(c)),
            _ => None,
        })
    }

    pub(crate) fn update_loop<R>(
        &mut self,
        key: EntityKey,
        field: &'static str,
        f: impl FnOnce(&mut LoopData) -> R,
    ) -> Result<R, GraphError> {
        self.update_data(key, EntityType::Loop, field, |data| match data {
            EntityData::Loop(l) => Some(f(l)),
            _ => None,
        })
    }

    pub(crate) fn update_opening<R>(
        &mut self,
        key: EntityKey,
        field: &'static str,
        f: impl FnOnce(&mut OpeningData) -> R,
    ) -> Result<R, GraphError> {
        self.update_data(key, EntityType::Opening, field, |data| match data {
            EntityData::Opening(o) => Some(f(o)),
            _ => None,
        })
    }

    pub(crate) fn update_slab<R>(
        &mut self,
        key: EntityKey,
        field: &'static str,
        f: impl FnOnce(&mut SlabData) -> R,
    ) -> Result<R, GraphError> {
        self.update_data(key, EntityType::Slab, field, |data| match data {
            EntityData::Slab(s) => {
                s.faces = None;
                Some(f(s))
            }
            _ => None,
        })
    }

    pub(crate) fn update_room<R>(
        &mut self,
        key: EntityKey,
        field: &'static str,
        f: impl FnOnce(&mut RoomRegionData) -> R,
    ) -> Result<R, GraphError> {
        self.update_data(key, EntityType::RoomRegion, field, |data| match data {
            EntityData::RoomRegion(r) => Some(f(r)),
            _ => None,
        })
    }

    // --- Insertion ---

    /// Inserts a detached entity under a freshly generated tag.
    ///
    /// Inside a transaction the entity is recorded as a creation.
    pub(crate) fn insert_entity(&mut self, data: EntityData) -> EntityKey {
        let tag = self.allocate_tag(data.kind());
        self.insert_with_tag(tag, data)
    }

    /// Inserts a detached entity under a given tag. The tag must be unused.
    pub(crate) fn insert_with_tag(&mut self, tag: String, data: EntityData) -> EntityKey {
        let key = self.entities.insert(EntityNode::new(tag.clone(), data));
        self.registry.insert(tag, key);
        self.record_creation(key);
        key
    }

    /// Generates a tag that is not yet registered.
    pub(crate) fn allocate_tag(&mut self, kind: EntityType) -> String {
        loop {
            let tag = format!("{}{}", kind.tag_prefix(), self.next_serial);
            self.next_serial += 1;
            if !self.registry.contains_key(&tag) {
                return tag;
            }
        }
    }

    /// Permanently drops an entity slot and its registry entry.
    pub(crate) fn purge(&mut self, key: EntityKey) -> bool {
        match self.entities.remove(key) {
            Some(node) => {
                if self.registry.get(&node.tag) == Some(&key) {
                    self.registry.remove(&node.tag);
                }
                true
            }
            None => false,
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
