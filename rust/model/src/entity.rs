// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entity nodes: identity, flags, ownership links, and per-kind payloads.
//!
//! Every entity in the document is an [`EntityNode`]. The node carries what
//! all entities share (tag, flags, parent and child sets) and an
//! [`EntityData`] payload holding the kind-specific fields. References between
//! entities are [`EntityKey`]s into the same arena, never owning pointers.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::geometry::SlabFaces;
use crate::keys::{EntityKey, EntityType};

/// A boolean flag that can be set on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityFlag {
    Hidden,
    Locked,
    Freezed,
    Removed,
    Unselectable,
}

impl EntityFlag {
    pub const ALL: [EntityFlag; 5] = [
        EntityFlag::Hidden,
        EntityFlag::Locked,
        EntityFlag::Freezed,
        EntityFlag::Removed,
        EntityFlag::Unselectable,
    ];

    fn bit(self) -> u8 {
        match self {
            EntityFlag::Hidden => 1 << 0,
            EntityFlag::Locked => 1 << 1,
            EntityFlag::Freezed => 1 << 2,
            EntityFlag::Removed => 1 << 3,
            EntityFlag::Unselectable => 1 << 4,
        }
    }
}

/// Bit set of [`EntityFlag`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityFlags(u8);

impl EntityFlags {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, flag: EntityFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Sets the flag. Returns `true` if the set changed.
    pub fn insert(&mut self, flag: EntityFlag) -> bool {
        let before = self.0;
        self.0 |= flag.bit();
        before != self.0
    }

    /// Clears the flag. Returns `true` if the set changed.
    pub fn remove(&mut self, flag: EntityFlag) -> bool {
        let before = self.0;
        self.0 &= !flag.bit();
        before != self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityFlag> + '_ {
        EntityFlag::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

/// Geometry descriptor carried by an edge.
///
/// Only the descriptor is stored; arc tessellation is outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Curve {
    Line,
    Arc { center: [f64; 2], clockwise: bool },
}

impl Default for Curve {
    fn default() -> Self {
        Curve::Line
    }
}

/// A straight split curve cached on a room region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitCurve {
    pub start: [f64; 2],
    pub end: [f64; 2],
}

/// Data stored for a vertex: a point in 3D space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexData {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Data stored for an edge: two vertex children, a curve, and the primary
/// co-edge back-reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeData {
    pub from: EntityKey,
    pub to: EntityKey,
    pub curve: Curve,
    pub coedge: Option<EntityKey>,
}

/// Data stored for a co-edge: a directed use of an edge inside a loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoEdgeData {
    pub edge: EntityKey,
    /// `true` when the co-edge runs from the edge's `to` vertex to its `from`.
    pub reversed: bool,
    pub prev: Option<EntityKey>,
    pub next: Option<EntityKey>,
    pub partner: Option<EntityKey>,
}

/// Data stored for a loop: the root of its co-edge ring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopData {
    pub root: Option<EntityKey>,
    /// Bumped whenever the loop's geometry may have changed.
    pub revision: u64,
}

/// Data stored for an opening: a hole bounded by its own profile loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpeningData {
    pub profile: Option<EntityKey>,
}

/// Data stored for a slab.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlabData {
    pub base_profile: Option<EntityKey>,
    /// Elevation of the bottom face.
    pub height: f64,
    pub thickness: f64,
    pub openings: BTreeSet<EntityKey>,
    /// Derived faces; `None` when they must be recomputed.
    pub(crate) faces: Option<SlabFaces>,
}

/// Data stored for a room region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomRegionData {
    pub co_edge_path: Option<EntityKey>,
    pub split_curves: Vec<SplitCurve>,
}

/// Kind-specific payload of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityData {
    Vertex(VertexData),
    Edge(EdgeData),
    CoEdge(CoEdgeData),
    Loop(LoopData),
    Opening(OpeningData),
    Slab(SlabData),
    RoomRegion(RoomRegionData),
}

impl EntityData {
    /// Returns an empty payload for a kind, used when loading from a dump.
    pub fn empty(kind: EntityType) -> Self {
        match kind {
            EntityType::Vertex => EntityData::Vertex(VertexData::default()),
            EntityType::Edge => EntityData::Edge(EdgeData::default()),
            EntityType::CoEdge => EntityData::CoEdge(CoEdgeData::default()),
            EntityType::Loop => EntityData::Loop(LoopData::default()),
            EntityType::Opening => EntityData::Opening(OpeningData::default()),
            EntityType::Slab => EntityData::Slab(SlabData::default()),
            EntityType::RoomRegion => EntityData::RoomRegion(RoomRegionData::default()),
        }
    }

    pub fn kind(&self) -> EntityType {
        match self {
            EntityData::Vertex(_) => EntityType::Vertex,
            EntityData::Edge(_) => EntityType::Edge,
            EntityData::CoEdge(_) => EntityType::CoEdge,
            EntityData::Loop(_) => EntityType::Loop,
            EntityData::Opening(_) => EntityType::Opening,
            EntityData::Slab(_) => EntityType::Slab,
            EntityData::RoomRegion(_) => EntityType::RoomRegion,
        }
    }

    /// Returns every entity key the payload references (children and links).
    pub fn references(&self) -> Vec<EntityKey> {
        match self {
            EntityData::Vertex(_) => Vec::new(),
            EntityData::Edge(e) => {
                let mut refs = vec![e.from, e.to];
                refs.extend(e.coedge);
                refs
            }
            EntityData::CoEdge(c) => {
                let mut refs = vec![c.edge];
                refs.extend(c.prev);
                refs.extend(c.next);
                refs.extend(c.partner);
                refs
            }
            EntityData::Loop(l) => l.root.into_iter().collect(),
            EntityData::Opening(o) => o.profile.into_iter().collect(),
            EntityData::Slab(s) => {
                let mut refs: Vec<EntityKey> = s.base_profile.into_iter().collect();
                refs.extend(s.openings.iter().copied());
                refs
            }
            EntityData::RoomRegion(r) => r.co_edge_path.into_iter().collect(),
        }
    }
}

/// An entity stored in the document arena.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityNode {
    pub(crate) tag: String,
    pub(crate) flags: EntityFlags,
    pub(crate) parents: BTreeSet<EntityKey>,
    pub(crate) children: BTreeSet<EntityKey>,
    pub(crate) data: EntityData,
}

impl EntityNode {
    pub(crate) fn new(tag: String, data: EntityData) -> Self {
        Self {
            tag,
            flags: EntityFlags::empty(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            data,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> EntityType {
        self.data.kind()
    }

    pub fn flags(&self) -> EntityFlags {
        self.flags
    }

    pub fn has_flag(&self, flag: EntityFlag) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_removed(&self) -> bool {
        self.flags.contains(EntityFlag::Removed)
    }

    pub fn parents(&self) -> &BTreeSet<EntityKey> {
        &self.parents
    }

    pub fn children(&self) -> &BTreeSet<EntityKey> {
        &self.children
    }

    /// Returns the only parent, or `None` when there are zero or several.
    pub fn unique_parent(&self) -> Option<EntityKey> {
        if self.parents.len() == 1 {
            self.parents.iter().next().copied()
        } else {
            None
        }
    }

    pub fn data(&self) -> &EntityData {
        &self.data
    }

    pub fn as_vertex(&self) -> Option<&VertexData> {
        match &self.data {
            EntityData::Vertex(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_edge(&self) -> Option<&EdgeData> {
        match &self.data {
            EntityData::Edge(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_coedge(&self) -> Option<&CoEdgeData> {
        match &self.data {
            EntityData::CoEdge(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_loop(&self) -> Option<&LoopData> {
        match &self.data {
            EntityData::Loop(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_opening(&self) -> Option<&OpeningData> {
        match &self.data {
            EntityData::Opening(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_slab(&self) -> Option<&SlabData> {
        match &self.data {
            EntityData::Slab(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_room(&self) -> Option<&RoomRegionData> {
        match &self.data {
            EntityData::RoomRegion(r) => Some(r),
            _ => None,
        }
    }
}

/// Returns `false` for flags an entity kind refuses.
///
/// Slabs define the floor the rest of the model stands on and cannot be
/// hidden.
pub fn supports_flag(kind: EntityType, flag: EntityFlag) -> bool {
    !matches!((kind, flag), (EntityType::Slab, EntityFlag::Hidden))
}
