// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-kind field tables used by dump, load, and transaction tracking.
//!
//! Each entity kind declares a static list of [`FieldDescriptor`]s: a name, a
//! [`FieldValueType`] tag, and a pair of accessor functions. Entity-typed
//! fields are dumped as tags and resolved back through the registry on load,
//! so a snapshot never holds a live key.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::arena::{Arena, Registry};
use crate::entity::{
    CoEdgeData, Curve, EdgeData, EntityData, EntityFlags, EntityNode, LoopData, OpeningData,
    RoomRegionData, SlabData, SplitCurve, VertexData,
};
use crate::error::TransactionError;
use crate::keys::{EntityKey, EntityType};

/// How a field value relates to other entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldValueType {
    /// Plain data.
    Primitive,
    /// A single (optional) entity reference.
    Entity,
    /// A set of entity references.
    EntityCollection,
}

/// A dumped field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Flags(u8),
    Point([f64; 3]),
    Curve(Curve),
    SplitCurves(Vec<SplitCurve>),
    Ref(Option<String>),
    Refs(Vec<String>),
}

impl FieldValue {
    pub fn value_type(&self) -> FieldValueType {
        match self {
            FieldValue::Ref(_) => FieldValueType::Entity,
            FieldValue::Refs(_) => FieldValueType::EntityCollection,
            _ => FieldValueType::Primitive,
        }
    }

    /// Tags referenced by this value.
    pub fn referenced_tags(&self) -> Vec<&str> {
        match self {
            FieldValue::Ref(Some(tag)) => vec![tag.as_str()],
            FieldValue::Refs(tags) => tags.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// Reads a field from a node; entity keys are turned into tags via the arena.
pub type DumpFn = fn(&EntityNode, &Arena) -> Option<FieldValue>;

/// Writes a field onto a node; tags are resolved via the registry.
pub type LoadFn = fn(&mut EntityNode, &FieldValue, &Registry) -> Result<(), TransactionError>;

/// One entry of a field table.
pub struct FieldDescriptor {
    pub name: &'static str,
    pub value_type: FieldValueType,
    pub(crate) dump: DumpFn,
    pub(crate) load: LoadFn,
}

impl std::fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .finish()
    }
}

impl FieldDescriptor {
    /// Dumps this field from a node.
    pub(crate) fn read(&self, node: &EntityNode, arena: &Arena) -> Option<FieldValue> {
        (self.dump)(node, arena)
    }

    /// Loads a value into this field after checking its type tag.
    pub(crate) fn write(
        &self,
        node: &mut EntityNode,
        value: &FieldValue,
        registry: &Registry,
    ) -> Result<(), TransactionError> {
        self.check(&node.tag, value)?;
        (self.load)(node, value, registry)
    }

    /// Checks the value's type tag against the declared one.
    pub(crate) fn check(&self, tag: &str, value: &FieldValue) -> Result<(), TransactionError> {
        if value.value_type() != self.value_type {
            return Err(mismatch(tag, self.name, self.value_type));
        }
        Ok(())
    }

    /// Checks the value's type tag and that every referenced tag resolves.
    pub(crate) fn check_resolvable(
        &self,
        tag: &str,
        value: &FieldValue,
        registry: &Registry,
    ) -> Result<(), TransactionError> {
        self.check(tag, value)?;
        match value
            .referenced_tags()
            .into_iter()
            .find(|t| !registry.contains_key(*t))
        {
            Some(missing) => Err(TransactionError::MissingEntity(missing.to_string())),
            None => Ok(()),
        }
    }
}

/// Fields every entity has.
pub static BASE_FIELDS: [FieldDescriptor; 3] = [
    FieldDescriptor {
        name: "flags",
        value_type: FieldValueType::Primitive,
        dump: |node, _| Some(FieldValue::Flags(node.flags.bits())),
        load: |node, value, _| match value {
            FieldValue::Flags(bits) => {
                node.flags = EntityFlags::from_bits(*bits);
                Ok(())
            }
            _ => Err(mismatch(&node.tag, "flags", FieldValueType::Primitive)),
        },
    },
    FieldDescriptor {
        name: "parents",
        value_type: FieldValueType::EntityCollection,
        dump: |node, arena| Some(refs_out(arena, node.parents.iter().copied())),
        load: |node, value, registry| {
            node.parents = refs_in(value, registry, &node.tag, "parents")?;
            Ok(())
        },
    },
    FieldDescriptor {
        name: "children",
        value_type: FieldValueType::EntityCollection,
        dump: |node, arena| Some(refs_out(arena, node.children.iter().copied())),
        load: |node, value, registry| {
            node.children = refs_in(value, registry, &node.tag, "children")?;
            Ok(())
        },
    },
];

static VERTEX_FIELDS: [FieldDescriptor; 1] = [FieldDescriptor {
    name: "point",
    value_type: FieldValueType::Primitive,
    dump: |node, _| node.as_vertex().map(|v| FieldValue::Point([v.x, v.y, v.z])),
    load: |node, value, _| {
        let p = match value {
            FieldValue::Point(p) => *p,
            _ => return Err(mismatch(&node.tag, "point", FieldValueType::Primitive)),
        };
        let v = vertex_mut(&mut node.data, &node.tag)?;
        v.x = p[0];
        v.y = p[1];
        v.z = p[2];
        Ok(())
    },
}];

static EDGE_FIELDS: [FieldDescriptor; 4] = [
    FieldDescriptor {
        name: "from",
        value_type: FieldValueType::Entity,
        dump: |node, arena| node.as_edge().map(|e| ref_out(arena, Some(e.from))),
        load: |node, value, registry| {
            let key = ref_in(value, registry, &node.tag, "from")?;
            edge_mut(&mut node.data, &node.tag)?.from = key.unwrap_or_default();
            Ok(())
        },
    },
    FieldDescriptor {
        name: "to",
        value_type: FieldValueType::Entity,
        dump: |node, arena| node.as_edge().map(|e| ref_out(arena, Some(e.to))),
        load: |node, value, registry| {
            let key = ref_in(value, registry, &node.tag, "to")?;
            edge_mut(&mut node.data, &node.tag)?.to = key.unwrap_or_default();
            Ok(())
        },
    },
    FieldDescriptor {
        name: "curve",
        value_type: FieldValueType::Primitive,
        dump: |node, _| node.as_edge().map(|e| FieldValue::Curve(e.curve)),
        load: |node, value, _| {
            let curve = match value {
                FieldValue::Curve(c) => *c,
                _ => return Err(mismatch(&node.tag, "curve", FieldValueType::Primitive)),
            };
            edge_mut(&mut node.data, &node.tag)?.curve = curve;
            Ok(())
        },
    },
    FieldDescriptor {
        name: "coedge",
        value_type: FieldValueType::Entity,
        dump: |node, arena| node.as_edge().map(|e| ref_out(arena, e.coedge)),
        load: |node, value, registry| {
            let key = ref_in(value, registry, &node.tag, "coedge")?;
            edge_mut(&mut node.data, &node.tag)?.coedge = key;
            Ok(())
        },
    },
];

static COEDGE_FIELDS: [FieldDescriptor; 5] = [
    FieldDescriptor {
        name: "edge",
        value_type: FieldValueType::Entity,
        dump: |node, arena| node.as_coedge().map(|c| ref_out(arena, Some(c.edge))),
        load: |node, value, registry| {
            let key = ref_in(value, registry, &node.tag, "edge")?;
            coedge_mut(&mut node.data, &node.tag)?.edge = key.unwrap_or_default();
            Ok(())
        },
    },
    FieldDescriptor {
        name: "reversed",
        value_type: FieldValueType::Primitive,
        dump: |node, _| node.as_coedge().map(|c| FieldValue::Bool(c.reversed)),
        load: |node, value, _| {
            let reversed = match value {
                FieldValue::Bool(b) => *b,
                _ => return Err(mismatch(&node.tag, "reversed", FieldValueType::Primitive)),
            };
            coedge_mut(&mut node.data, &node.tag)?.reversed = reversed;
            Ok(())
        },
    },
    FieldDescriptor {
        name: "prev",
        value_type: FieldValueType::Entity,
        dump: |node, arena| node.as_coedge().map(|c| ref_out(arena, c.prev)),
        load: |node, value, registry| {
            let key = ref_in(value, registry, &node.tag, "prev")?;
            coedge_mut(&mut node.data, &node.tag)?.prev = key;
            Ok(())
        },
    },
    FieldDescriptor {
        name: "next",
        value_type: FieldValueType::Entity,
        dump: |node, arena| node.as_coedge().map(|c| ref_out(arena, c.next)),
        load: |node, value, registry| {
            let key = ref_in(value, registry, &node.tag, "next")?;
            coedge_mut(&mut node.data, &node.tag)?.next = key;
            Ok(())
        },
    },
    FieldDescriptor {
        name: "partner",
        value_type: FieldValueType::Entity,
        dump: |node, arena| node.as_coedge().map(|c| ref_out(arena, c.partner)),
        load: |node, value, registry| {
            let key = ref_in(value, registry, &node.tag, "partner")?;
            coedge_mut(&mut node.data, &node.tag)?.partner = key;
            Ok(())
        },
    },
];

static LOOP_FIELDS: [FieldDescriptor; 1] = [FieldDescriptor {
    name: "root",
    value_type: FieldValueType::Entity,
    dump: |node, arena| node.as_loop().map(|l| ref_out(arena, l.root)),
    load: |node, value, registry| {
        let key = ref_in(value, registry, &node.tag, "root")?;
        let lp = loop_mut(&mut node.data, &node.tag)?;
        lp.root = key;
        lp.revision += 1;
        Ok(())
    },
}];

static OPENING_FIELDS: [FieldDescriptor; 1] = [FieldDescriptor {
    name: "profile",
    value_type: FieldValueType::Entity,
    dump: |node, arena| node.as_opening().map(|o| ref_out(arena, o.profile)),
    load: |node, value, registry| {
        let key = ref_in(value, registry, &node.tag, "profile")?;
        opening_mut(&mut node.data, &node.tag)?.profile = key;
        Ok(())
    },
}];

static SLAB_FIELDS: [FieldDescriptor; 4] = [
    FieldDescriptor {
        name: "base_profile",
        value_type: FieldValueType::Entity,
        dump: |node, arena| node.as_slab().map(|s| ref_out(arena, s.base_profile)),
        load: |node, value, registry| {
            let key = ref_in(value, registry, &node.tag, "base_profile")?;
            let slab = slab_mut(&mut node.data, &node.tag)?;
            slab.base_profile = key;
            slab.faces = None;
            Ok(())
        },
    },
    FieldDescriptor {
        name: "height",
        value_type: FieldValueType::Primitive,
        dump: |node, _| node.as_slab().map(|s| FieldValue::Number(s.height)),
        load: |node, value, _| {
            let height = number_in(value, &node.tag, "height")?;
            let slab = slab_mut(&mut node.data, &node.tag)?;
            slab.height = height;
            slab.faces = None;
            Ok(())
        },
    },
    FieldDescriptor {
        name: "thickness",
        value_type: FieldValueType::Primitive,
        dump: |node, _| node.as_slab().map(|s| FieldValue::Number(s.thickness)),
        load: |node, value, _| {
            let thickness = number_in(value, &node.tag, "thickness")?;
            let slab = slab_mut(&mut node.data, &node.tag)?;
            slab.thickness = thickness;
            slab.faces = None;
            Ok(())
        },
    },
    FieldDescriptor {
        name: "openings",
        value_type: FieldValueType::EntityCollection,
        dump: |node, arena| {
            node.as_slab()
                .map(|s| refs_out(arena, s.openings.iter().copied()))
        },
        load: |node, value, registry| {
            let openings = refs_in(value, registry, &node.tag, "openings")?;
            let slab = slab_mut(&mut node.data, &node.tag)?;
            slab.openings = openings;
            slab.faces = None;
            Ok(())
        },
    },
];

static ROOM_FIELDS: [FieldDescriptor; 2] = [
    FieldDescriptor {
        name: "co_edge_path",
        value_type: FieldValueType::Entity,
        dump: |node, arena| node.as_room().map(|r| ref_out(arena, r.co_edge_path)),
        load: |node, value, registry| {
            let key = ref_in(value, registry, &node.tag, "co_edge_path")?;
            room_mut(&mut node.data, &node.tag)?.co_edge_path = key;
            Ok(())
        },
    },
    FieldDescriptor {
        name: "split_curves",
        value_type: FieldValueType::Primitive,
        dump: |node, _| {
            node.as_room()
                .map(|r| FieldValue::SplitCurves(r.split_curves.clone()))
        },
        load: |node, value, _| {
            let curves = match value {
                FieldValue::SplitCurves(c) => c.clone(),
                _ => return Err(mismatch(&node.tag, "split_curves", FieldValueType::Primitive)),
            };
            room_mut(&mut node.data, &node.tag)?.split_curves = curves;
            Ok(())
        },
    },
];

/// Returns the kind-specific field table (base fields excluded).
pub fn fields_of(kind: EntityType) -> &'static [FieldDescriptor] {
    match kind {
        EntityType::Vertex => &VERTEX_FIELDS,
        EntityType::Edge => &EDGE_FIELDS,
        EntityType::CoEdge => &COEDGE_FIELDS,
        EntityType::Loop => &LOOP_FIELDS,
        EntityType::Opening => &OPENING_FIELDS,
        EntityType::Slab => &SLAB_FIELDS,
        EntityType::RoomRegion => &ROOM_FIELDS,
    }
}

/// Iterates over base and kind-specific fields.
pub fn all_fields(kind: EntityType) -> impl Iterator<Item = &'static FieldDescriptor> {
    BASE_FIELDS.iter().chain(fields_of(kind).iter())
}

/// Looks up a field descriptor by name.
pub fn field(kind: EntityType, name: &str) -> Option<&'static FieldDescriptor> {
    all_fields(kind).find(|f| f.name == name)
}

// --- Value conversion helpers ---

fn mismatch(tag: &str, field: &str, expected: FieldValueType) -> TransactionError {
    TransactionError::FieldTypeMismatch {
        tag: tag.to_string(),
        field: field.to_string(),
        expected,
    }
}

fn ref_out(arena: &Arena, key: Option<EntityKey>) -> FieldValue {
    FieldValue::Ref(key.and_then(|k| arena.get(k)).map(|n| n.tag.clone()))
}

fn refs_out(arena: &Arena, keys: impl Iterator<Item = EntityKey>) -> FieldValue {
    FieldValue::Refs(
        keys.filter_map(|k| arena.get(k))
            .map(|n| n.tag.clone())
            .collect(),
    )
}

fn ref_in(
    value: &FieldValue,
    registry: &Registry,
    tag: &str,
    field: &str,
) -> Result<Option<EntityKey>, TransactionError> {
    match value {
        FieldValue::Ref(None) => Ok(None),
        FieldValue::Ref(Some(target)) => registry
            .get(target)
            .copied()
            .map(Some)
            .ok_or_else(|| TransactionError::MissingEntity(target.clone())),
        _ => Err(mismatch(tag, field, FieldValueType::Entity)),
    }
}

fn refs_in(
    value: &FieldValue,
    registry: &Registry,
    tag: &str,
    field: &str,
) -> Result<BTreeSet<EntityKey>, TransactionError> {
    match value {
        FieldValue::Refs(targets) => targets
            .iter()
            .map(|t| {
                registry
                    .get(t)
                    .copied()
                    .ok_or_else(|| TransactionError::MissingEntity(t.clone()))
            })
            .collect(),
        _ => Err(mismatch(tag, field, FieldValueType::EntityCollection)),
    }
}

fn number_in(value: &FieldValue, tag: &str, field: &str) -> Result<f64, TransactionError> {
    match value {
        FieldValue::Number(n) => Ok(*n),
        _ => Err(mismatch(tag, field, FieldValueType::Primitive)),
    }
}

fn kind_mismatch(tag: &str, expected: EntityType, data: &EntityData) -> TransactionError {
    TransactionError::KindMismatch {
        tag: tag.to_string(),
        expected,
        found: data.kind(),
    }
}

fn vertex_mut<'a>(data: &'a mut EntityData, tag: &str) -> Result<&'a mut VertexData, TransactionError> {
    match data {
        EntityData::Vertex(v) => Ok(v),
        other => Err(kind_mismatch(tag, EntityType::Vertex, other)),
    }
}

fn edge_mut<'a>(data: &'a mut EntityData, tag: &str) -> Result<&'a mut EdgeData, TransactionError> {
    match data {
        EntityData::Edge(e) => Ok(e),
        other => Err(kind_mismatch(tag, EntityType::Edge, other)),
    }
}

fn coedge_mut<'a>(data: &'a mut EntityData, tag: &str) -> Result<&'a mut CoEdgeData, TransactionError> {
    match data {
        EntityData::CoEdge(c) => Ok(c),
        other => Err(kind_mismatch(tag, EntityType::CoEdge, other)),
    }
}

fn loop_mut<'a>(data: &'a mut EntityData, tag: &str) -> Result<&'a mut LoopData, TransactionError> {
    match data {
        EntityData::Loop(l) => Ok(l),
        other => Err(kind_mismatch(tag, EntityType::Loop, other)),
    }
}

fn opening_mut<'a>(data: &'a mut EntityData, tag: &str) -> Result<&'a mut OpeningData, TransactionError> {
    match data {
        EntityData::Opening(o) => Ok(o),
        other => Err(kind_mismatch(tag, EntityType::Opening, other)),
    }
}

fn slab_mut<'a>(data: &'a mut EntityData, tag: &str) -> Result<&'a mut SlabData, TransactionError> {
    match data {
        EntityData::Slab(s) => Ok(s),
        other => Err(kind_mismatch(tag, EntityType::Slab, other)),
    }
}

fn room_mut<'a>(data: &'a mut EntityData, tag: &str) -> Result<&'a mut RoomRegionData, TransactionError> {
    match data {
        EntityData::RoomRegion(r) => Ok(r),
        other => Err(kind_mismatch(tag, EntityType::RoomRegion, other)),
    }
}
