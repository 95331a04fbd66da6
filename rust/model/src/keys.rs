// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entity keys and type discriminants for arena-based storage.
//!
//! Every entity in a [`Document`](crate::Document) is addressed by an
//! [`EntityKey`] created by `slotmap::SlotMap`. Keys are generational, so a
//! key kept after its entity has been purged never aliases a newer entity.
//! Soft-deleted entities keep their key until they are purged, which is what
//! lets undo/redo bring an entity back under the same key.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Key for any entity stored in a document.
    pub struct EntityKey;
}

/// Discriminant for entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Vertex = 0,
    Edge = 1,
    CoEdge = 2,
    Loop = 3,
    Opening = 4,
    Slab = 5,
    RoomRegion = 6,
}

impl EntityType {
    /// Returns the type name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Vertex => "Vertex",
            EntityType::Edge => "Edge",
            EntityType::CoEdge => "CoEdge",
            EntityType::Loop => "Loop",
            EntityType::Opening => "Opening",
            EntityType::Slab => "Slab",
            EntityType::RoomRegion => "RoomRegion",
        }
    }

    /// Short prefix used when generating entity tags.
    pub(crate) fn tag_prefix(&self) -> &'static str {
        match self {
            EntityType::Vertex => "v",
            EntityType::Edge => "e",
            EntityType::CoEdge => "ce",
            EntityType::Loop => "lp",
            EntityType::Opening => "op",
            EntityType::Slab => "slab",
            EntityType::RoomRegion => "room",
        }
    }

    /// Returns `true` for the composite boundary entities that derive faces.
    pub fn is_composite(&self) -> bool {
        matches!(self, EntityType::Slab | EntityType::RoomRegion)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
