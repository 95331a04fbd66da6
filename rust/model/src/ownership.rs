// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parent/child ownership, soft deletion, and flags.
//!
//! Ownership is kept symmetric: `add_child` and `remove_child` always update
//! both the parent's `children` and the child's `parents`. A child whose
//! last parent lets go is destroyed, which in turn releases its own
//! children.

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::arena::Document;
use crate::entity::{supports_flag, EntityData, EntityFlag};
use crate::error::{GraphError, Result, ValidationError};
use crate::keys::EntityKey;

impl Document {
    /// Links `child` under `parent`.
    ///
    /// A removed child is revived by the link.
    pub fn add_child(&mut self, parent: EntityKey, child: EntityKey) -> std::result::Result<(), GraphError> {
        if parent == child {
            return Err(GraphError::SelfOwnership(self.describe(parent)));
        }
        let parent_node = self.get(parent)?;
        if parent_node.is_removed() {
            return Err(GraphError::Removed(parent_node.tag.clone()));
        }
        if parent_node.children.contains(&child) {
            return Err(GraphError::AlreadyChild {
                parent: parent_node.tag.clone(),
                child: self.describe(child),
            });
        }
        let revive = self.get(child)?.is_removed();

        self.update_node(parent, "children", |n| n.children.insert(child))?;
        self.update_node(child, "parents", |n| n.parents.insert(parent))?;
        if revive {
            self.update_node(child, "flags", |n| n.flags.remove(EntityFlag::Removed))?;
            debug!(tag = %self.describe(child), "removed entity reattached");
        }
        Ok(())
    }

    /// Unlinks `child` from `parent`; a child left without parents is destroyed.
    pub fn remove_child(&mut self, parent: EntityKey, child: EntityKey) -> std::result::Result<(), GraphError> {
        let parent_node = self.get(parent)?;
        if !parent_node.children.contains(&child) {
            return Err(GraphError::NotChild {
                parent: parent_node.tag.clone(),
                child: self.describe(child),
            });
        }
        self.update_node(parent, "children", |n| n.children.remove(&child))?;
        let orphaned = self.update_node(child, "parents", |n| {
            n.parents.remove(&parent);
            n.parents.is_empty()
        })?;
        if orphaned {
            self.destroy(child);
        }
        Ok(())
    }

    /// Detaches an entity from all its parents and destroys it.
    pub fn delete(&mut self, key: EntityKey) -> std::result::Result<(), GraphError> {
        let parents: Vec<EntityKey> = self.get(key)?.parents.iter().copied().collect();
        if parents.is_empty() {
            self.destroy(key);
            return Ok(());
        }
        for parent in parents {
            self.remove_child(parent, key)?;
        }
        Ok(())
    }

    /// Soft-deletes an entity and, transitively, every child it was the last
    /// owner of. Slots stay allocated so undo can bring them back.
    pub(crate) fn destroy(&mut self, key: EntityKey) {
        let mut pending = vec![key];
        while let Some(key) = pending.pop() {
            let Some(node) = self.entities.get(key) else {
                continue;
            };
            if node.is_removed() {
                continue;
            }
            let children: Vec<EntityKey> = node.children.iter().copied().collect();

            self.record_deletion(key);
            if let Err(err) = self.release_coedge(key) {
                warn!(tag = %self.describe(key), %err, "co-edge handoff failed");
            }
            if self
                .update_node(key, "flags", |n| n.flags.insert(EntityFlag::Removed))
                .is_err()
            {
                continue;
            }
            debug!(tag = %self.describe(key), "entity removed");

            for child in children {
                if let Err(err) = self.update_node(key, "children", |n| n.children.remove(&child)) {
                    warn!(tag = %self.describe(key), %err, "child link not released");
                    continue;
                }
                let orphaned = self
                    .update_node(child, "parents", |n| {
                        n.parents.remove(&key);
                        n.parents.is_empty()
                    })
                    .unwrap_or(false);
                if orphaned {
                    pending.push(child);
                }
            }
            self.invalidate_geometry(key);
        }
    }

    /// Hands a dying co-edge's shared edge over to the co-edge that stays.
    ///
    /// The partner link is cleared on both sides, and if the edge named the
    /// co-edge as its primary, the partner or another live co-edge parent
    /// takes over. Non-co-edges are left alone.
    fn release_coedge(&mut self, key: EntityKey) -> std::result::Result<(), GraphError> {
        let Some(data) = self.entities.get(key).and_then(|n| n.as_coedge()) else {
            return Ok(());
        };
        let (edge, partner) = (data.edge, data.partner);
        self.clear_partner(key)?;

        let Some(edge_node) = self.entities.get(edge) else {
            return Ok(());
        };
        if edge_node.as_edge().and_then(|e| e.coedge) != Some(key) {
            return Ok(());
        }
        let heir = partner.filter(|&p| self.is_live(p)).or_else(|| {
            edge_node
                .parents
                .iter()
                .copied()
                .find(|&p| p != key && self.is_live(p))
        });
        self.update_edge(edge, "coedge", |e| e.coedge = heir)?;
        debug!(
            coedge = %self.describe(key),
            edge = %self.describe(edge),
            "shared edge handed over"
        );
        Ok(())
    }

    // --- Flags ---

    /// Sets a flag, optionally on every descendant as well.
    ///
    /// Fails with [`ValidationError::UnsupportedFlag`] when the entity's kind
    /// refuses the flag. During propagation, descendants that refuse it are
    /// skipped.
    pub fn set_flag_on(&mut self, key: EntityKey, flag: EntityFlag, propagate: bool) -> Result<()> {
        self.set_flag(key, flag, true, propagate)
    }

    /// Clears a flag, optionally on every descendant as well.
    pub fn set_flag_off(&mut self, key: EntityKey, flag: EntityFlag, propagate: bool) -> Result<()> {
        self.set_flag(key, flag, false, propagate)
    }

    /// Marks an entity removed without releasing any of its links.
    pub fn recycle(&mut self, key: EntityKey) -> Result<()> {
        self.set_flag(key, EntityFlag::Removed, true, false)
    }

    /// Clears the `Removed` flag set by [`recycle`](Self::recycle).
    pub fn restore_recycled(&mut self, key: EntityKey) -> Result<()> {
        self.set_flag(key, EntityFlag::Removed, false, false)
    }

    fn set_flag(&mut self, key: EntityKey, flag: EntityFlag, on: bool, propagate: bool) -> Result<()> {
        let node = self.get(key)?;
        if !supports_flag(node.kind(), flag) {
            return Err(ValidationError::UnsupportedFlag {
                tag: node.tag.clone(),
                flag,
            }
            .into());
        }
        self.write_flag(key, flag, on)?;
        if !propagate {
            return Ok(());
        }

        let mut visited = FxHashSet::default();
        visited.insert(key);
        let mut pending: Vec<EntityKey> = self.get(key)?.children.iter().copied().collect();
        while let Some(child) = pending.pop() {
            if !visited.insert(child) {
                continue;
            }
            let Some(node) = self.entities.get(child) else {
                continue;
            };
            pending.extend(node.children.iter().copied());
            if supports_flag(node.kind(), flag) {
                self.write_flag(child, flag, on)?;
            } else {
                debug!(tag = %node.tag, ?flag, "flag not supported, skipped");
            }
        }
        Ok(())
    }

    fn write_flag(&mut self, key: EntityKey, flag: EntityFlag, on: bool) -> std::result::Result<(), GraphError> {
        if self.get(key)?.has_flag(flag) == on {
            return Ok(());
        }
        if flag == EntityFlag::Removed {
            self.record_recycling(key);
        } else {
            self.touch(key, "flags");
        }
        let node = self.get_mut(key)?;
        if on {
            node.flags.insert(flag);
        } else {
            node.flags.remove(flag);
        }
        Ok(())
    }

    // --- Derived geometry ---

    /// Drops cached geometry on the entity and everything above it.
    ///
    /// Loops get a new revision; slabs lose their cached faces.
    pub(crate) fn invalidate_geometry(&mut self, key: EntityKey) {
        let mut visited = FxHashSet::default();
        let mut pending = vec![key];
        while let Some(key) = pending.pop() {
            if !visited.insert(key) {
                continue;
            }
            let Some(node) = self.entities.get_mut(key) else {
                continue;
            };
            match &mut node.data {
                EntityData::Loop(l) => l.revision += 1,
                EntityData::Slab(s) => s.faces = None,
                _ => {}
            }
            pending.extend(node.parents.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{SlabData, VertexData};
    use crate::error::Error;
    use crate::keys::EntityType;

    fn vertex(doc: &mut Document) -> EntityKey {
        doc.insert_entity(EntityData::Vertex(VertexData::default()))
    }

    fn assert_symmetric(doc: &Document) {
        for (key, node) in doc.iter() {
            for &p in node.parents() {
                assert!(doc.get(p).unwrap().children().contains(&key));
            }
            for &c in node.children() {
                assert!(doc.get(c).unwrap().parents().contains(&key));
            }
        }
    }

    #[test]
    fn add_child_links_both_ways() {
        let mut doc = Document::new();
        let parent = vertex(&mut doc);
        let child = vertex(&mut doc);

        doc.add_child(parent, child).unwrap();
        assert!(doc.get(parent).unwrap().children().contains(&child));
        assert!(doc.get(child).unwrap().parents().contains(&parent));
        assert_symmetric(&doc);

        assert!(matches!(
            doc.add_child(parent, child),
            Err(GraphError::AlreadyChild { .. })
        ));
        assert!(matches!(
            doc.add_child(parent, parent),
            Err(GraphError::SelfOwnership(_))
        ));
    }

    #[test]
    fn removing_last_parent_destroys_subtree() {
        let mut doc = Document::new();
        let root = vertex(&mut doc);
        let mid = vertex(&mut doc);
        let leaf = vertex(&mut doc);
        doc.add_child(root, mid).unwrap();
        doc.add_child(mid, leaf).unwrap();

        doc.remove_child(root, mid).unwrap();
        assert!(!doc.is_live(mid));
        assert!(!doc.is_live(leaf));
        assert!(doc.is_live(root));
        assert_symmetric(&doc);
    }

    #[test]
    fn shared_child_survives_one_release() {
        let mut doc = Document::new();
        let a = vertex(&mut doc);
        let b = vertex(&mut doc);
        let shared = vertex(&mut doc);
        doc.add_child(a, shared).unwrap();
        doc.add_child(b, shared).unwrap();

        doc.remove_child(a, shared).unwrap();
        assert!(doc.is_live(shared));
        assert!(matches!(
            doc.remove_child(a, shared),
            Err(GraphError::NotChild { .. })
        ));
    }

    #[test]
    fn slab_refuses_hidden() {
        let mut doc = Document::new();
        let slab = doc.insert_entity(EntityData::Slab(SlabData::default()));
        let err = doc.set_flag_on(slab, EntityFlag::Hidden, false).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnsupportedFlag {
                flag: EntityFlag::Hidden,
                ..
            })
        ));
        assert!(!doc.get(slab).unwrap().has_flag(EntityFlag::Hidden));
    }

    #[test]
    fn propagation_skips_vetoing_descendants() {
        let mut doc = Document::new();
        let root = vertex(&mut doc);
        let slab = doc.insert_entity(EntityData::Slab(SlabData::default()));
        let leaf = vertex(&mut doc);
        doc.add_child(root, slab).unwrap();
        doc.add_child(slab, leaf).unwrap();

        doc.set_flag_on(root, EntityFlag::Hidden, true).unwrap();
        assert!(doc.get(root).unwrap().has_flag(EntityFlag::Hidden));
        assert!(!doc.get(slab).unwrap().has_flag(EntityFlag::Hidden));
        assert!(doc.get(leaf).unwrap().has_flag(EntityFlag::Hidden));

        doc.set_flag_off(root, EntityFlag::Hidden, true).unwrap();
        assert!(!doc.get(leaf).unwrap().has_flag(EntityFlag::Hidden));
    }

    #[test]
    fn recycle_keeps_links() {
        let mut doc = Document::new();
        let parent = vertex(&mut doc);
        let child = vertex(&mut doc);
        doc.add_child(parent, child).unwrap();

        doc.begin("recycle").unwrap();
        doc.recycle(child).unwrap();
        doc.commit().unwrap();

        assert!(!doc.is_live(child));
        assert!(doc.get(child).unwrap().parents().contains(&parent));
        let state = doc.last_transaction().unwrap().state(child).unwrap();
        assert_eq!(state.txn_type(), crate::txn::TxnType::Recycling);

        doc.undo().unwrap();
        assert!(doc.is_live(child));
        doc.restore_recycled(child).unwrap();
        assert_eq!(doc.count_of(EntityType::Vertex), 2);
    }

    #[test]
    fn removal_undo_restores_links() {
        let mut doc = Document::new();
        let parent = vertex(&mut doc);
        let child = vertex(&mut doc);
        doc.add_child(parent, child).unwrap();

        doc.begin("detach").unwrap();
        doc.remove_child(parent, child).unwrap();
        doc.commit().unwrap();
        let state = doc.last_transaction().unwrap().state(child).unwrap();
        assert_eq!(state.txn_type(), crate::txn::TxnType::Deletion);

        doc.undo().unwrap();
        assert!(doc.is_live(child));
        assert!(doc.get(parent).unwrap().children().contains(&child));
        assert_symmetric(&doc);

        doc.redo().unwrap();
        assert!(!doc.is_live(child));
        assert!(doc.get(parent).unwrap().children().is_empty());
    }

    #[test]
    fn created_then_destroyed_is_purged_at_commit() {
        let mut doc = Document::new();
        let anchor = vertex(&mut doc);

        doc.begin("scratch").unwrap();
        let temp = vertex(&mut doc);
        doc.add_child(anchor, temp).unwrap();
        doc.remove_child(anchor, temp).unwrap();
        doc.commit().unwrap();

        assert!(!doc.contains(temp));
        assert!(!doc.can_undo());
    }
}
