// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Room regions: a co-edge path bounding a floor area, plus the split
//! curves that divide it.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::arena::Document;
use crate::entity::{CoEdgeData, EdgeData, EntityData, RoomRegionData, SplitCurve};
use crate::error::{GraphError, Result};
use crate::geometry::Body;
use crate::keys::{EntityKey, EntityType};

impl Document {
    /// Creates a room region bounded by `path`.
    pub fn create_room_region(&mut self, path: EntityKey) -> Result<EntityKey> {
        self.expect_live(path, EntityType::Loop)?;
        let room = self.insert_entity(EntityData::RoomRegion(RoomRegionData::default()));
        self.set_co_edge_path(room, path)?;
        Ok(room)
    }

    pub fn co_edge_path(&self, room: EntityKey) -> std::result::Result<Option<EntityKey>, GraphError> {
        Ok(self.room(room)?.co_edge_path)
    }

    /// Replaces the boundary loop, releasing the previous one.
    pub fn set_co_edge_path(&mut self, room: EntityKey, path: EntityKey) -> Result<()> {
        self.expect_live(room, EntityType::RoomRegion)?;
        self.expect_live(path, EntityType::Loop)?;
        let old = self.room(room)?.co_edge_path;
        if old == Some(path) {
            return Ok(());
        }
        self.add_child(room, path)?;
        self.update_room(room, "co_edge_path", |r| r.co_edge_path = Some(path))?;
        if let Some(old) = old {
            if self.get(room)?.children.contains(&old) {
                self.remove_child(room, old)?;
            }
        }
        Ok(())
    }

    pub fn split_curves(&self, room: EntityKey) -> std::result::Result<&[SplitCurve], GraphError> {
        Ok(&self.room(room)?.split_curves)
    }

    pub fn set_split_curves(
        &mut self,
        room: EntityKey,
        curves: Vec<SplitCurve>,
    ) -> std::result::Result<(), GraphError> {
        self.update_room(room, "split_curves", |r| r.split_curves = curves)
    }

    /// Extrudes the region into a closed shell from `elevation` up by
    /// `thickness`.
    pub fn extrude_body(&self, room: EntityKey, elevation: f64, thickness: f64) -> Result<Body> {
        self.expect_live(room, EntityType::RoomRegion)?;
        let path = self.room(room)?.co_edge_path;
        self.check_profile(room, path)?;
        let path = path.ok_or(GraphError::NotFound(room))?;
        let faces = self.extrude_profile(room, path, &[], elevation, thickness)?;
        Ok(Body {
            faces: faces.iter().cloned().collect(),
        })
    }

    /// Deep-copies a room region: a new boundary loop with its own vertices,
    /// edges, and co-edges, and a copy of the split curves.
    pub fn clone_room_region(&mut self, room: EntityKey) -> Result<EntityKey> {
        self.clone_room_region_with(room, |curves| curves.to_vec())
    }

    /// Like [`clone_room_region`](Self::clone_room_region), with the copy's
    /// split curves produced by `split_curves` from the original's.
    pub fn clone_room_region_with(
        &mut self,
        room: EntityKey,
        split_curves: impl FnOnce(&[SplitCurve]) -> Vec<SplitCurve>,
    ) -> Result<EntityKey> {
        let data = self.expect_live(room, EntityType::RoomRegion)?;
        let data = data.as_room().ok_or(GraphError::NotFound(room))?;
        let curves = split_curves(&data.split_curves);
        let path = data.co_edge_path;

        let copy = self.insert_entity(EntityData::RoomRegion(RoomRegionData {
            co_edge_path: None,
            split_curves: curves,
        }));
        if let Some(path) = path {
            let path_copy = self.duplicate_loop(path)?;
            self.set_co_edge_path(copy, path_copy)?;
        }
        debug!(source = %self.describe(room), copy = %self.describe(copy), "room region cloned");
        Ok(copy)
    }

    /// Copies a loop with fresh vertices, edges, and co-edges. Vertices and
    /// edges shared inside the loop stay shared in the copy.
    pub(crate) fn duplicate_loop(&mut self, lp: EntityKey) -> Result<EntityKey> {
        let coedges = self.loop_coedges(lp)?;
        let mut vertices: FxHashMap<EntityKey, EntityKey> = FxHashMap::default();
        let mut edges: FxHashMap<EntityKey, EntityKey> = FxHashMap::default();
        let copy = self.create_loop();

        for coedge in coedges {
            let CoEdgeData { edge, reversed, .. } = *self.coedge(coedge)?;
            let new_edge = match edges.get(&edge) {
                Some(&e) => e,
                None => {
                    let EdgeData { from, to, curve, .. } = *self.edge(edge)?;
                    let from = self.duplicate_vertex(from, &mut vertices)?;
                    let to = self.duplicate_vertex(to, &mut vertices)?;
                    let e = self.create_edge(from, to)?;
                    self.set_edge_curve(e, curve)?;
                    edges.insert(edge, e);
                    e
                }
            };
            let new_coedge = self.create_coedge(new_edge, reversed)?;
            self.append_coedge(copy, new_coedge, None)?;
        }
        Ok(copy)
    }

    fn duplicate_vertex(
        &mut self,
        vertex: EntityKey,
        copies: &mut FxHashMap<EntityKey, EntityKey>,
    ) -> std::result::Result<EntityKey, GraphError> {
        if let Some(&v) = copies.get(&vertex) {
            return Ok(v);
        }
        let p = self.vertex(vertex)?;
        let v = self.create_vertex([p.x, p.y, p.z]);
        copies.insert(vertex, v);
        Ok(v)
    }
}
