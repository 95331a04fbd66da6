// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Construction and editing of the half-edge topology.
//!
//! Each entity is created through the document, which checks that every
//! referenced entity exists and has the right kind before anything is
//! written, and keeps ownership links symmetric.

use crate::arena::Document;
use crate::entity::{CoEdgeData, Curve, EdgeData, EntityData, LoopData, VertexData};
use crate::error::{GraphError, Result};
use crate::keys::{EntityKey, EntityType};

type GraphResult<T> = std::result::Result<T, GraphError>;

impl Document {
    /// Creates a detached vertex.
    pub fn create_vertex(&mut self, point: [f64; 3]) -> EntityKey {
        self.insert_entity(EntityData::Vertex(VertexData {
            x: point[0],
            y: point[1],
            z: point[2],
        }))
    }

    /// Creates a straight edge owning both vertices.
    ///
    /// `from == to` yields a closed edge that owns the vertex once.
    pub fn create_edge(&mut self, from: EntityKey, to: EntityKey) -> GraphResult<EntityKey> {
        self.expect_live(from, EntityType::Vertex)?;
        self.expect_live(to, EntityType::Vertex)?;

        let edge = self.insert_entity(EntityData::Edge(EdgeData {
            from,
            to,
            curve: Curve::Line,
            coedge: None,
        }));
        self.add_child(edge, from)?;
        if to != from {
            self.add_child(edge, to)?;
        }
        Ok(edge)
    }

    /// Creates two vertices and the edge between them.
    pub fn create_edge_between(&mut self, from: [f64; 3], to: [f64; 3]) -> GraphResult<EntityKey> {
        let a = self.create_vertex(from);
        let b = self.create_vertex(to);
        self.create_edge(a, b)
    }

    /// Creates a co-edge over `edge`.
    ///
    /// The first co-edge of an edge becomes its primary co-edge. A second
    /// co-edge running the other way is paired with the first as partners.
    pub fn create_coedge(&mut self, edge: EntityKey, reversed: bool) -> GraphResult<EntityKey> {
        let edge_node = self.expect_live(edge, EntityType::Edge)?;
        if edge_node.parents.len() >= 2 {
            return Err(GraphError::EdgeSaturated(edge_node.tag.clone()));
        }
        let sibling = edge_node.parents.iter().next().copied();

        let coedge = self.insert_entity(EntityData::CoEdge(CoEdgeData {
            edge,
            reversed,
            ..CoEdgeData::default()
        }));
        self.add_child(coedge, edge)?;

        match sibling {
            None => {
                self.update_edge(edge, "coedge", |e| e.coedge = Some(coedge))?;
            }
            Some(other) => {
                let opposite = self.coedge(other).is_ok_and(|c| c.reversed != reversed);
                if opposite {
                    self.set_partner(coedge, other)?;
                }
            }
        }
        Ok(coedge)
    }

    /// Creates an empty loop.
    pub fn create_loop(&mut self) -> EntityKey {
        self.insert_entity(EntityData::Loop(LoopData::default()))
    }

    /// Builds a loop through `points`, one vertex, edge, and co-edge per point.
    ///
    /// Each edge runs from a point to the next, the last one back to the
    /// first. A single point yields a closed edge.
    pub fn loop_from_points(&mut self, points: &[[f64; 3]]) -> GraphResult<EntityKey> {
        if points.is_empty() {
            return Err(GraphError::TooFewPoints {
                required: 1,
                actual: 0,
            });
        }
        let vertices: Vec<EntityKey> = points.iter().map(|p| self.create_vertex(*p)).collect();
        let lp = self.create_loop();
        let n = vertices.len();
        for i in 0..n {
            let edge = self.create_edge(vertices[i], vertices[(i + 1) % n])?;
            let coedge = self.create_coedge(edge, false)?;
            self.append_coedge(lp, coedge, None)?;
        }
        Ok(lp)
    }

    /// Splices a detached co-edge into a loop after `after` (default: the
    /// tail). An empty loop takes the co-edge as its root, linked to itself.
    pub fn append_coedge(
        &mut self,
        lp: EntityKey,
        coedge: EntityKey,
        after: Option<EntityKey>,
    ) -> GraphResult<()> {
        let root = self.expect_live(lp, EntityType::Loop)?.as_loop().and_then(|l| l.root);
        let coedge_node = self.expect_live(coedge, EntityType::CoEdge)?;
        if let Some(&owner) = coedge_node.parents.iter().next() {
            return Err(GraphError::AlreadyChild {
                parent: self.describe(owner),
                child: coedge_node.tag.clone(),
            });
        }

        let Some(root) = root else {
            self.add_child(lp, coedge)?;
            self.update_coedge(coedge, "prev", |c| c.prev = Some(coedge))?;
            self.update_coedge(coedge, "next", |c| c.next = Some(coedge))?;
            self.update_loop(lp, "root", |l| l.root = Some(coedge))?;
            self.invalidate_geometry(lp);
            return Ok(());
        };

        let target = match after {
            Some(target) => {
                self.ensure_member(lp, target)?;
                target
            }
            None => self.coedge(root)?.prev.unwrap_or(root),
        };
        let next = self.coedge(target)?.next.unwrap_or(root);

        self.add_child(lp, coedge)?;
        self.update_coedge(coedge, "prev", |c| c.prev = Some(target))?;
        self.update_coedge(coedge, "next", |c| c.next = Some(next))?;
        self.update_coedge(target, "next", |c| c.next = Some(coedge))?;
        self.update_coedge(next, "prev", |c| c.prev = Some(coedge))?;
        self.invalidate_geometry(lp);
        Ok(())
    }

    /// Unsplices a co-edge from its loop and releases it.
    ///
    /// Its partner, if any, becomes the primary co-edge of the shared edge.
    /// Removing the root makes its successor the new root.
    pub fn remove_coedge(&mut self, lp: EntityKey, coedge: EntityKey) -> GraphResult<()> {
        let root = self.expect_live(lp, EntityType::Loop)?.as_loop().and_then(|l| l.root);
        self.ensure_member(lp, coedge)?;
        let data = self.coedge(coedge)?.clone();

        if let Some(partner) = data.partner {
            self.clear_partner(coedge)?;
            if self.edge(data.edge)?.coedge == Some(coedge) {
                self.update_edge(data.edge, "coedge", |e| e.coedge = Some(partner))?;
            }
        } else if self.edge(data.edge)?.coedge == Some(coedge) {
            self.update_edge(data.edge, "coedge", |e| e.coedge = None)?;
        }

        let single = data.next == Some(coedge) || data.next.is_none();
        if single {
            self.update_loop(lp, "root", |l| l.root = None)?;
        } else {
            let (prev, next) = (data.prev.unwrap_or(coedge), data.next.unwrap_or(coedge));
            self.update_coedge(prev, "next", |c| c.next = Some(next))?;
            self.update_coedge(next, "prev", |c| c.prev = Some(prev))?;
            if root == Some(coedge) {
                self.update_loop(lp, "root", |l| l.root = Some(next))?;
            }
        }
        self.update_coedge(coedge, "prev", |c| c.prev = None)?;
        self.update_coedge(coedge, "next", |c| c.next = None)?;
        self.invalidate_geometry(lp);
        self.remove_child(lp, coedge)
    }

    fn ensure_member(&self, lp: EntityKey, coedge: EntityKey) -> GraphResult<()> {
        if self.get(lp)?.children.contains(&coedge) {
            Ok(())
        } else {
            Err(GraphError::ForeignCoEdge {
                loop_tag: self.describe(lp),
                coedge: self.describe(coedge),
            })
        }
    }

    // --- Partners ---

    /// Makes two co-edges partners. They must run over the same edge in
    /// opposite directions.
    pub fn set_partner(&mut self, a: EntityKey, b: EntityKey) -> GraphResult<()> {
        let (ca, cb) = (self.coedge(a)?, self.coedge(b)?);
        if a == b || ca.edge != cb.edge || ca.reversed == cb.reversed {
            return Err(GraphError::InvalidPartner(self.describe(a), self.describe(b)));
        }
        let (old_a, old_b) = (ca.partner, cb.partner);
        for (key, old) in [(a, old_a), (b, old_b)] {
            if let Some(old) = old.filter(|o| *o != a && *o != b) {
                if self.coedge(old)?.partner == Some(key) {
                    self.update_coedge(old, "partner", |c| c.partner = None)?;
                }
            }
        }
        self.update_coedge(a, "partner", |c| c.partner = Some(b))?;
        self.update_coedge(b, "partner", |c| c.partner = Some(a))?;
        Ok(())
    }

    /// Unpairs a co-edge from its partner, on both sides.
    pub fn clear_partner(&mut self, coedge: EntityKey) -> GraphResult<()> {
        let Some(partner) = self.coedge(coedge)?.partner else {
            return Ok(());
        };
        if self.coedge(partner).is_ok_and(|c| c.partner == Some(coedge)) {
            self.update_coedge(partner, "partner", |c| c.partner = None)?;
        }
        self.update_coedge(coedge, "partner", |c| c.partner = None)?;
        Ok(())
    }

    // --- Edge and vertex edits ---

    /// Moves a vertex and drops derived geometry above it.
    pub fn set_vertex_position(&mut self, vertex: EntityKey, point: [f64; 3]) -> GraphResult<()> {
        self.update_vertex(vertex, "point", |v| {
            v.x = point[0];
            v.y = point[1];
            v.z = point[2];
        })?;
        self.invalidate_geometry(vertex);
        Ok(())
    }

    pub fn set_edge_curve(&mut self, edge: EntityKey, curve: Curve) -> GraphResult<()> {
        self.update_edge(edge, "curve", |e| e.curve = curve)?;
        self.invalidate_geometry(edge);
        Ok(())
    }

    /// Rewires the start vertex of an edge.
    pub fn set_edge_from(&mut self, edge: EntityKey, vertex: EntityKey) -> GraphResult<()> {
        self.rewire_endpoint(edge, vertex, true)
    }

    /// Rewires the end vertex of an edge.
    pub fn set_edge_to(&mut self, edge: EntityKey, vertex: EntityKey) -> GraphResult<()> {
        self.rewire_endpoint(edge, vertex, false)
    }

    /// The new vertex is attached before the old one is released. The old
    /// vertex stays a child when it is also the other endpoint.
    fn rewire_endpoint(&mut self, edge: EntityKey, vertex: EntityKey, start: bool) -> GraphResult<()> {
        self.expect_live(vertex, EntityType::Vertex)?;
        let data = self.edge(edge)?;
        let (old, other) = if start {
            (data.from, data.to)
        } else {
            (data.to, data.from)
        };
        if old == vertex {
            return Ok(());
        }

        if !self.get(edge)?.children.contains(&vertex) {
            self.add_child(edge, vertex)?;
        }
        if start {
            self.update_edge(edge, "from", |e| e.from = vertex)?;
        } else {
            self.update_edge(edge, "to", |e| e.to = vertex)?;
        }
        if old != other && self.get(edge)?.children.contains(&old) {
            self.remove_child(edge, old)?;
        }
        self.invalidate_geometry(edge);
        Ok(())
    }

    /// Splits the edge under `coedge` at `point`.
    ///
    /// The edge is shortened to end at a new vertex and a second edge carries
    /// the rest. Every co-edge on the original edge gets a sibling on the new
    /// edge, spliced in next to it in its own loop, and the new siblings are
    /// paired as partners. Returns the new vertex.
    pub fn split_coedge(&mut self, coedge: EntityKey, point: [f64; 3]) -> Result<EntityKey> {
        let edge = self.coedge(coedge)?.edge;
        let data = self.edge(edge)?.clone();
        let users: Vec<EntityKey> = self.get(edge)?.parents.iter().copied().collect();

        let middle = self.create_vertex(point);
        let tail = self.create_edge(middle, data.to)?;
        self.set_edge_curve(tail, data.curve)?;
        self.set_edge_to(edge, middle)?;

        for user in users {
            let reversed = self.coedge(user)?.reversed;
            let sibling = self.create_coedge(tail, reversed)?;
            let Some(lp) = self.get(user)?.unique_parent() else {
                continue;
            };
            let after = if reversed {
                self.coedge(user)?.prev.unwrap_or(user)
            } else {
                user
            };
            self.append_coedge(lp, sibling, Some(after))?;
        }
        Ok(middle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traversal::LoopState;

    fn square(doc: &mut Document) -> EntityKey {
        doc.loop_from_points(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ])
        .unwrap()
    }

    #[test]
    fn edge_owns_its_vertices() {
        let mut doc = Document::new();
        let edge = doc.create_edge_between([0.0; 3], [1.0, 0.0, 0.0]).unwrap();
        let data = doc.edge(edge).unwrap().clone();
        assert!(doc.get(data.from).unwrap().parents().contains(&edge));
        assert!(doc.get(data.to).unwrap().parents().contains(&edge));
    }

    #[test]
    fn edge_rejects_missing_vertex() {
        let mut doc = Document::new();
        let v = doc.create_vertex([0.0; 3]);
        let lp = doc.create_loop();
        assert!(matches!(
            doc.create_edge(v, lp),
            Err(GraphError::WrongKind { .. })
        ));
    }

    #[test]
    fn single_coedge_loop_links_to_itself() {
        let mut doc = Document::new();
        let edge = doc.create_edge_between([0.0; 3], [1.0, 0.0, 0.0]).unwrap();
        let coedge = doc.create_coedge(edge, false).unwrap();
        let lp = doc.create_loop();
        doc.append_coedge(lp, coedge, None).unwrap();

        let c = doc.coedge(coedge).unwrap();
        assert_eq!(c.next, Some(coedge));
        assert_eq!(c.prev, Some(coedge));
        assert_eq!(doc.loop_data(lp).unwrap().root, Some(coedge));
        assert_eq!(doc.loop_len(lp).unwrap(), 1);
    }

    #[test]
    fn third_coedge_on_an_edge_is_rejected() {
        let mut doc = Document::new();
        let edge = doc.create_edge_between([0.0; 3], [1.0, 0.0, 0.0]).unwrap();
        let a = doc.create_coedge(edge, false).unwrap();
        let b = doc.create_coedge(edge, true).unwrap();
        assert_eq!(doc.coedge(a).unwrap().partner, Some(b));
        assert_eq!(doc.coedge(b).unwrap().partner, Some(a));
        assert_eq!(doc.edge(edge).unwrap().coedge, Some(a));
        assert!(matches!(
            doc.create_coedge(edge, false),
            Err(GraphError::EdgeSaturated(_))
        ));
    }

    #[test]
    fn append_after_target() {
        let mut doc = Document::new();
        let lp = square(&mut doc);
        let coedges = doc.loop_coedges(lp).unwrap();

        let edge = doc.create_edge_between([5.0; 3], [6.0; 3]).unwrap();
        let extra = doc.create_coedge(edge, false).unwrap();
        doc.append_coedge(lp, extra, Some(coedges[1])).unwrap();

        let order = doc.loop_coedges(lp).unwrap();
        assert_eq!(order, vec![coedges[0], coedges[1], extra, coedges[2], coedges[3]]);
        assert!(matches!(
            doc.append_coedge(lp, extra, None),
            Err(GraphError::AlreadyChild { .. })
        ));
    }

    #[test]
    fn remove_root_coedge_reroots() {
        let mut doc = Document::new();
        let lp = square(&mut doc);
        let coedges = doc.loop_coedges(lp).unwrap();

        doc.remove_coedge(lp, coedges[0]).unwrap();
        assert_eq!(doc.loop_data(lp).unwrap().root, Some(coedges[1]));
        assert_eq!(doc.loop_coedges(lp).unwrap(), coedges[1..].to_vec());
        assert!(!doc.is_live(coedges[0]));
    }

    #[test]
    fn removing_the_only_coedge_empties_the_loop() {
        let mut doc = Document::new();
        let lp = doc.loop_from_points(&[[0.0; 3]]).unwrap();
        let root = doc.loop_data(lp).unwrap().root.unwrap();
        doc.remove_coedge(lp, root).unwrap();
        assert_eq!(doc.loop_state(lp), LoopState::Empty);
    }

    #[test]
    fn rewiring_releases_old_vertex() {
        let mut doc = Document::new();
        let edge = doc.create_edge_between([0.0; 3], [1.0, 0.0, 0.0]).unwrap();
        let old = doc.edge(edge).unwrap().to;
        let new = doc.create_vertex([2.0, 0.0, 0.0]);

        doc.set_edge_to(edge, new).unwrap();
        assert_eq!(doc.edge(edge).unwrap().to, new);
        assert!(!doc.is_live(old));
        assert!(doc.get(edge).unwrap().children().contains(&new));
    }

    #[test]
    fn rewiring_keeps_shared_endpoint() {
        let mut doc = Document::new();
        let edge = doc.create_edge_between([0.0; 3], [1.0, 0.0, 0.0]).unwrap();
        let data = doc.edge(edge).unwrap().clone();

        // Collapse to a closed edge, then open it again.
        doc.set_edge_to(edge, data.from).unwrap();
        assert!(doc.is_live(data.from));
        assert_eq!(doc.get(edge).unwrap().children().len(), 1);

        let fresh = doc.create_vertex([3.0, 0.0, 0.0]);
        doc.set_edge_to(edge, fresh).unwrap();
        assert!(doc.is_live(data.from));
        assert_eq!(doc.get(edge).unwrap().children().len(), 2);
    }

    #[test]
    fn split_keeps_loop_closed() {
        let mut doc = Document::new();
        let lp = square(&mut doc);
        let first = doc.loop_coedges(lp).unwrap()[0];

        let middle = doc.split_coedge(first, [0.5, 0.0, 0.0]).unwrap();
        assert_eq!(doc.loop_len(lp).unwrap(), 5);
        assert_eq!(doc.loop_state(lp), LoopState::Closed);
        assert_eq!(doc.coedge_to(first), Some(middle));
    }

    #[test]
    fn split_shared_edge_repairs_partners() {
        let mut doc = Document::new();
        let edge = doc.create_edge_between([0.0; 3], [2.0, 0.0, 0.0]).unwrap();
        let forward = doc.create_coedge(edge, false).unwrap();
        let backward = doc.create_coedge(edge, true).unwrap();
        let (a, b) = (doc.create_loop(), doc.create_loop());
        doc.append_coedge(a, forward, None).unwrap();
        doc.append_coedge(b, backward, None).unwrap();

        doc.split_coedge(forward, [1.0, 0.0, 0.0]).unwrap();

        let ring_a = doc.loop_coedges(a).unwrap();
        let ring_b = doc.loop_coedges(b).unwrap();
        assert_eq!(ring_a.len(), 2);
        assert_eq!(ring_b.len(), 2);
        assert_eq!(doc.coedge_to(ring_a[0]), doc.coedge_from(ring_a[1]));
        assert_eq!(doc.coedge_to(ring_b[1]), doc.coedge_from(ring_b[0]));
        for &c in ring_a.iter() {
            let partner = doc.coedge(c).unwrap().partner.unwrap();
            assert_eq!(doc.coedge(partner).unwrap().partner, Some(c));
            assert!(ring_b.contains(&partner));
        }
    }
}
