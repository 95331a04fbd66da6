// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Walking loops and deriving co-edge endpoints.
//!
//! Every walk keeps a visited set and stops with a [`TraversalError`] as soon
//! as a co-edge repeats before the walk is back at the root, so corrupted
//! rings are reported in O(n) instead of spinning forever.

use nalgebra::Point3;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::arena::Document;
use crate::entity::CoEdgeData;
use crate::error::{Result, TraversalError};
use crate::keys::{EntityKey, EntityType};

/// Lifecycle of a loop's co-edge ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    /// No root co-edge.
    Empty,
    /// The ring is intact but does not yet bound a region: fewer than three
    /// co-edges, a missing link, or consecutive co-edges that do not meet.
    PartiallyBuilt,
    /// The walk returns to the root through at least three connected co-edges.
    Closed,
    /// The walk revisits a co-edge or reaches a missing one.
    Corrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

impl Document {
    /// Calls `f` for each co-edge of a loop, starting at the root and
    /// following `next`.
    pub fn for_each_coedge(
        &self,
        lp: EntityKey,
        f: impl FnMut(EntityKey, &CoEdgeData),
    ) -> std::result::Result<(), TraversalError> {
        self.walk(lp, Direction::Forward, f)
    }

    fn walk(
        &self,
        lp: EntityKey,
        direction: Direction,
        mut f: impl FnMut(EntityKey, &CoEdgeData),
    ) -> std::result::Result<(), TraversalError> {
        let loop_tag = self.describe(lp);
        let root = match self.entities.get(lp).and_then(|n| n.as_loop()) {
            Some(data) => data.root,
            None => {
                return Err(TraversalError::Dangling { loop_tag, key: lp });
            }
        };
        let Some(root) = root else {
            return Ok(());
        };

        let mut visited = FxHashSet::default();
        let mut current = root;
        loop {
            let coedge = self
                .entities
                .get(current)
                .filter(|n| !n.is_removed())
                .and_then(|n| n.as_coedge())
                .ok_or_else(|| TraversalError::Dangling {
                    loop_tag: loop_tag.clone(),
                    key: current,
                })?;
            if !visited.insert(current) {
                return Err(TraversalError::Cycle {
                    loop_tag,
                    coedge: self.describe(current),
                });
            }
            f(current, coedge);

            let step = match direction {
                Direction::Forward => coedge.next,
                Direction::Backward => coedge.prev,
            };
            match step {
                None => {
                    return Err(TraversalError::Broken {
                        loop_tag,
                        coedge: self.describe(current),
                    })
                }
                Some(next) if next == root => return Ok(()),
                Some(next) => current = next,
            }
        }
    }

    /// Co-edges of a loop in `next` order.
    pub fn loop_coedges(&self, lp: EntityKey) -> std::result::Result<Vec<EntityKey>, TraversalError> {
        let mut coedges = Vec::new();
        self.walk(lp, Direction::Forward, |k, _| coedges.push(k))?;
        Ok(coedges)
    }

    /// Co-edges of a loop in `prev` order, starting at the root.
    pub fn loop_coedges_reversed(
        &self,
        lp: EntityKey,
    ) -> std::result::Result<Vec<EntityKey>, TraversalError> {
        let mut coedges = Vec::new();
        self.walk(lp, Direction::Backward, |k, _| coedges.push(k))?;
        Ok(coedges)
    }

    /// Number of co-edges in a loop.
    pub fn loop_len(&self, lp: EntityKey) -> Result<usize> {
        self.expect_kind(lp, EntityType::Loop)?;
        let mut count = 0;
        self.for_each_coedge(lp, |_, _| count += 1)?;
        Ok(count)
    }

    /// Start vertex of a co-edge, honoring its direction.
    pub fn coedge_from(&self, coedge: EntityKey) -> Option<EntityKey> {
        let c = self.entities.get(coedge)?.as_coedge()?;
        let e = self.entities.get(c.edge)?.as_edge()?;
        Some(if c.reversed { e.to } else { e.from })
    }

    /// End vertex of a co-edge, honoring its direction.
    pub fn coedge_to(&self, coedge: EntityKey) -> Option<EntityKey> {
        let c = self.entities.get(coedge)?.as_coedge()?;
        let e = self.entities.get(c.edge)?.as_edge()?;
        Some(if c.reversed { e.from } else { e.to })
    }

    /// Start vertices of the loop's co-edges, in order.
    pub fn loop_vertices(&self, lp: EntityKey) -> Result<Vec<EntityKey>> {
        self.expect_kind(lp, EntityType::Loop)?;
        let mut vertices = Vec::new();
        let mut missing = None;
        self.for_each_coedge(lp, |k, _| match self.coedge_from(k) {
            Some(v) => vertices.push(v),
            None => missing = missing.or(Some(k)),
        })?;
        if let Some(coedge) = missing {
            return Err(TraversalError::Dangling {
                loop_tag: self.describe(lp),
                key: coedge,
            }
            .into());
        }
        Ok(vertices)
    }

    /// Classifies a loop.
    pub fn loop_state(&self, lp: EntityKey) -> LoopState {
        let Some(data) = self.entities.get(lp).and_then(|n| n.as_loop()) else {
            return LoopState::Corrupt;
        };
        if data.root.is_none() {
            return LoopState::Empty;
        }

        let coedges = match self.loop_coedges(lp) {
            Ok(c) => c,
            Err(TraversalError::Broken { .. }) => return LoopState::PartiallyBuilt,
            Err(_) => return LoopState::Corrupt,
        };

        let n = coedges.len();
        for i in 0..n {
            let current = coedges[i];
            let next = coedges[(i + 1) % n];
            let linked_back = self
                .entities
                .get(next)
                .and_then(|node| node.as_coedge())
                .is_some_and(|c| c.prev == Some(current));
            if !linked_back {
                return LoopState::Corrupt;
            }
        }

        if n < 3 {
            return LoopState::PartiallyBuilt;
        }
        let connected = (0..n).all(|i| {
            let to = self.coedge_to(coedges[i]);
            to.is_some() && to == self.coedge_from(coedges[(i + 1) % n])
        });
        if connected {
            LoopState::Closed
        } else {
            LoopState::PartiallyBuilt
        }
    }

    /// Returns the loop's vertex positions, or `None` unless the loop is
    /// [`LoopState::Closed`].
    ///
    /// With `close_path`, the first point is repeated at the end.
    pub fn to_polygon(&self, lp: EntityKey, close_path: bool) -> Option<Vec<Point3<f64>>> {
        if self.loop_state(lp) != LoopState::Closed {
            return None;
        }
        let mut points = self
            .loop_vertices(lp)
            .ok()?
            .into_iter()
            .map(|v| self.vertex_point(v))
            .collect::<Option<Vec<_>>>()?;
        if points.len() < 3 {
            return None;
        }
        if close_path {
            points.push(points[0]);
        }
        Some(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(doc: &mut Document) -> EntityKey {
        doc.loop_from_points(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
            .unwrap()
    }

    #[test]
    fn triangle_polygon_closes_on_first_point() {
        let mut doc = Document::new();
        let lp = triangle(&mut doc);

        assert_eq!(doc.loop_state(lp), LoopState::Closed);
        let polygon = doc.to_polygon(lp, true).unwrap();
        assert_eq!(polygon.len(), 4);
        assert_eq!(polygon[0], polygon[3]);
        assert_eq!(doc.to_polygon(lp, false).unwrap().len(), 3);
    }

    #[test]
    fn two_point_loop_has_no_polygon() {
        let mut doc = Document::new();
        let lp = doc
            .loop_from_points(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]])
            .unwrap();
        assert_eq!(doc.loop_state(lp), LoopState::PartiallyBuilt);
        assert!(doc.to_polygon(lp, true).is_none());
    }

    #[test]
    fn empty_loop() {
        let mut doc = Document::new();
        let lp = doc.create_loop();
        assert_eq!(doc.loop_state(lp), LoopState::Empty);
        assert_eq!(doc.loop_len(lp).unwrap(), 0);
    }

    #[test]
    fn reverse_walk_visits_same_coedges() {
        let mut doc = Document::new();
        let lp = doc
            .loop_from_points(&[
                [0.0, 0.0, 0.0],
                [2.0, 0.0, 0.0],
                [2.0, 2.0, 0.0],
                [0.0, 2.0, 0.0],
            ])
            .unwrap();
        let forward = doc.loop_coedges(lp).unwrap();
        let mut backward = doc.loop_coedges_reversed(lp).unwrap();
        assert_eq!(forward[0], backward[0]);
        backward[1..].reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn coedge_endpoints_follow_direction() {
        let mut doc = Document::new();
        let lp = triangle(&mut doc);
        let coedges = doc.loop_coedges(lp).unwrap();
        for pair in coedges.windows(2) {
            assert_eq!(doc.coedge_to(pair[0]), doc.coedge_from(pair[1]));
        }
    }

    #[test]
    fn cycle_not_through_root_is_detected() {
        let mut doc = Document::new();
        let lp = doc
            .loop_from_points(&[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ])
            .unwrap();
        let coedges = doc.loop_coedges(lp).unwrap();
        if let Some(crate::entity::EntityData::CoEdge(c)) =
            doc.entities.get_mut(coedges[3]).map(|n| &mut n.data)
        {
            c.next = Some(coedges[1]);
        }

        let mut visits = 0;
        let result = doc.for_each_coedge(lp, |_, _| visits += 1);
        assert!(matches!(result, Err(TraversalError::Cycle { .. })));
        assert_eq!(visits, 4);
        assert_eq!(doc.loop_state(lp), LoopState::Corrupt);
        assert!(doc.to_polygon(lp, true).is_none());
    }
}
