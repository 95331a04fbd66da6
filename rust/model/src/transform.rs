// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Affine transformations on entity subtrees.
//!
//! Transforms move the vertices owned, directly or transitively, by an
//! entity. Edges, co-edges, and loops reference vertices through keys, so
//! they follow automatically. Split curves cached on room regions are moved
//! with the vertices, and a transform that flips handedness reverses every
//! loop it touches so profiles keep their winding.

use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, Unit, Vector2, Vector3};
use rustc_hash::FxHashSet;

use crate::arena::Document;
use crate::entity::{EntityData, SplitCurve};
use crate::error::Result;
use crate::keys::{EntityKey, EntityType};

impl Document {
    /// Translates every vertex under `key`.
    pub fn translate(&mut self, key: EntityKey, offset: Vector3<f64>) -> Result<()> {
        self.transform(key, &Matrix4::new_translation(&offset))
    }

    /// Rotates every vertex under `key` by `angle` radians around `axis`
    /// through `origin`. A zero axis leaves the geometry unchanged.
    pub fn rotate(
        &mut self,
        key: EntityKey,
        origin: &Point3<f64>,
        axis: &Vector3<f64>,
        angle: f64,
    ) -> Result<()> {
        let Some(axis) = Unit::try_new(*axis, 1e-15) else {
            return Ok(());
        };
        let rotation = Rotation3::from_axis_angle(&axis, angle).to_homogeneous();
        let matrix = Matrix4::new_translation(&origin.coords)
            * rotation
            * Matrix4::new_translation(&-origin.coords);
        self.transform(key, &matrix)
    }

    /// Reflects everything under `key` across the vertical plane through
    /// `origin` along `direction` (both in XY).
    pub fn mirror(&mut self, key: EntityKey, origin: [f64; 2], direction: [f64; 2]) -> Result<()> {
        let Some(matrix) = mirror_matrix(origin, direction) else {
            return Ok(());
        };
        self.transform(key, &matrix)
    }

    /// Applies a 4x4 affine matrix to everything under `key`.
    pub fn transform(&mut self, key: EntityKey, matrix: &Matrix4<f64>) -> Result<()> {
        self.get(key)?;
        let subtree = self.owned_subtree(key);

        for &k in &subtree {
            let Some(p) = self.vertex_point(k) else {
                continue;
            };
            let moved = matrix.transform_point(&p);
            self.set_vertex_position(k, [moved.x, moved.y, moved.z])?;
        }

        for &k in &subtree {
            let curves = match self.entities.get(k).map(|n| &n.data) {
                Some(EntityData::RoomRegion(r)) if !r.split_curves.is_empty() => {
                    r.split_curves.clone()
                }
                _ => continue,
            };
            let moved = curves.iter().map(|c| transform_curve(c, matrix)).collect();
            self.update_room(k, "split_curves", |r| r.split_curves = moved)?;
        }

        if flips_handedness(matrix) {
            let loops: Vec<EntityKey> = subtree
                .iter()
                .copied()
                .filter(|&k| self.entities.get(k).is_some_and(|n| n.kind() == EntityType::Loop))
                .collect();
            for lp in loops {
                self.reverse_loop(lp)?;
            }
        }
        Ok(())
    }

    /// Vertices owned, directly or transitively, by `key`.
    pub fn collect_vertices(&self, key: EntityKey) -> Vec<EntityKey> {
        self.owned_subtree(key)
            .into_iter()
            .filter(|&k| self.entities.get(k).is_some_and(|n| n.kind() == EntityType::Vertex))
            .collect()
    }

    fn owned_subtree(&self, key: EntityKey) -> Vec<EntityKey> {
        let mut visited = FxHashSet::default();
        let mut order = Vec::new();
        let mut pending = vec![key];
        while let Some(k) = pending.pop() {
            if !visited.insert(k) {
                continue;
            }
            let Some(node) = self.entities.get(k).filter(|n| !n.is_removed()) else {
                continue;
            };
            order.push(k);
            pending.extend(node.children.iter().copied());
        }
        order
    }
}

/// Reflection across the vertical plane through `origin` along `direction`.
pub fn mirror_matrix(origin: [f64; 2], direction: [f64; 2]) -> Option<Matrix4<f64>> {
    let d = Vector2::new(direction[0], direction[1]).try_normalize(1e-15)?;
    let n = Vector3::new(-d.y, d.x, 0.0);
    let reflection = (Matrix3::identity() - n * n.transpose() * 2.0).to_homogeneous();
    let o = Vector3::new(origin[0], origin[1], 0.0);
    Some(Matrix4::new_translation(&o) * reflection * Matrix4::new_translation(&-o))
}

fn flips_handedness(matrix: &Matrix4<f64>) -> bool {
    matrix.fixed_view::<3, 3>(0, 0).clone_owned().determinant() < 0.0
}

fn transform_curve(curve: &SplitCurve, matrix: &Matrix4<f64>) -> SplitCurve {
    let map = |p: [f64; 2]| {
        let q = matrix.transform_point(&Point3::new(p[0], p[1], 0.0));
        [q.x, q.y]
    };
    SplitCurve {
        start: map(curve.start),
        end: map(curve.end),
    }
}
