// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Geometric queries on loops and the faces derived from them.
//!
//! Profiles are treated as planar outlines in the XY plane. Composite
//! entities turn a profile into a prism: a bottom face at the base
//! elevation, a top face `thickness` above it, and one side face per
//! profile edge.

use nalgebra::{Point3, Vector3};

use crate::arena::Document;
use crate::error::{Error, GraphError, Result, ValidationError};
use crate::keys::{EntityKey, EntityType};
use crate::traversal::LoopState;

/// A planar polygon with optional holes.
#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub outer: Vec<Point3<f64>>,
    pub holes: Vec<Vec<Point3<f64>>>,
    pub normal: Vector3<f64>,
}

impl Face {
    /// Builds a face, or `None` when the outline is degenerate.
    pub fn new(outer: Vec<Point3<f64>>, holes: Vec<Vec<Point3<f64>>>) -> Option<Self> {
        let normal = newell_normal(&outer)?;
        Some(Self {
            outer,
            holes,
            normal,
        })
    }

    /// Area of the outline minus the holes.
    pub fn area(&self) -> f64 {
        let outer = polygon_area(&self.outer);
        let holes: f64 = self.holes.iter().map(|h| polygon_area(h)).sum();
        (outer - holes).max(0.0)
    }

    /// All points, outline first, then each hole in order. Triangle indices
    /// from [`triangulate`](Self::triangulate) refer to this sequence.
    pub fn points(&self) -> impl Iterator<Item = &Point3<f64>> {
        self.outer.iter().chain(self.holes.iter().flatten())
    }

    /// Ear-clips the face after projecting it onto its dominant plane.
    pub fn triangulate(&self) -> Option<Vec<[usize; 3]>> {
        if self.outer.len() < 3 {
            return None;
        }
        let abs_n = self.normal.abs();
        let (ax_u, ax_v) = if abs_n.z >= abs_n.x && abs_n.z >= abs_n.y {
            (0, 1)
        } else if abs_n.y >= abs_n.x {
            (0, 2)
        } else {
            (1, 2)
        };

        let mut coords = Vec::new();
        let mut hole_indices = Vec::with_capacity(self.holes.len());
        for p in &self.outer {
            coords.push(p[ax_u]);
            coords.push(p[ax_v]);
        }
        let mut count = self.outer.len();
        for hole in &self.holes {
            hole_indices.push(count);
            count += hole.len();
            for p in hole {
                coords.push(p[ax_u]);
                coords.push(p[ax_v]);
            }
        }

        let indices = earcutr::earcut(&coords, &hole_indices, 2).ok()?;
        Some(
            indices
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
        )
    }
}

/// Faces derived from a profile extruded between two elevations.
#[derive(Debug, Clone, PartialEq)]
pub struct SlabFaces {
    /// Facing down, at the base elevation.
    pub bottom: Face,
    /// Facing up, `thickness` above the base.
    pub top: Face,
    /// One face per profile edge, outer boundary and holes alike.
    pub sides: Vec<Face>,
}

impl SlabFaces {
    pub fn iter(&self) -> impl Iterator<Item = &Face> {
        std::iter::once(&self.bottom)
            .chain(std::iter::once(&self.top))
            .chain(self.sides.iter())
    }
}

/// A closed shell made of planar faces.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub faces: Vec<Face>,
}

impl Body {
    pub fn surface_area(&self) -> f64 {
        self.faces.iter().map(Face::area).sum()
    }

    /// Triangle soup of the whole shell.
    pub fn triangles(&self) -> Option<Vec<[Point3<f64>; 3]>> {
        let mut out = Vec::new();
        for face in &self.faces {
            let points: Vec<Point3<f64>> = face.points().copied().collect();
            for [a, b, c] in face.triangulate()? {
                out.push([points[a], points[b], points[c]]);
            }
        }
        Some(out)
    }
}

impl From<SlabFaces> for Body {
    fn from(faces: SlabFaces) -> Self {
        let mut all = Vec::with_capacity(faces.sides.len() + 2);
        all.push(faces.bottom);
        all.push(faces.top);
        all.extend(faces.sides);
        Body { faces: all }
    }
}

/// Polygon normal by Newell's method; `None` for degenerate polygons.
pub fn newell_normal(points: &[Point3<f64>]) -> Option<Vector3<f64>> {
    if points.len() < 3 {
        return None;
    }
    let mut normal = Vector3::<f64>::zeros();
    let n = points.len();
    for i in 0..n {
        let curr = points[i];
        let next = points[(i + 1) % n];
        normal.x += (curr.y - next.y) * (curr.z + next.z);
        normal.y += (curr.z - next.z) * (curr.x + next.x);
        normal.z += (curr.x - next.x) * (curr.y + next.y);
    }
    let len = normal.norm();
    if len < 1e-15 {
        return None;
    }
    Some(normal / len)
}

/// Unsigned area of a planar polygon.
pub fn polygon_area(points: &[Point3<f64>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let p0 = points[0];
    let mut total = Vector3::zeros();
    for i in 1..points.len() - 1 {
        total += (points[i] - p0).cross(&(points[i + 1] - p0));
    }
    total.norm() / 2.0
}

/// Shoelace area of the polygon's XY projection; positive when
/// counter-clockwise.
pub fn signed_area_xy(points: &[Point3<f64>]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice / 2.0
}

/// Extrudes an XY outline into a prism between `base` and `base + thickness`.
///
/// The outline is made counter-clockwise and holes clockwise first, so the
/// top face points up and every side face points out of the solid.
pub fn extrude_prism(
    outline: &[Point3<f64>],
    holes: &[Vec<Point3<f64>>],
    base: f64,
    thickness: f64,
) -> Option<SlabFaces> {
    let at = |points: &[Point3<f64>], z: f64| -> Vec<Point3<f64>> {
        points.iter().map(|p| Point3::new(p.x, p.y, z)).collect()
    };
    let oriented = |points: &[Point3<f64>], ccw: bool| -> Vec<Point3<f64>> {
        let mut v = points.to_vec();
        if (signed_area_xy(&v) > 0.0) != ccw {
            v.reverse();
        }
        v
    };

    let outer = oriented(outline, true);
    let inner: Vec<Vec<Point3<f64>>> = holes.iter().map(|h| oriented(h, false)).collect();
    let top_z = base + thickness;

    let top = Face::new(
        at(&outer, top_z),
        inner.iter().map(|h| at(h, top_z)).collect(),
    )?;
    let reversed = |points: &[Point3<f64>]| -> Vec<Point3<f64>> {
        let mut v = at(points, base);
        v.reverse();
        v
    };
    let bottom = Face::new(
        reversed(&outer),
        inner.iter().map(|h| reversed(h)).collect(),
    )?;

    let mut sides = Vec::new();
    for ring in std::iter::once(&outer).chain(inner.iter()) {
        let n = ring.len();
        for i in 0..n {
            let (a, b) = (ring[i], ring[(i + 1) % n]);
            let quad = vec![
                Point3::new(a.x, a.y, base),
                Point3::new(b.x, b.y, base),
                Point3::new(b.x, b.y, top_z),
                Point3::new(a.x, a.y, top_z),
            ];
            if let Some(face) = Face::new(quad, Vec::new()) {
                sides.push(face);
            }
        }
    }

    Some(SlabFaces { bottom, top, sides })
}

impl Document {
    /// Returns the 3D position of a vertex.
    pub fn vertex_point(&self, key: EntityKey) -> Option<Point3<f64>> {
        self.entities
            .get(key)?
            .as_vertex()
            .map(|v| Point3::new(v.x, v.y, v.z))
    }

    /// Positions of the loop's vertices in traversal order, whatever its state.
    pub fn loop_points(&self, lp: EntityKey) -> Result<Vec<Point3<f64>>> {
        self.loop_vertices(lp)?
            .into_iter()
            .map(|v| {
                self.vertex_point(v)
                    .ok_or_else(|| Error::from(GraphError::NotFound(v)))
            })
            .collect()
    }

    /// Signed XY area enclosed by a loop; positive when counter-clockwise.
    pub fn signed_area(&self, lp: EntityKey) -> Result<f64> {
        Ok(signed_area_xy(&self.loop_points(lp)?))
    }

    pub fn is_ccw(&self, lp: EntityKey) -> Result<bool> {
        Ok(self.signed_area(lp)? > 0.0)
    }

    /// Flips the loop's orientation: every co-edge changes direction and its
    /// `prev`/`next` links are swapped. The root stays the same.
    pub fn reverse_loop(&mut self, lp: EntityKey) -> Result<()> {
        self.expect_live(lp, EntityType::Loop)?;
        let coedges = self.loop_coedges(lp)?;
        for coedge in coedges {
            self.update_coedge(coedge, "reversed", |c| c.reversed = !c.reversed)?;
            self.touch(coedge, "next");
            self.update_coedge(coedge, "prev", |c| std::mem::swap(&mut c.prev, &mut c.next))?;
        }
        self.invalidate_geometry(lp);
        Ok(())
    }

    /// Extrudes a closed profile with optional closed hole loops.
    ///
    /// Fails with [`ValidationError::OpenProfile`] when the profile is not
    /// [`LoopState::Closed`]. Hole loops that are not closed are skipped.
    pub(crate) fn extrude_profile(
        &self,
        owner: EntityKey,
        profile: EntityKey,
        holes: &[EntityKey],
        base: f64,
        thickness: f64,
    ) -> Result<SlabFaces> {
        let state = self.loop_state(profile);
        if state != LoopState::Closed {
            return Err(ValidationError::OpenProfile {
                tag: self.describe(owner),
                state,
            }
            .into());
        }
        let outline = self.loop_points(profile)?;
        let hole_points: Vec<Vec<Point3<f64>>> = holes
            .iter()
            .filter(|&&h| self.loop_state(h) == LoopState::Closed)
            .filter_map(|&h| self.loop_points(h).ok())
            .collect();
        extrude_prism(&outline, &hole_points, base, thickness).ok_or_else(|| {
            ValidationError::DegenerateProfile {
                tag: self.describe(owner),
                area: signed_area_xy(&outline).abs(),
                min: self.config.min_profile_area,
            }
            .into()
        })
    }
}
