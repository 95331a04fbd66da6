// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Slabs and their openings.
//!
//! A slab owns one base profile loop and any number of openings, each with
//! its own profile loop. Its faces are derived from the profile, the opening
//! profiles, the height, and the thickness. The cache is dropped whenever
//! one of them changes, so a stale face is never returned.

use tracing::debug;

use crate::arena::Document;
use crate::entity::{EntityData, OpeningData, SlabData};
use crate::error::{GraphError, Result, ValidationError};
use crate::geometry::SlabFaces;
use crate::keys::{EntityKey, EntityType};
use crate::signal::{SignalEvent, SignalKind};
use crate::traversal::LoopState;

impl Document {
    /// Creates a slab over `profile`, its bottom face at `height`.
    pub fn create_slab(&mut self, profile: EntityKey, height: f64, thickness: f64) -> Result<EntityKey> {
        self.expect_live(profile, EntityType::Loop)?;
        let slab = self.insert_entity(EntityData::Slab(SlabData {
            height,
            thickness,
            ..SlabData::default()
        }));
        self.set_base_profile(slab, profile)?;
        Ok(slab)
    }

    pub fn base_profile(&self, slab: EntityKey) -> std::result::Result<Option<EntityKey>, GraphError> {
        Ok(self.slab(slab)?.base_profile)
    }

    /// Replaces the base profile. The previous loop is released and destroyed
    /// if nothing else owns it.
    pub fn set_base_profile(&mut self, slab: EntityKey, profile: EntityKey) -> Result<()> {
        self.expect_live(slab, EntityType::Slab)?;
        self.expect_live(profile, EntityType::Loop)?;
        let old = self.slab(slab)?.base_profile;
        if old == Some(profile) {
            return Ok(());
        }

        self.add_child(slab, profile)?;
        self.update_slab(slab, "base_profile", |s| s.base_profile = Some(profile))?;
        if let Some(old) = old {
            if self.get(slab)?.children.contains(&old) {
                self.remove_child(slab, old)?;
            }
        }
        debug!(
            slab = %self.describe(slab),
            profile = %self.describe(profile),
            "base profile set"
        );
        Ok(())
    }

    /// Checks that the base profile is a closed loop enclosing at least the
    /// configured minimum area.
    pub fn verify_base_profile(&self, slab: EntityKey) -> std::result::Result<(), ValidationError> {
        let profile = self
            .entities
            .get(slab)
            .and_then(|n| n.as_slab())
            .and_then(|s| s.base_profile);
        self.check_profile(slab, profile)
    }

    pub(crate) fn check_profile(
        &self,
        owner: EntityKey,
        profile: Option<EntityKey>,
    ) -> std::result::Result<(), ValidationError> {
        let tag = self.describe(owner);
        let Some(profile) = profile else {
            return Err(ValidationError::MissingProfile(tag));
        };
        let state = self.loop_state(profile);
        if state != LoopState::Closed {
            return Err(ValidationError::OpenProfile { tag, state });
        }
        let area = self.signed_area(profile).map(f64::abs).unwrap_or(0.0);
        let min = self.config.min_profile_area;
        if area < min {
            return Err(ValidationError::DegenerateProfile { tag, area, min });
        }
        Ok(())
    }

    pub fn set_thickness(&mut self, slab: EntityKey, thickness: f64) -> std::result::Result<(), GraphError> {
        self.update_slab(slab, "thickness", |s| s.thickness = thickness)
    }

    pub fn set_height(&mut self, slab: EntityKey, height: f64) -> std::result::Result<(), GraphError> {
        self.update_slab(slab, "height", |s| s.height = height)
    }

    // --- Openings ---

    /// Creates an opening bounded by `profile`.
    pub fn create_opening(&mut self, profile: EntityKey) -> std::result::Result<EntityKey, GraphError> {
        self.expect_live(profile, EntityType::Loop)?;
        let opening = self.insert_entity(EntityData::Opening(OpeningData {
            profile: Some(profile),
        }));
        self.add_child(opening, profile)?;
        Ok(opening)
    }

    /// Replaces the profile of an opening. The previous loop is released and
    /// destroyed if nothing else owns it; a host slab drops its cached faces.
    pub fn set_opening_profile(&mut self, opening: EntityKey, profile: EntityKey) -> std::result::Result<(), GraphError> {
        self.expect_live(opening, EntityType::Opening)?;
        self.expect_live(profile, EntityType::Loop)?;
        let old = self.opening(opening)?.profile;
        if old == Some(profile) {
            return Ok(());
        }

        self.add_child(opening, profile)?;
        self.update_opening(opening, "profile", |o| o.profile = Some(profile))?;
        if let Some(old) = old {
            if self.get(opening)?.children.contains(&old) {
                self.remove_child(opening, old)?;
            }
        }
        self.invalidate_geometry(opening);
        debug!(
            opening = %self.describe(opening),
            profile = %self.describe(profile),
            "opening profile set"
        );
        Ok(())
    }

    /// Attaches an opening to a slab and raises [`SignalKind::OpeningAdded`].
    pub fn add_opening(&mut self, slab: EntityKey, opening: EntityKey) -> std::result::Result<(), GraphError> {
        self.expect_live(slab, EntityType::Slab)?;
        self.expect_live(opening, EntityType::Opening)?;
        self.add_child(slab, opening)?;
        self.update_slab(slab, "openings", |s| s.openings.insert(opening))?;
        debug!(slab = %self.describe(slab), opening = %self.describe(opening), "opening added");
        self.raise(SignalEvent {
            kind: SignalKind::OpeningAdded,
            host: slab,
            entity: opening,
        });
        Ok(())
    }

    /// Detaches an opening and raises [`SignalKind::OpeningRemoved`]. The
    /// opening is destroyed if the slab was its last owner.
    pub fn remove_opening(&mut self, slab: EntityKey, opening: EntityKey) -> std::result::Result<(), GraphError> {
        if !self.has_opening(slab, opening) {
            return Err(GraphError::NotChild {
                parent: self.describe(slab),
                child: self.describe(opening),
            });
        }
        self.update_slab(slab, "openings", |s| s.openings.remove(&opening))?;
        if self.get(slab)?.children.contains(&opening) {
            self.remove_child(slab, opening)?;
        }
        debug!(slab = %self.describe(slab), opening = %self.describe(opening), "opening removed");
        self.raise(SignalEvent {
            kind: SignalKind::OpeningRemoved,
            host: slab,
            entity: opening,
        });
        Ok(())
    }

    pub fn has_opening(&self, slab: EntityKey, opening: EntityKey) -> bool {
        self.slab(slab).is_ok_and(|s| s.openings.contains(&opening))
    }

    pub fn openings(&self, slab: EntityKey) -> std::result::Result<Vec<EntityKey>, GraphError> {
        Ok(self.slab(slab)?.openings.iter().copied().collect())
    }

    // --- Faces ---

    /// Faces of the slab: the cached ones when present, otherwise computed
    /// from the current profile, openings, height, and thickness.
    pub fn slab_faces(&self, slab: EntityKey) -> Result<SlabFaces> {
        let data = self.expect_live(slab, EntityType::Slab)?;
        let data = data.as_slab().ok_or(GraphError::NotFound(slab))?;
        if let Some(faces) = &data.faces {
            return Ok(faces.clone());
        }
        self.compute_slab_faces(slab, data)
    }

    /// Recomputes the faces and stores them in the cache.
    pub fn update_faces(&mut self, slab: EntityKey) -> Result<()> {
        let data = self.slab(slab)?;
        let faces = self.compute_slab_faces(slab, data)?;
        if let EntityData::Slab(s) = &mut self.get_mut(slab)?.data {
            s.faces = Some(faces);
        }
        Ok(())
    }

    fn compute_slab_faces(&self, slab: EntityKey, data: &SlabData) -> Result<SlabFaces> {
        self.verify_base_profile(slab)?;
        let profile = data
            .base_profile
            .ok_or_else(|| ValidationError::MissingProfile(self.describe(slab)))?;
        let holes: Vec<EntityKey> = data
            .openings
            .iter()
            .filter_map(|&o| self.entities.get(o).and_then(|n| n.as_opening()))
            .filter_map(|o| o.profile)
            .collect();
        self.extrude_profile(slab, profile, &holes, data.height, data.thickness)
    }
}
