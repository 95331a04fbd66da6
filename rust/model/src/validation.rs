// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Invariant checks.
//!
//! `validate` looks at a single entity, `verify` at the entity and its whole
//! ownership subtree. Violations are returned as [`ValidationError`]s and
//! logged with the offending tag; the log level follows the configured
//! [`Strictness`].

use rustc_hash::FxHashSet;
use tracing::{error, info, warn};

use crate::arena::Document;
use crate::config::Strictness;
use crate::entity::EntityData;
use crate::error::{TraversalError, ValidationError};
use crate::keys::{EntityKey, EntityType};

impl ValidationError {
    /// Tag of the entity the violation is about.
    pub fn subject(&self) -> &str {
        match self {
            ValidationError::UnsupportedFlag { tag, .. }
            | ValidationError::WrongParentCount { tag, .. }
            | ValidationError::OwnershipAsymmetry { tag, .. }
            | ValidationError::DanglingReference { tag, .. }
            | ValidationError::OpenProfile { tag, .. }
            | ValidationError::DegenerateProfile { tag, .. } => tag,
            ValidationError::PartnerMismatch { edge, .. }
            | ValidationError::PrimaryCoEdgeMismatch { edge } => edge,
            ValidationError::LinkMismatch { loop_tag, .. }
            | ValidationError::Disconnected { loop_tag, .. }
            | ValidationError::ForeignCoEdge { loop_tag, .. } => loop_tag,
            ValidationError::MissingProfile(tag) => tag,
            ValidationError::OrphanedOpening { slab, .. } => slab,
            ValidationError::Traversal(
                TraversalError::Broken { loop_tag, .. }
                | TraversalError::Cycle { loop_tag, .. }
                | TraversalError::Dangling { loop_tag, .. },
            ) => loop_tag,
        }
    }
}

impl Document {
    /// Checks one entity's invariants and logs every violation.
    pub fn validate(&self, key: EntityKey) -> bool {
        let violations = self.entity_violations(key);
        for violation in &violations {
            self.report(violation);
        }
        violations.is_empty()
    }

    /// Checks an edge, re-deriving its primary co-edge first when `auto_fix`
    /// is set.
    pub fn validate_edge(&mut self, edge: EntityKey, auto_fix: bool) -> bool {
        if auto_fix {
            self.fix_edge(edge);
        }
        self.validate(edge)
    }

    /// Checks an entity and its whole ownership subtree.
    ///
    /// With `auto_fix`, deterministic repairs are applied first. Without it
    /// the document is not modified, so repeated calls agree.
    pub fn verify(&mut self, key: EntityKey, auto_fix: bool) -> bool {
        if auto_fix {
            for k in self.subtree(key) {
                if self.entities.get(k).is_some_and(|n| n.kind() == EntityType::Edge) {
                    self.fix_edge(k);
                }
            }
        }
        let violations = self.collect_violations(key);
        for violation in &violations {
            self.report(violation);
        }
        violations.is_empty()
    }

    /// All violations in an entity's subtree, without logging.
    pub fn collect_violations(&self, key: EntityKey) -> Vec<ValidationError> {
        self.subtree(key)
            .into_iter()
            .flat_map(|k| self.entity_violations(k))
            .collect()
    }

    /// The entity and every live descendant, each once.
    fn subtree(&self, key: EntityKey) -> Vec<EntityKey> {
        let mut visited = FxHashSet::default();
        let mut order = Vec::new();
        let mut pending = vec![key];
        while let Some(k) = pending.pop() {
            if !self.is_live(k) || !visited.insert(k) {
                continue;
            }
            order.push(k);
            if let Some(node) = self.entities.get(k) {
                pending.extend(node.children.iter().copied());
            }
        }
        order
    }

    pub(crate) fn report(&self, violation: &ValidationError) {
        let tag = violation.subject();
        let kind = self
            .key_by_tag(tag)
            .and_then(|k| self.entities.get(k))
            .map(|n| n.kind().as_str())
            .unwrap_or("unknown");
        match self.config.strictness {
            Strictness::Lenient => warn!(tag, kind, reason = %violation, "invariant violated"),
            Strictness::Strict => error!(tag, kind, reason = %violation, "invariant violated"),
        }
    }

    /// Violations of a single live entity.
    pub(crate) fn entity_violations(&self, key: EntityKey) -> Vec<ValidationError> {
        let Some(node) = self.entities.get(key).filter(|n| !n.is_removed()) else {
            return Vec::new();
        };
        let tag = node.tag.clone();
        let mut out = Vec::new();

        for &parent in &node.parents {
            let linked = self
                .entities
                .get(parent)
                .is_some_and(|p| p.children.contains(&key));
            if !linked {
                out.push(ValidationError::OwnershipAsymmetry {
                    tag: tag.clone(),
                    other: self.describe(parent),
                });
            }
        }
        for &child in &node.children {
            match self.entities.get(child) {
                None => out.push(ValidationError::DanglingReference {
                    tag: tag.clone(),
                    field: "children",
                }),
                Some(c) if !c.parents.contains(&key) => {
                    out.push(ValidationError::OwnershipAsymmetry {
                        tag: tag.clone(),
                        other: c.tag.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        let mut dangling = |field: &'static str, target: Option<EntityKey>| {
            if let Some(target) = target {
                if !self.is_live(target) {
                    out.push(ValidationError::DanglingReference {
                        tag: tag.clone(),
                        field,
                    });
                }
            }
        };
        match &node.data {
            EntityData::Vertex(_) => {}
            EntityData::Edge(e) => {
                dangling("from", Some(e.from));
                dangling("to", Some(e.to));
            }
            EntityData::CoEdge(c) => {
                dangling("edge", Some(c.edge));
                dangling("prev", c.prev);
                dangling("next", c.next);
                dangling("partner", c.partner);
            }
            EntityData::Loop(l) => dangling("root", l.root),
            EntityData::Opening(o) => dangling("profile", o.profile),
            EntityData::Slab(s) => dangling("base_profile", s.base_profile),
            EntityData::RoomRegion(r) => dangling("co_edge_path", r.co_edge_path),
        }

        match &node.data {
            EntityData::Edge(_) => out.extend(self.edge_violations(key)),
            EntityData::Loop(_) => out.extend(self.loop_violations(key)),
            EntityData::Opening(o) if o.profile.is_none() => {
                out.push(ValidationError::MissingProfile(tag.clone()))
            }
            EntityData::Slab(s) => {
                if let Err(err) = self.verify_base_profile(key) {
                    out.push(err);
                }
                for &opening in &s.openings {
                    if !node.children.contains(&opening) {
                        out.push(ValidationError::OrphanedOpening {
                            slab: tag.clone(),
                            opening: self.describe(opening),
                        });
                    }
                }
            }
            EntityData::RoomRegion(r) => {
                if let Err(err) = self.check_profile(key, r.co_edge_path) {
                    out.push(err);
                }
            }
            _ => {}
        }
        out
    }

    /// An edge has one or two co-edge parents. Two must be mutual partners,
    /// and the primary co-edge must be one of the parents.
    fn edge_violations(&self, edge: EntityKey) -> Vec<ValidationError> {
        let Some(node) = self.entities.get(edge) else {
            return Vec::new();
        };
        let Some(data) = node.as_edge() else {
            return Vec::new();
        };
        let coedges: Vec<EntityKey> = node
            .parents
            .iter()
            .copied()
            .filter(|&p| self.entities.get(p).is_some_and(|n| n.kind() == EntityType::CoEdge))
            .collect();

        let mut out = Vec::new();
        match coedges.as_slice() {
            [only] => {
                if data.coedge != Some(*only) {
                    out.push(ValidationError::PrimaryCoEdgeMismatch {
                        edge: node.tag.clone(),
                    });
                }
            }
            [first, second] => {
                let partner_of = |k: EntityKey| {
                    self.entities
                        .get(k)
                        .and_then(|n| n.as_coedge())
                        .and_then(|c| c.partner)
                };
                if partner_of(*first) != Some(*second) || partner_of(*second) != Some(*first) {
                    out.push(ValidationError::PartnerMismatch {
                        edge: node.tag.clone(),
                        first: self.describe(*first),
                        second: self.describe(*second),
                    });
                }
                if !data.coedge.is_some_and(|c| c == *first || c == *second) {
                    out.push(ValidationError::PrimaryCoEdgeMismatch {
                        edge: node.tag.clone(),
                    });
                }
            }
            other => out.push(ValidationError::WrongParentCount {
                tag: node.tag.clone(),
                count: other.len(),
            }),
        }
        out
    }

    /// Consecutive co-edges link both ways and meet at a shared vertex; each
    /// co-edge is owned by this loop only.
    fn loop_violations(&self, lp: EntityKey) -> Vec<ValidationError> {
        let coedges = match self.loop_coedges(lp) {
            Ok(c) => c,
            Err(err) => return vec![ValidationError::Traversal(err)],
        };
        let loop_tag = self.describe(lp);
        let mut out = Vec::new();
        let n = coedges.len();
        for i in 0..n {
            let prev = coedges[i];
            let current = coedges[(i + 1) % n];
            let back = self
                .entities
                .get(current)
                .and_then(|c| c.as_coedge())
                .and_then(|c| c.prev);
            if back != Some(prev) {
                out.push(ValidationError::LinkMismatch {
                    loop_tag: loop_tag.clone(),
                    prev: self.describe(prev),
                    current: self.describe(current),
                });
            }
            let to = self.coedge_to(prev);
            if to.is_none() || to != self.coedge_from(current) {
                out.push(ValidationError::Disconnected {
                    loop_tag: loop_tag.clone(),
                    prev: self.describe(prev),
                    current: self.describe(current),
                });
            }
            if self.entities.get(current).and_then(|c| c.unique_parent()) != Some(lp) {
                out.push(ValidationError::ForeignCoEdge {
                    loop_tag: loop_tag.clone(),
                    coedge: self.describe(current),
                });
            }
        }
        out
    }

    /// Repairs an edge's primary co-edge reference and one-sided partner
    /// links. Returns `true` if anything changed.
    fn fix_edge(&mut self, edge: EntityKey) -> bool {
        let Some(node) = self.entities.get(edge) else {
            return false;
        };
        let Some(data) = node.as_edge() else {
            return false;
        };
        let coedges: Vec<EntityKey> = node
            .parents
            .iter()
            .copied()
            .filter(|&p| self.entities.get(p).is_some_and(|n| n.kind() == EntityType::CoEdge))
            .collect();
        let tag = node.tag.clone();
        let mut fixed = false;

        if let Some(&first) = coedges.first() {
            let primary_ok = data.coedge.is_some_and(|c| coedges.contains(&c));
            if coedges.len() <= 2
                && !primary_ok
                && self.update_edge(edge, "coedge", |e| e.coedge = Some(first)).is_ok()
            {
                info!(tag = %tag, coedge = %self.describe(first), "re-derived primary co-edge");
                fixed = true;
            }
        }

        if let [a, b] = coedges[..] {
            let partner_of = |doc: &Document, k: EntityKey| doc.coedge(k).ok().and_then(|c| c.partner);
            let (pa, pb) = (partner_of(self, a), partner_of(self, b));
            let one_sided = (pa == Some(b) && pb.is_none()) || (pb == Some(a) && pa.is_none());
            if one_sided && self.set_partner(a, b).is_ok() {
                info!(tag = %tag, "completed one-sided partner link");
                fixed = true;
            }
        }
        fixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_edge(doc: &mut Document) -> (EntityKey, EntityKey, EntityKey) {
        let edge = doc.create_edge_between([0.0; 3], [1.0, 0.0, 0.0]).unwrap();
        let a = doc.create_coedge(edge, false).unwrap();
        let b = doc.create_coedge(edge, true).unwrap();
        (edge, a, b)
    }

    fn corrupt_partner(doc: &mut Document, coedge: EntityKey, partner: Option<EntityKey>) {
        if let Some(EntityData::CoEdge(c)) = doc.entities.get_mut(coedge).map(|n| &mut n.data) {
            c.partner = partner;
        }
    }

    #[test]
    fn paired_edge_is_valid() {
        let mut doc = Document::new();
        let (edge, _, _) = shared_edge(&mut doc);
        assert!(doc.validate(edge));
    }

    #[test]
    fn mismatched_partners_name_both_coedges() {
        let mut doc = Document::new();
        let (edge, a, b) = shared_edge(&mut doc);
        let stray = doc.create_edge_between([5.0; 3], [6.0; 3]).unwrap();
        let stray_coedge = doc.create_coedge(stray, false).unwrap();
        corrupt_partner(&mut doc, b, Some(stray_coedge));

        assert!(!doc.validate(edge));
        let violations = doc.collect_violations(edge);
        let text = violations
            .iter()
            .find(|v| matches!(v, ValidationError::PartnerMismatch { .. }))
            .unwrap()
            .to_string();
        assert!(text.contains(doc.tag(a).unwrap()));
        assert!(text.contains(doc.tag(b).unwrap()));
    }

    #[test]
    fn bare_edge_has_wrong_parent_count() {
        let mut doc = Document::new();
        let edge = doc.create_edge_between([0.0; 3], [1.0, 0.0, 0.0]).unwrap();
        assert!(matches!(
            doc.collect_violations(edge).as_slice(),
            [ValidationError::WrongParentCount { count: 0, .. }]
        ));
    }

    #[test]
    fn auto_fix_rederives_primary_coedge() {
        let mut doc = Document::new();
        let (edge, a, _) = shared_edge(&mut doc);
        if let Some(EntityData::Edge(e)) = doc.entities.get_mut(edge).map(|n| &mut n.data) {
            e.coedge = None;
        }
        assert!(!doc.validate(edge));
        assert!(doc.validate_edge(edge, true));
        assert_eq!(doc.edge(edge).unwrap().coedge, Some(a));
    }

    #[test]
    fn auto_fix_completes_one_sided_partner() {
        let mut doc = Document::new();
        let (edge, a, b) = shared_edge(&mut doc);
        corrupt_partner(&mut doc, b, None);
        assert!(!doc.verify(edge, false));
        assert!(doc.verify(edge, true));
        assert_eq!(doc.coedge(b).unwrap().partner, Some(a));
    }

    #[test]
    fn verify_is_idempotent() {
        let mut doc = Document::new();
        let lp = doc
            .loop_from_points(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0]])
            .unwrap();
        let first = doc.verify(lp, false);
        let second = doc.verify(lp, false);
        assert!(first);
        assert_eq!(first, second);

        let root = doc.loop_data(lp).unwrap().root.unwrap();
        if let Some(EntityData::CoEdge(c)) = doc.entities.get_mut(root).map(|n| &mut n.data) {
            c.prev = None;
        }
        let first = doc.verify(lp, false);
        assert!(!first);
        assert_eq!(first, doc.verify(lp, false));
    }

    #[test]
    fn broken_loop_reports_traversal_failure() {
        let mut doc = Document::new();
        let lp = doc
            .loop_from_points(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0]])
            .unwrap();
        let coedges = doc.loop_coedges(lp).unwrap();
        if let Some(EntityData::CoEdge(c)) = doc.entities.get_mut(coedges[2]).map(|n| &mut n.data) {
            c.next = Some(coedges[1]);
        }
        let violations = doc.collect_violations(lp);
        assert!(violations
            .iter()
            .any(|v| matches!(v, ValidationError::Traversal(TraversalError::Cycle { .. }))));
    }
}
