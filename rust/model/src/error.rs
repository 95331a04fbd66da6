// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for entity graph, topology, and transaction operations.
//!
//! The taxonomy has three families:
//! - [`GraphError`]: structural violations. Fatal to the current operation;
//!   mutations check them before writing anything.
//! - [`ValidationError`]: semantic violations found by `validate`/`verify`.
//!   Usually reported as a boolean plus a logged diagnostic.
//! - [`TransactionError`]: snapshot, restore, and transaction-scope failures.

use crate::entity::EntityFlag;
use crate::field::FieldValueType;
use crate::keys::{EntityKey, EntityType};
use crate::traversal::LoopState;

/// Result type alias for document operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while walking a loop's co-edge ring.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TraversalError {
    /// A co-edge has no `next` link, so the ring never closes.
    #[error("co-edge {coedge} in loop {loop_tag} has no successor")]
    Broken { loop_tag: String, coedge: String },

    /// A co-edge was reached twice before the walk returned to the root.
    #[error("co-edge {coedge} revisited before returning to the root of loop {loop_tag}")]
    Cycle { loop_tag: String, coedge: String },

    /// A `next` link points at a key that is not a live co-edge.
    #[error("loop {loop_tag} links to a missing co-edge {key:?}")]
    Dangling { loop_tag: String, key: EntityKey },
}

/// Structural violations of the entity graph.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// A referenced entity is not in the arena.
    #[error("entity not found: {0:?}")]
    NotFound(EntityKey),

    /// A tag does not resolve to an entity.
    #[error("no entity is registered under tag {0}")]
    UnknownTag(String),

    /// The entity exists but has a different kind.
    #[error("entity {tag} is a {found}, expected {expected}")]
    WrongKind {
        tag: String,
        expected: EntityType,
        found: EntityType,
    },

    /// `add_child` on a link that already exists.
    #[error("{child} is already a child of {parent}")]
    AlreadyChild { parent: String, child: String },

    /// `remove_child` on a link that does not exist.
    #[error("{child} is not a child of {parent}")]
    NotChild { parent: String, child: String },

    /// An entity cannot own itself.
    #[error("entity {0} cannot be its own child")]
    SelfOwnership(String),

    /// The operation needs a live entity but it is soft-deleted.
    #[error("entity {0} has been removed")]
    Removed(String),

    /// An edge already carries two co-edges.
    #[error("edge {0} already has two co-edges")]
    EdgeSaturated(String),

    /// Two co-edges cannot be partners because they run over different edges
    /// or in the same direction.
    #[error("co-edges {0} and {1} cannot be partnered")]
    InvalidPartner(String, String),

    /// A co-edge belongs to a different loop than the one being edited.
    #[error("co-edge {coedge} does not belong to loop {loop_tag}")]
    ForeignCoEdge { loop_tag: String, coedge: String },

    /// Too few points to build the requested structure.
    #[error("at least {required} points are required, got {actual}")]
    TooFewPoints { required: usize, actual: usize },

    /// A loop walk found corruption.
    #[error(transparent)]
    Traversal(#[from] TraversalError),
}

/// Semantic violations found by validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The entity kind refuses the flag.
    #[error("{tag} does not support the {flag:?} flag")]
    UnsupportedFlag { tag: String, flag: EntityFlag },

    /// An edge has a number of co-edge parents other than one or two.
    #[error("edge {tag} has {count} co-edge parents, expected 1 or 2")]
    WrongParentCount { tag: String, count: usize },

    /// The two co-edges of an edge are not reciprocal partners.
    #[error("edge {edge} co-edges {first} and {second} are not mutual partners")]
    PartnerMismatch {
        edge: String,
        first: String,
        second: String,
    },

    /// The edge's primary co-edge reference is missing or not one of its parents.
    #[error("edge {edge} primary co-edge reference is not one of its parents")]
    PrimaryCoEdgeMismatch { edge: String },

    /// Consecutive co-edges disagree on their `prev`/`next` links.
    #[error("loop {loop_tag}: {prev} and {current} are not linked both ways")]
    LinkMismatch {
        loop_tag: String,
        prev: String,
        current: String,
    },

    /// Consecutive co-edges do not meet at a shared vertex.
    #[error("loop {loop_tag}: {prev} does not end where {current} starts")]
    Disconnected {
        loop_tag: String,
        prev: String,
        current: String,
    },

    /// A co-edge in the ring is not uniquely owned by the loop.
    #[error("loop {loop_tag}: co-edge {coedge} is not uniquely owned by the loop")]
    ForeignCoEdge { loop_tag: String, coedge: String },

    /// Parent and child maps disagree.
    #[error("{tag} and {other} disagree about their parent/child link")]
    OwnershipAsymmetry { tag: String, other: String },

    /// A reference field points at a missing or removed entity.
    #[error("{tag}.{field} references a missing entity")]
    DanglingReference { tag: String, field: &'static str },

    /// A composite has no base profile.
    #[error("{0} has no base profile")]
    MissingProfile(String),

    /// A base profile loop is not closed.
    #[error("profile of {tag} is {state:?}, expected Closed")]
    OpenProfile { tag: String, state: LoopState },

    /// A base profile encloses too little area.
    #[error("profile of {tag} encloses area {area}, below the minimum {min}")]
    DegenerateProfile { tag: String, area: f64, min: f64 },

    /// An opening listed by a slab is not one of its children.
    #[error("slab {slab} lists opening {opening} that is not its child")]
    OrphanedOpening { slab: String, opening: String },

    /// A loop walk found corruption.
    #[error(transparent)]
    Traversal(#[from] TraversalError),
}

/// Transaction scope and snapshot/restore failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransactionError {
    /// `begin` while another transaction is open.
    #[error("transaction {0} is already active")]
    AlreadyActive(String),

    /// `commit`/`abort` with no open transaction.
    #[error("no transaction is active")]
    NoActiveTransaction,

    /// `undo`/`redo` while a transaction is open.
    #[error("cannot replay history while transaction {0} is active")]
    Busy(String),

    /// A snapshot references a tag that the registry no longer knows.
    #[error("snapshot references missing entity {0}")]
    MissingEntity(String),

    /// A snapshot value does not match the field's declared type.
    #[error("{tag}.{field} expects a {expected:?} value")]
    FieldTypeMismatch {
        tag: String,
        field: String,
        expected: FieldValueType,
    },

    /// A snapshot names a field the entity kind does not declare.
    #[error("{kind} has no field named {field}")]
    UnknownField { kind: EntityType, field: String },

    /// A snapshot was taken from an entity of another kind.
    #[error("snapshot of {tag} was taken from a {found}, entity is a {expected}")]
    KindMismatch {
        tag: String,
        expected: EntityType,
        found: EntityType,
    },

    /// Strict commit found invariant violations among touched entities.
    #[error("transaction {name} left {count} invariant violation(s): {first}")]
    VerificationFailed {
        name: String,
        count: usize,
        first: Box<ValidationError>,
    },
}

/// Top-level error for document operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Saving was refused because the graph failed verification.
    #[error("refusing to persist: entity {0} failed verification")]
    Unverified(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<TraversalError> for Error {
    fn from(err: TraversalError) -> Self {
        Error::Graph(GraphError::Traversal(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_errors_lift_into_graph_errors() {
        let err: Error = TraversalError::Cycle {
            loop_tag: "lp1".into(),
            coedge: "ce4".into(),
        }
        .into();
        assert!(matches!(err, Error::Graph(GraphError::Traversal(_))));
        assert!(err.to_string().contains("ce4"));
    }

    #[test]
    fn messages_name_entity_tags() {
        let err = ValidationError::PartnerMismatch {
            edge: "e7".into(),
            first: "ce1".into(),
            second: "ce2".into(),
        };
        let text = err.to_string();
        assert!(text.contains("e7"));
        assert!(text.contains("ce1"));
        assert!(text.contains("ce2"));
    }
}
