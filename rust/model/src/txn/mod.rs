// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transactions, undo and redo.
//!
//! While a transaction is open, every tracked write goes through
//! [`Document::touch`] first, which records the field's pre-change value in
//! the entity's [`EntityTxnState`]. Creations, deletions, and recycling are
//! recorded by the operations that cause them. Committing freezes the
//! "after" side and pushes the transaction on the undo stack.
//!
//! Undo and redo run in two phases. The first phase checks that every tag
//! in the snapshots still resolves and that every entity still has the
//! recorded kind; only then does the second phase write anything, so a
//! failed replay leaves the document untouched.

mod state;

use std::collections::{BTreeSet, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, error, info, warn};

use crate::arena::Document;
use crate::config::Strictness;
use crate::entity::EntityNode;
use crate::error::TransactionError;
use crate::field::field;
use crate::keys::{EntityKey, EntityType};
use crate::signal::{SignalEvent, SignalKind};

pub(crate) use state::full_snapshot;
pub use state::{EntityTxnState, Snapshot, TxnDirection, TxnType};

/// A named group of entity states, committed or replayed as one unit.
#[derive(Debug)]
pub struct Transaction {
    name: String,
    states: Vec<EntityTxnState>,
    index: FxHashMap<EntityKey, usize>,
}

impl Transaction {
    fn new(name: String) -> Self {
        Self {
            name,
            states: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entity states in the order the entities were first touched.
    pub fn states(&self) -> &[EntityTxnState] {
        &self.states
    }

    pub fn state(&self, key: EntityKey) -> Option<&EntityTxnState> {
        self.index.get(&key).map(|&i| &self.states[i])
    }

    fn state_entry(
        &mut self,
        key: EntityKey,
        node: &EntityNode,
        txn_type: TxnType,
    ) -> &mut EntityTxnState {
        let idx = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                self.states.push(EntityTxnState::new(key, node, txn_type));
                let i = self.states.len() - 1;
                self.index.insert(key, i);
                i
            }
        };
        &mut self.states[idx]
    }

    fn reindex(&mut self) {
        self.index = self
            .states
            .iter()
            .enumerate()
            .map(|(i, s)| (s.key, i))
            .collect();
    }
}

/// Active transaction plus the undo and redo stacks.
#[derive(Debug, Default)]
pub(crate) struct TxnManager {
    active: Option<Transaction>,
    undo_stack: VecDeque<Transaction>,
    redo_stack: Vec<Transaction>,
}

impl TxnManager {
    fn all(&self) -> impl Iterator<Item = &Transaction> {
        self.active
            .iter()
            .chain(self.undo_stack.iter())
            .chain(self.redo_stack.iter())
    }

    /// Tags mentioned by any transaction still in the window.
    fn referenced_tags(&self) -> FxHashSet<String> {
        self.all()
            .flat_map(|t| t.states.iter())
            .flat_map(EntityTxnState::referenced_tags)
            .map(str::to_string)
            .collect()
    }
}

impl Document {
    // --- Scope ---

    /// Opens a transaction. Only one transaction can be open at a time.
    pub fn begin(&mut self, name: impl Into<String>) -> Result<(), TransactionError> {
        if let Some(active) = &self.txn.active {
            return Err(TransactionError::AlreadyActive(active.name.clone()));
        }
        let name = name.into();
        debug!(txn = %name, "transaction started");
        self.txn.active = Some(Transaction::new(name));
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.active.is_some()
    }

    pub fn active_transaction(&self) -> Option<&Transaction> {
        self.txn.active.as_ref()
    }

    /// Closes the active transaction and makes it undoable.
    ///
    /// Entities created and destroyed inside the transaction are purged, and
    /// states whose entity ended up unchanged are dropped; a transaction with
    /// nothing left is not recorded. Committing clears the redo stack.
    ///
    /// With [`Strictness::Strict`], every live touched entity is validated
    /// first; on any violation the transaction is rolled back and
    /// `VerificationFailed` is returned.
    pub fn commit(&mut self) -> Result<(), TransactionError> {
        let mut txn = self
            .txn
            .active
            .take()
            .ok_or(TransactionError::NoActiveTransaction)?;

        if self.config.strictness == Strictness::Strict {
            let violations: Vec<_> = txn
                .states
                .iter()
                .filter(|s| self.is_live(s.key))
                .flat_map(|s| self.entity_violations(s.key))
                .collect();
            if let Some(first) = violations.first().cloned() {
                for violation in &violations {
                    self.report(violation);
                }
                error!(
                    txn = %txn.name,
                    count = violations.len(),
                    "commit rejected, rolling back"
                );
                let name = txn.name.clone();
                let count = violations.len();
                self.rollback(txn);
                return Err(TransactionError::VerificationFailed {
                    name,
                    count,
                    first: Box::new(first),
                });
            }
        }

        let mut doomed = Vec::new();
        let mut kept = Vec::with_capacity(txn.states.len());
        for mut state in txn.states.drain(..) {
            let Some(node) = self.entities.get(state.key) else {
                continue;
            };
            if state.txn_type == TxnType::Creation && node.is_removed() {
                doomed.push(state.key);
                continue;
            }
            if state.commit(node, &self.entities) {
                kept.push(state);
            }
        }
        for key in doomed {
            self.purge(key);
        }
        txn.states = kept;
        txn.reindex();

        self.signals.flush();

        if txn.states.is_empty() {
            debug!(txn = %txn.name, "transaction left no changes, not recorded");
            return Ok(());
        }
        debug!(txn = %txn.name, entities = txn.states.len(), "transaction committed");

        self.retire_redo();
        self.txn.undo_stack.push_back(txn);
        self.trim_undo_window();
        Ok(())
    }

    /// Discards the active transaction, restoring every touched entity.
    ///
    /// Entities created inside the transaction are purged and queued signals
    /// are dropped.
    pub fn abort(&mut self) -> Result<(), TransactionError> {
        let txn = self
            .txn
            .active
            .take()
            .ok_or(TransactionError::NoActiveTransaction)?;
        debug!(txn = %txn.name, entities = txn.states.len(), "transaction aborted");
        self.rollback(txn);
        Ok(())
    }

    /// Runs `f` inside a transaction, committing on success and aborting on
    /// error.
    pub fn with_transaction<T>(
        &mut self,
        name: impl Into<String>,
        f: impl FnOnce(&mut Self) -> crate::Result<T>,
    ) -> crate::Result<T> {
        self.begin(name)?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                self.abort()?;
                Err(err)
            }
        }
    }

    fn rollback(&mut self, txn: Transaction) {
        for state in txn.states.iter().rev() {
            let snapshot = state.snapshot_for(TxnDirection::Undo);
            if let Err(err) = self.apply_snapshot(state.key, &snapshot) {
                warn!(tag = %state.tag, error = %err, "could not roll back entity");
            }
        }
        for state in &txn.states {
            if state.txn_type == TxnType::Creation {
                self.purge(state.key);
            } else {
                self.invalidate_geometry(state.key);
            }
        }
        self.signals.discard();
    }

    // --- History ---

    pub fn can_undo(&self) -> bool {
        !self.txn.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.txn.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.txn.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.txn.redo_stack.len()
    }

    /// The most recently committed (or redone) transaction.
    pub fn last_transaction(&self) -> Option<&Transaction> {
        self.txn.undo_stack.back()
    }

    /// Reverts the last committed transaction.
    ///
    /// Returns `Ok(false)` when there is nothing to undo. On error the
    /// document is unchanged and the transaction stays on the undo stack.
    pub fn undo(&mut self) -> Result<bool, TransactionError> {
        if let Some(active) = &self.txn.active {
            return Err(TransactionError::Busy(active.name.clone()));
        }
        let Some(mut txn) = self.txn.undo_stack.pop_back() else {
            return Ok(false);
        };
        match self.replay(&mut txn, TxnDirection::Undo) {
            Ok(()) => {
                debug!(txn = %txn.name, "undone");
                self.txn.redo_stack.push(txn);
                Ok(true)
            }
            Err(err) => {
                error!(txn = %txn.name, error = %err, "undo failed");
                self.txn.undo_stack.push_back(txn);
                Err(err)
            }
        }
    }

    /// Re-applies the last undone transaction.
    pub fn redo(&mut self) -> Result<bool, TransactionError> {
        if let Some(active) = &self.txn.active {
            return Err(TransactionError::Busy(active.name.clone()));
        }
        let Some(mut txn) = self.txn.redo_stack.pop() else {
            return Ok(false);
        };
        match self.replay(&mut txn, TxnDirection::Redo) {
            Ok(()) => {
                debug!(txn = %txn.name, "redone");
                self.txn.undo_stack.push_back(txn);
                Ok(true)
            }
            Err(err) => {
                error!(txn = %txn.name, error = %err, "redo failed");
                self.txn.redo_stack.push(txn);
                Err(err)
            }
        }
    }

    fn replay(&mut self, txn: &mut Transaction, target: TxnDirection) -> Result<(), TransactionError> {
        let order: Vec<usize> = match target {
            TxnDirection::Undo => (0..txn.states.len()).rev().collect(),
            _ => (0..txn.states.len()).collect(),
        };
        let snapshots: Vec<(EntityKey, Snapshot)> = order
            .iter()
            .map(|&i| (txn.states[i].key, txn.states[i].snapshot_for(target)))
            .collect();

        for (&i, (_, snapshot)) in order.iter().zip(&snapshots) {
            self.check_replayable(&txn.states[i], snapshot)?;
        }

        let slabs: Vec<(EntityKey, BTreeSet<EntityKey>)> = txn
            .states
            .iter()
            .filter(|s| s.kind == EntityType::Slab)
            .filter_map(|s| {
                let slab = self.entities.get(s.key)?.as_slab()?;
                Some((s.key, slab.openings.clone()))
            })
            .collect();

        for (key, snapshot) in &snapshots {
            self.apply_snapshot(*key, snapshot)?;
        }
        for state in &mut txn.states {
            state.current_state = target;
        }
        for (key, _) in &snapshots {
            self.invalidate_geometry(*key);
        }

        for (slab, before) in slabs {
            let Some(after) = self.entities.get(slab).and_then(|n| n.as_slab()) else {
                continue;
            };
            let after = after.openings.clone();
            for &opening in after.difference(&before) {
                self.signals.emit(SignalEvent {
                    kind: SignalKind::OpeningAdded,
                    host: slab,
                    entity: opening,
                });
            }
            for &opening in before.difference(&after) {
                self.signals.emit(SignalEvent {
                    kind: SignalKind::OpeningRemoved,
                    host: slab,
                    entity: opening,
                });
            }
        }
        Ok(())
    }

    fn check_replayable(&self, state: &EntityTxnState, snapshot: &Snapshot) -> Result<(), TransactionError> {
        let node = self
            .entities
            .get(state.key)
            .filter(|n| n.tag == state.tag)
            .ok_or_else(|| TransactionError::MissingEntity(state.tag.clone()))?;
        if node.kind() != state.kind {
            return Err(TransactionError::KindMismatch {
                tag: state.tag.clone(),
                expected: node.kind(),
                found: state.kind,
            });
        }
        for (name, value) in snapshot {
            let descriptor = field(state.kind, name).ok_or_else(|| TransactionError::UnknownField {
                kind: state.kind,
                field: name.clone(),
            })?;
            descriptor.check_resolvable(&state.tag, value, &self.registry)?;
        }
        Ok(())
    }

    /// Loads a snapshot onto an entity, resolving tags through the registry.
    pub(crate) fn apply_snapshot(&mut self, key: EntityKey, snapshot: &Snapshot) -> Result<(), TransactionError> {
        let Document {
            entities, registry, ..
        } = self;
        let node = entities
            .get_mut(key)
            .ok_or_else(|| TransactionError::MissingEntity(format!("{key:?}")))?;
        for (name, value) in snapshot {
            let kind = node.kind();
            let descriptor = field(kind, name).ok_or_else(|| TransactionError::UnknownField {
                kind,
                field: name.clone(),
            })?;
            descriptor.write(node, value, registry)?;
        }
        Ok(())
    }

    // --- Recording ---

    /// Records the current value of `field` before it is overwritten.
    ///
    /// Does nothing outside a transaction.
    pub(crate) fn touch(&mut self, key: EntityKey, field_name: &'static str) {
        let Some(txn) = self.txn.active.as_mut() else {
            return;
        };
        let Some(node) = self.entities.get(key) else {
            return;
        };
        let Some(descriptor) = field(node.kind(), field_name) else {
            warn!(tag = %node.tag, field = field_name, "write to an untracked field");
            return;
        };
        txn.state_entry(key, node, TxnType::Modification)
            .transact(descriptor, node, &self.entities);
    }

    pub(crate) fn record_creation(&mut self, key: EntityKey) {
        let Some(txn) = self.txn.active.as_mut() else {
            return;
        };
        if let Some(node) = self.entities.get(key) {
            txn.state_entry(key, node, TxnType::Creation);
        }
    }

    /// Records a full dump of an entity about to be destroyed.
    pub(crate) fn record_deletion(&mut self, key: EntityKey) {
        let Some(txn) = self.txn.active.as_mut() else {
            return;
        };
        let Some(node) = self.entities.get(key) else {
            return;
        };
        let snapshot = full_snapshot(node, &self.entities);
        let state = txn.state_entry(key, node, TxnType::Deletion);
        match state.txn_type {
            TxnType::Creation => {}
            TxnType::Deletion | TxnType::Modification | TxnType::Recycling => {
                state.txn_type = TxnType::Deletion;
                state.record_full(snapshot);
            }
        }
    }

    /// Records a toggle of the `Removed` flag that keeps links intact.
    pub(crate) fn record_recycling(&mut self, key: EntityKey) {
        let Some(txn) = self.txn.active.as_mut() else {
            return;
        };
        let Some(node) = self.entities.get(key) else {
            return;
        };
        if let Some(descriptor) = field(node.kind(), "flags") {
            txn.state_entry(key, node, TxnType::Recycling)
                .transact(descriptor, node, &self.entities);
        }
    }

    /// Delivers a signal now, or queues it until the open transaction commits.
    pub(crate) fn raise(&mut self, event: SignalEvent) {
        if self.txn.active.is_some() && self.config.defer_signals {
            self.signals.queue(event);
        } else {
            self.signals.emit(event);
        }
    }

    // --- Purging ---

    /// Purges every removed, unlinked entity no transaction in the window
    /// refers to.
    ///
    /// Returns the number of purged entities.
    pub fn purge_removed(&mut self) -> usize {
        let referenced = self.txn.referenced_tags();
        let doomed: Vec<EntityKey> = self
            .entities
            .iter()
            .filter(|(_, n)| purgeable(n) && !referenced.contains(&n.tag))
            .map(|(k, _)| k)
            .collect();
        for &key in &doomed {
            self.purge(key);
        }
        if !doomed.is_empty() {
            info!(count = doomed.len(), "purged removed entities");
        }
        doomed.len()
    }

    fn retire_redo(&mut self) {
        let retired = std::mem::take(&mut self.txn.redo_stack);
        for txn in retired {
            self.retire(txn);
        }
    }

    fn trim_undo_window(&mut self) {
        while self.txn.undo_stack.len() > self.config.max_undo_steps {
            match self.txn.undo_stack.pop_front() {
                Some(txn) => self.retire(txn),
                None => break,
            }
        }
    }

    /// Drops a transaction from the window, purging removed entities that
    /// only it referred to.
    fn retire(&mut self, txn: Transaction) {
        let referenced = self.txn.referenced_tags();
        let mut purged = 0;
        for state in &txn.states {
            let removed = self
                .entities
                .get(state.key)
                .is_some_and(|n| purgeable(n) && n.tag == state.tag);
            if removed && !referenced.contains(&state.tag) && self.purge(state.key) {
                purged += 1;
            }
        }
        debug!(txn = %txn.name, purged, "transaction retired");
    }
}

/// Removed and unlinked. Recycled entities keep their links and stay until
/// they are released through ownership.
fn purgeable(node: &EntityNode) -> bool {
    node.is_removed() && node.parents.is_empty() && node.children.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::entity::{EntityData, VertexData};
    use crate::error::GraphError;

    fn vertex(doc: &mut Document) -> EntityKey {
        doc.insert_entity(EntityData::Vertex(VertexData::default()))
    }

    fn point(doc: &Document, key: EntityKey) -> [f64; 3] {
        let v = doc.get(key).unwrap().as_vertex().unwrap();
        [v.x, v.y, v.z]
    }

    #[test]
    fn begin_twice_is_rejected() {
        let mut doc = Document::new();
        doc.begin("first").unwrap();
        assert_eq!(
            doc.begin("second"),
            Err(TransactionError::AlreadyActive("first".into()))
        );
    }

    #[test]
    fn commit_without_transaction_fails() {
        let mut doc = Document::new();
        assert_eq!(doc.commit(), Err(TransactionError::NoActiveTransaction));
        assert_eq!(doc.abort(), Err(TransactionError::NoActiveTransaction));
    }

    #[test]
    fn empty_transaction_is_not_recorded() {
        let mut doc = Document::new();
        doc.begin("noop").unwrap();
        doc.commit().unwrap();
        assert!(!doc.can_undo());
    }

    #[test]
    fn modification_undo_redo() {
        let mut doc = Document::new();
        let v = vertex(&mut doc);

        doc.begin("move").unwrap();
        doc.set_vertex_position(v, [1.0, 2.0, 3.0]).unwrap();
        doc.set_vertex_position(v, [4.0, 5.0, 6.0]).unwrap();
        doc.commit().unwrap();

        let state = doc.last_transaction().unwrap().state(v).unwrap();
        assert_eq!(state.txn_type(), TxnType::Modification);

        assert!(doc.undo().unwrap());
        assert_eq!(point(&doc, v), [0.0, 0.0, 0.0]);
        assert!(doc.redo().unwrap());
        assert_eq!(point(&doc, v), [4.0, 5.0, 6.0]);
        assert!(!doc.redo().unwrap());
    }

    #[test]
    fn creation_undo_removes_and_redo_revives() {
        let mut doc = Document::new();
        doc.begin("create").unwrap();
        let v = vertex(&mut doc);
        doc.set_vertex_position(v, [1.0, 0.0, 0.0]).unwrap();
        doc.commit().unwrap();

        let state = doc.last_transaction().unwrap().state(v).unwrap();
        assert_eq!(state.txn_type(), TxnType::Creation);

        doc.undo().unwrap();
        assert!(doc.contains(v));
        assert!(!doc.is_live(v));

        doc.redo().unwrap();
        assert!(doc.is_live(v));
        assert_eq!(point(&doc, v), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn abort_purges_created_and_restores_modified() {
        let mut doc = Document::new();
        let v = vertex(&mut doc);

        doc.begin("scratch").unwrap();
        let created = vertex(&mut doc);
        doc.set_vertex_position(v, [9.0, 9.0, 9.0]).unwrap();
        doc.abort().unwrap();

        assert!(!doc.contains(created));
        assert_eq!(point(&doc, v), [0.0, 0.0, 0.0]);
        assert!(!doc.can_undo());
    }

    #[test]
    fn replay_is_refused_while_a_transaction_is_open() {
        let mut doc = Document::new();
        let v = vertex(&mut doc);
        doc.begin("a").unwrap();
        doc.set_vertex_position(v, [1.0, 0.0, 0.0]).unwrap();
        doc.commit().unwrap();

        doc.begin("b").unwrap();
        assert_eq!(doc.undo(), Err(TransactionError::Busy("b".into())));
    }

    #[test]
    fn undo_fails_cleanly_when_an_entity_was_purged() {
        let mut doc = Document::new();
        let v = vertex(&mut doc);
        doc.begin("move").unwrap();
        doc.set_vertex_position(v, [1.0, 0.0, 0.0]).unwrap();
        doc.commit().unwrap();

        doc.purge(v);
        let err = doc.undo().unwrap_err();
        assert!(matches!(err, TransactionError::MissingEntity(_)));
        assert_eq!(doc.undo_len(), 1);
    }

    #[test]
    fn new_commit_clears_redo() {
        let mut doc = Document::new();
        let v = vertex(&mut doc);
        for x in [1.0, 2.0] {
            doc.begin("move").unwrap();
            doc.set_vertex_position(v, [x, 0.0, 0.0]).unwrap();
            doc.commit().unwrap();
        }
        doc.undo().unwrap();
        assert!(doc.can_redo());

        doc.begin("move").unwrap();
        doc.set_vertex_position(v, [3.0, 0.0, 0.0]).unwrap();
        doc.commit().unwrap();
        assert!(!doc.can_redo());
        assert_eq!(doc.undo_len(), 2);
    }

    #[test]
    fn undo_window_is_bounded() {
        let config = ModelConfig {
            max_undo_steps: 2,
            ..ModelConfig::default()
        };
        let mut doc = Document::with_config(config);
        let v = vertex(&mut doc);
        for x in 1..=4 {
            doc.begin("move").unwrap();
            doc.set_vertex_position(v, [x as f64, 0.0, 0.0]).unwrap();
            doc.commit().unwrap();
        }
        assert_eq!(doc.undo_len(), 2);
    }

    #[test]
    fn retired_deletions_are_purged() {
        let config = ModelConfig {
            max_undo_steps: 0,
            ..ModelConfig::default()
        };
        let mut doc = Document::with_config(config);
        let edge = doc
            .create_edge_between([0.0, 0.0, 0.0], [1.0, 0.0, 0.0])
            .unwrap();

        doc.begin("delete").unwrap();
        doc.delete(edge).unwrap();
        doc.commit().unwrap();

        assert!(!doc.contains(edge));
        assert!(matches!(doc.get(edge), Err(GraphError::NotFound(_))));
        assert_eq!(doc.entity_count(), 0);
    }

    #[test]
    fn purge_removed_keeps_entities_in_the_window() {
        let mut doc = Document::new();
        let v = vertex(&mut doc);

        doc.begin("delete").unwrap();
        doc.delete(v).unwrap();
        doc.commit().unwrap();

        assert_eq!(doc.purge_removed(), 0);
        assert!(doc.contains(v));
        doc.undo().unwrap();
        assert!(doc.is_live(v));
    }

    #[test]
    fn recycled_entities_are_not_purged() {
        let mut doc = Document::new();
        let parent = vertex(&mut doc);
        let child = vertex(&mut doc);
        doc.add_child(parent, child).unwrap();
        doc.recycle(child).unwrap();

        assert_eq!(doc.purge_removed(), 0);
        assert!(doc.contains(child));
        assert!(doc.verify(parent, false));

        doc.restore_recycled(child).unwrap();
        assert!(doc.is_live(child));
    }

    #[test]
    fn retiring_a_recycling_keeps_the_parent_consistent() {
        let config = ModelConfig {
            max_undo_steps: 0,
            ..ModelConfig::default()
        };
        let mut doc = Document::with_config(config);
        let parent = vertex(&mut doc);
        let child = vertex(&mut doc);
        doc.add_child(parent, child).unwrap();

        doc.begin("recycle").unwrap();
        doc.recycle(child).unwrap();
        doc.commit().unwrap();

        assert!(doc.contains(child));
        assert!(doc.get(parent).unwrap().children().contains(&child));
        assert!(doc.collect_violations(parent).is_empty());
    }
}
