// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dumping entities to tag-keyed records and loading them back.
//!
//! A dump stores every field through the same field tables the transaction
//! engine uses, so references are tags rather than keys. Loading runs in
//! two phases: first every entity reachable from the requested tag is
//! allocated, then fields are written with tags remapped to the new
//! entities. References to entities outside the record are dropped.
//!
//! The document-level format is JSON, written with `serde_json`. Saving is
//! refused while any ownership root fails verification.

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::arena::{Arena, Document};
use crate::config::ModelConfig;
use crate::entity::{EntityData, EntityNode};
use crate::error::{Error, GraphError, Result, TransactionError};
use crate::field::{field, FieldValue};
use crate::keys::{EntityKey, EntityType};
use crate::txn::{full_snapshot, Snapshot};

/// Fields of one entity, keyed by field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDump {
    pub tag: String,
    pub kind: EntityType,
    pub fields: Snapshot,
}

impl EntityDump {
    fn of(node: &EntityNode, arena: &Arena) -> Self {
        Self {
            tag: node.tag.clone(),
            kind: node.kind(),
            fields: full_snapshot(node, arena),
        }
    }
}

/// A dumped entity plus the dumps of everything it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpRecord {
    pub root: String,
    pub entities: BTreeMap<String, EntityDump>,
}

/// Serialized form of a whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentDump {
    pub roots: Vec<String>,
    pub entities: BTreeMap<String, EntityDump>,
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Reuse the dumped tag when the document does not already have it.
    pub keep_tags: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { keep_tags: true }
    }
}

/// State shared by the loads of one record: the dumps to draw from and the
/// entities already created for them.
#[derive(Debug)]
pub struct LoadContext<'a> {
    records: &'a BTreeMap<String, EntityDump>,
    loaded: FxHashMap<String, EntityKey>,
    options: LoadOptions,
}

impl<'a> LoadContext<'a> {
    pub fn new(records: &'a BTreeMap<String, EntityDump>, options: LoadOptions) -> Self {
        Self {
            records,
            loaded: FxHashMap::default(),
            options,
        }
    }

    pub fn from_record(record: &'a DumpRecord, options: LoadOptions) -> Self {
        Self::new(&record.entities, options)
    }

    /// The entity created for a dumped tag, if it has been loaded.
    pub fn loaded(&self, tag: &str) -> Option<EntityKey> {
        self.loaded.get(tag).copied()
    }
}

impl Document {
    /// Dumps an entity, and with `include_children` everything it owns.
    pub fn dump(&self, key: EntityKey, include_children: bool) -> Result<DumpRecord> {
        let root = self.get(key)?;
        if root.is_removed() {
            return Err(GraphError::Removed(root.tag.clone()).into());
        }
        let mut entities = BTreeMap::new();
        let mut visited = FxHashSet::default();
        let mut pending = vec![key];
        while let Some(k) = pending.pop() {
            if !visited.insert(k) {
                continue;
            }
            let Some(node) = self.entities.get(k).filter(|n| !n.is_removed()) else {
                continue;
            };
            entities.insert(node.tag.clone(), EntityDump::of(node, &self.entities));
            if include_children {
                pending.extend(node.children.iter().copied());
            }
        }
        Ok(DumpRecord {
            root: root.tag.clone(),
            entities,
        })
    }

    /// Loads the entity dumped under `tag`, and everything it references
    /// inside the record, returning its new key.
    ///
    /// Entities already loaded through `ctx` are reused. For the root
    /// (`is_root`) the dumped parents are ignored, so it comes back detached.
    /// All fields are checked before anything is created.
    pub fn load_from_dump_by_id(
        &mut self,
        tag: &str,
        ctx: &mut LoadContext<'_>,
        is_root: bool,
    ) -> Result<EntityKey> {
        if let Some(key) = ctx.loaded(tag) {
            return Ok(key);
        }
        let records = ctx.records;
        if !records.contains_key(tag) {
            return Err(GraphError::UnknownTag(tag.to_string()).into());
        }
        let skip = |dump: &str, name: &str| is_root && dump == tag && name == "parents";

        // Collect and check everything reachable inside the record.
        let mut order: Vec<&EntityDump> = Vec::new();
        let mut seen = FxHashSet::default();
        let mut pending = vec![tag];
        while let Some(t) = pending.pop() {
            if ctx.loaded.contains_key(t) || !seen.insert(t) {
                continue;
            }
            let Some(dump) = records.get(t) else {
                continue;
            };
            for (name, value) in &dump.fields {
                let descriptor = field(dump.kind, name).ok_or_else(|| TransactionError::UnknownField {
                    kind: dump.kind,
                    field: name.clone(),
                })?;
                descriptor.check(&dump.tag, value)?;
                if !skip(t, name.as_str()) {
                    pending.extend(value.referenced_tags());
                }
            }
            order.push(dump);
        }

        // Allocate.
        let mut fresh = Vec::with_capacity(order.len());
        for dump in &order {
            let new_tag = if ctx.options.keep_tags && !self.registry.contains_key(&dump.tag) {
                dump.tag.clone()
            } else {
                self.allocate_tag(dump.kind)
            };
            let key = self.insert_with_tag(new_tag, EntityData::empty(dump.kind));
            ctx.loaded.insert(dump.tag.clone(), key);
            fresh.push((*dump, key));
        }

        // Write fields with remapped references.
        for (dump, key) in fresh {
            for (name, value) in &dump.fields {
                if skip(&dump.tag, name.as_str()) {
                    continue;
                }
                let Some(descriptor) = field(dump.kind, name) else {
                    continue;
                };
                let value = self.remap(value, &ctx.loaded, &dump.tag, name);
                let Document {
                    entities, registry, ..
                } = self;
                let node = entities.get_mut(key).ok_or(GraphError::NotFound(key))?;
                descriptor.write(node, &value, registry)?;
            }
        }

        debug!(tag, entities = ctx.loaded.len(), "loaded from dump");
        ctx.loaded(tag)
            .ok_or_else(|| GraphError::UnknownTag(tag.to_string()).into())
    }

    fn remap(
        &self,
        value: &FieldValue,
        loaded: &FxHashMap<String, EntityKey>,
        owner: &str,
        name: &str,
    ) -> FieldValue {
        let resolve = |t: &String| {
            let found = loaded.get(t).and_then(|&k| self.entities.get(k)).map(|n| n.tag.clone());
            if found.is_none() {
                warn!(tag = owner, field = name, target = %t, "reference outside the record dropped");
            }
            found
        };
        match value {
            FieldValue::Ref(Some(t)) => FieldValue::Ref(resolve(t)),
            FieldValue::Refs(ts) => FieldValue::Refs(ts.iter().filter_map(resolve).collect()),
            other => other.clone(),
        }
    }

    /// Serializes every live ownership tree.
    ///
    /// Fails with [`Error::Unverified`] if any root fails verification.
    pub fn to_json(&self) -> Result<String> {
        let mut dump = DocumentDump {
            roots: Vec::new(),
            entities: BTreeMap::new(),
        };
        for root in self.roots() {
            let violations = self.collect_violations(root);
            if !violations.is_empty() {
                for violation in &violations {
                    self.report(violation);
                }
                return Err(Error::Unverified(self.describe(root)));
            }
            let record = self.dump(root, true)?;
            dump.roots.push(record.root);
            dump.entities.extend(record.entities);
        }
        serde_json::to_string_pretty(&dump).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Rebuilds a document saved with [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_json_with_config(json, ModelConfig::default())
    }

    pub fn from_json_with_config(json: &str, config: ModelConfig) -> Result<Self> {
        let dump: DocumentDump =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        let mut doc = Self::with_config(config);
        let mut ctx = LoadContext::new(&dump.entities, LoadOptions::default());
        for root in &dump.roots {
            doc.load_from_dump_by_id(root, &mut ctx, true)?;
        }
        debug!(entities = doc.entity_count(), "document loaded");
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rect(doc: &mut Document, x0: f64, y0: f64, x1: f64, y1: f64) -> EntityKey {
        doc.loop_from_points(&[[x0, y0, 0.0], [x1, y0, 0.0], [x1, y1, 0.0], [x0, y1, 0.0]])
            .unwrap()
    }

    fn slab_with_opening(doc: &mut Document) -> EntityKey {
        let outline = rect(doc, 0.0, 0.0, 10.0, 10.0);
        let slab = doc.create_slab(outline, 0.0, 0.3).unwrap();
        let hole = rect(doc, 2.0, 2.0, 4.0, 4.0);
        let opening = doc.create_opening(hole).unwrap();
        doc.add_opening(slab, opening).unwrap();
        slab
    }

    #[test]
    fn dump_uses_tags_for_references() {
        let mut doc = Document::new();
        let lp = rect(&mut doc, 0.0, 0.0, 1.0, 1.0);
        let record = doc.dump(lp, true).unwrap();

        assert_eq!(record.root, doc.tag(lp).unwrap());
        assert_eq!(record.entities.len(), 1 + 4 * 3);
        let root = &record.entities[&record.root];
        let FieldValue::Ref(Some(first)) = &root.fields["root"] else {
            panic!("loop root should be dumped as a tag");
        };
        assert_eq!(record.entities[first].kind, EntityType::CoEdge);

        let shallow = doc.dump(lp, false).unwrap();
        assert_eq!(shallow.entities.len(), 1);
    }

    #[test]
    fn document_round_trips_through_json() {
        let mut doc = Document::new();
        let slab = slab_with_opening(&mut doc);
        let area = doc.slab_faces(slab).unwrap().top.area();
        let tag = doc.tag(slab).unwrap().to_string();

        let json = doc.to_json().unwrap();
        let mut loaded = Document::from_json(&json).unwrap();

        assert_eq!(loaded.entity_count(), doc.entity_count());
        let slab = loaded.key_by_tag(&tag).unwrap();
        assert_eq!(loaded.openings(slab).unwrap().len(), 1);
        assert_relative_eq!(loaded.slab_faces(slab).unwrap().top.area(), area);
        assert!(loaded.verify(slab, false));
    }

    #[test]
    fn loading_into_a_populated_document_renames_conflicts() {
        let mut source = Document::new();
        let lp = rect(&mut source, 0.0, 0.0, 1.0, 1.0);
        let record = source.dump(lp, true).unwrap();

        let mut target = Document::new();
        let existing = rect(&mut target, 5.0, 5.0, 6.0, 6.0);
        let mut ctx = LoadContext::from_record(&record, LoadOptions::default());
        let copy = target.load_from_dump_by_id(&record.root, &mut ctx, true).unwrap();

        assert_ne!(copy, existing);
        assert_ne!(target.tag(copy), target.tag(existing));
        assert_eq!(target.loop_len(copy).unwrap(), 4);
        assert!(target.verify(copy, false));
        assert!(target.verify(existing, false));
        assert_eq!(
            target.load_from_dump_by_id(&record.root, &mut ctx, true).unwrap(),
            copy
        );
    }

    #[test]
    fn root_comes_back_detached() {
        let mut doc = Document::new();
        let slab = slab_with_opening(&mut doc);
        let outline = doc.base_profile(slab).unwrap().unwrap();
        let record = doc.dump(outline, true).unwrap();

        let mut target = Document::new();
        let mut ctx = LoadContext::from_record(&record, LoadOptions { keep_tags: false });
        let lp = target.load_from_dump_by_id(&record.root, &mut ctx, true).unwrap();
        assert!(target.get(lp).unwrap().parents().is_empty());
        assert_eq!(target.roots(), vec![lp]);
    }

    #[test]
    fn unknown_root_and_bad_fields_are_rejected() {
        let mut doc = Document::new();
        let lp = rect(&mut doc, 0.0, 0.0, 1.0, 1.0);
        let mut record = doc.dump(lp, true).unwrap();

        let mut target = Document::new();
        let mut ctx = LoadContext::from_record(&record, LoadOptions::default());
        assert!(matches!(
            target.load_from_dump_by_id("nope", &mut ctx, true),
            Err(Error::Graph(GraphError::UnknownTag(_)))
        ));

        let root = record.root.clone();
        record
            .entities
            .get_mut(&root)
            .unwrap()
            .fields
            .insert("root".into(), FieldValue::Number(1.0));
        let mut ctx = LoadContext::from_record(&record, LoadOptions::default());
        assert!(matches!(
            target.load_from_dump_by_id(&root, &mut ctx, true),
            Err(Error::Transaction(TransactionError::FieldTypeMismatch { .. }))
        ));
        assert_eq!(target.entity_count(), 0);
    }

    #[test]
    fn save_refuses_unverified_graph() {
        let mut doc = Document::new();
        let lp = rect(&mut doc, 0.0, 0.0, 1.0, 1.0);
        let root = doc.loop_data(lp).unwrap().root.unwrap();
        if let Some(EntityData::CoEdge(c)) = doc.entities.get_mut(root).map(|n| &mut n.data) {
            c.next = None;
        }
        assert!(matches!(doc.to_json(), Err(Error::Unverified(_))));
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        assert!(matches!(
            Document::from_json("{ not json"),
            Err(Error::Serialization(_))
        ));
    }
}
