// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Roomgraph Model
//!
//! Entity graph for building floor plans: a half-edge boundary
//! representation (vertices, edges, co-edges, loops) with composite slabs
//! and room regions on top, and a transaction engine that records every
//! change for undo and redo.
//!
//! All entities live in one [`Document`]. They reference each other through
//! generational [`EntityKey`]s and are addressed externally by string tags.
//! Ownership is explicit: an entity is destroyed when its last parent lets
//! go of it, and destruction is a soft delete until no transaction in the
//! undo window needs the entity any more.
//!
//! ```
//! use roomgraph_model::Document;
//!
//! let mut doc = Document::new();
//! let outline = doc
//!     .loop_from_points(&[[0.0, 0.0, 0.0], [6.0, 0.0, 0.0], [6.0, 4.0, 0.0], [0.0, 4.0, 0.0]])
//!     .unwrap();
//! let slab = doc.create_slab(outline, 0.0, 0.2).unwrap();
//!
//! doc.begin("thicken").unwrap();
//! doc.set_thickness(slab, 0.25).unwrap();
//! doc.commit().unwrap();
//!
//! doc.undo().unwrap();
//! assert_eq!(doc.slab(slab).unwrap().thickness, 0.2);
//! ```

pub mod arena;
pub mod config;
pub mod construction;
pub mod entity;
pub mod error;
pub mod field;
pub mod geometry;
pub mod keys;
pub mod ownership;
pub mod room;
pub mod serialization;
pub mod signal;
pub mod slab;
pub mod transform;
pub mod traversal;
pub mod txn;
pub mod validation;

pub use arena::Document;
pub use config::{ModelConfig, Strictness};
pub use entity::{Curve, EntityData, EntityFlag, EntityFlags, EntityNode, SplitCurve};
pub use error::{Error, GraphError, Result, TransactionError, TraversalError, ValidationError};
pub use field::{FieldValue, FieldValueType};
pub use geometry::{Body, Face, SlabFaces};
pub use keys::{EntityKey, EntityType};
pub use serialization::{DocumentDump, DumpRecord, EntityDump, LoadContext, LoadOptions};
pub use signal::{SignalEvent, SignalKind, Signals, SubscriptionId};
pub use traversal::LoopState;
pub use txn::{EntityTxnState, Transaction, TxnDirection, TxnType};
