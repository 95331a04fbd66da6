// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cell::RefCell;
use std::rc::Rc;

use approx::assert_relative_eq;
use roomgraph_model::{
    Document, EntityKey, Error, FieldValue, LoadContext, LoadOptions, LoopState, ModelConfig,
    SignalKind, TransactionError, TraversalError, TxnType, ValidationError,
};

fn rect(doc: &mut Document, x0: f64, y0: f64, x1: f64, y1: f64) -> EntityKey {
    doc.loop_from_points(&[[x0, y0, 0.0], [x1, y0, 0.0], [x1, y1, 0.0], [x0, y1, 0.0]])
        .unwrap()
}

#[test]
fn triangle_polygon_is_closed_with_four_points() {
    let mut doc = Document::new();
    let lp = doc
        .loop_from_points(&[[0.0, 0.0, 0.0], [3.0, 0.0, 0.0], [0.0, 4.0, 0.0]])
        .unwrap();

    let polygon = doc.to_polygon(lp, true).unwrap();
    assert_eq!(polygon.len(), 4);
    assert_eq!(polygon.first(), polygon.last());
    assert_relative_eq!(doc.signed_area(lp).unwrap(), 6.0);
}

#[test]
fn two_point_loop_yields_no_polygon() {
    let mut doc = Document::new();
    let lp = doc
        .loop_from_points(&[[0.0, 0.0, 0.0], [3.0, 0.0, 0.0]])
        .unwrap();

    assert_eq!(doc.loop_state(lp), LoopState::PartiallyBuilt);
    assert!(doc.to_polygon(lp, true).is_none());
    assert!(doc.to_polygon(lp, false).is_none());
}

#[test]
fn mismatched_partners_fail_validation_naming_both_coedges() {
    let mut doc = Document::new();
    let edge = doc
        .create_edge_between([0.0, 0.0, 0.0], [1.0, 0.0, 0.0])
        .unwrap();
    // Same direction twice, so they are never paired.
    let first = doc.create_coedge(edge, false).unwrap();
    let second = doc.create_coedge(edge, false).unwrap();

    assert!(!doc.validate(edge));
    let violations = doc.collect_violations(edge);
    let mismatch = violations
        .iter()
        .find(|v| matches!(v, ValidationError::PartnerMismatch { .. }))
        .expect("partner mismatch reported");
    let message = mismatch.to_string();
    assert!(message.contains(doc.tag(first).unwrap()));
    assert!(message.contains(doc.tag(second).unwrap()));
    assert_eq!(mismatch.subject(), doc.tag(edge).unwrap());

    doc.set_partner(first, second).unwrap_err();
    doc.clear_partner(first).unwrap();
    assert!(!doc.validate(edge));
}

#[test]
fn slab_thickness_change_undoes_and_redoes() {
    let mut doc = Document::new();
    let outline = rect(&mut doc, 0.0, 0.0, 6000.0, 4000.0);
    let slab = doc.create_slab(outline, 0.0, 200.0).unwrap();

    doc.begin("change thickness").unwrap();
    doc.set_thickness(slab, 240.0).unwrap();
    doc.commit().unwrap();

    let state = doc.last_transaction().unwrap().state(slab).unwrap();
    assert_eq!(state.txn_type(), TxnType::Modification);
    assert_eq!(state.data_before()["thickness"], FieldValue::Number(200.0));
    assert_eq!(state.data_after()["thickness"], FieldValue::Number(240.0));

    assert!(doc.undo().unwrap());
    assert_relative_eq!(doc.slab(slab).unwrap().thickness, 200.0);
    assert_relative_eq!(doc.slab_faces(slab).unwrap().top.outer[0].z, 200.0);

    assert!(doc.redo().unwrap());
    assert_relative_eq!(doc.slab(slab).unwrap().thickness, 240.0);
    assert_relative_eq!(doc.slab_faces(slab).unwrap().top.outer[0].z, 240.0);

    assert!(!doc.redo().unwrap());
}

#[test]
fn aborted_opening_is_absent_and_unsignalled() {
    let mut doc = Document::new();
    let outline = rect(&mut doc, 0.0, 0.0, 6000.0, 4000.0);
    let slab = doc.create_slab(outline, 0.0, 200.0).unwrap();

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    doc.signals_mut()
        .subscribe(move |event| sink.borrow_mut().push(event.kind));

    doc.begin("add opening").unwrap();
    let hole = rect(&mut doc, 1000.0, 1000.0, 2000.0, 2000.0);
    let opening = doc.create_opening(hole).unwrap();
    doc.add_opening(slab, opening).unwrap();
    doc.abort().unwrap();

    assert!(!doc.has_opening(slab, opening));
    assert!(!doc.contains(opening));
    assert!(!doc.contains(hole));
    assert!(events.borrow().is_empty());
    assert!(!doc.can_undo());
    assert!(doc.verify(slab, false));

    doc.begin("add opening").unwrap();
    let hole = rect(&mut doc, 1000.0, 1000.0, 2000.0, 2000.0);
    let opening = doc.create_opening(hole).unwrap();
    doc.add_opening(slab, opening).unwrap();
    doc.commit().unwrap();
    assert_eq!(*events.borrow(), vec![SignalKind::OpeningAdded]);

    doc.undo().unwrap();
    assert!(!doc.has_opening(slab, opening));
    assert_eq!(
        *events.borrow(),
        vec![SignalKind::OpeningAdded, SignalKind::OpeningRemoved]
    );
}

#[test]
fn corrupted_next_link_terminates_with_failure() {
    let mut source = Document::new();
    let lp = rect(&mut source, 0.0, 0.0, 1.0, 1.0);
    let coedges = source.loop_coedges(lp).unwrap();
    let mut record = source.dump(lp, true).unwrap();

    // Point the last co-edge back at the second one instead of the root.
    let last = source.tag(coedges[3]).unwrap().to_string();
    let second = source.tag(coedges[1]).unwrap().to_string();
    record
        .entities
        .get_mut(&last)
        .unwrap()
        .fields
        .insert("next".into(), FieldValue::Ref(Some(second)));

    let mut doc = Document::new();
    let mut ctx = LoadContext::from_record(&record, LoadOptions::default());
    let lp = doc.load_from_dump_by_id(&record.root, &mut ctx, true).unwrap();

    let mut visits = 0;
    let walk = doc.for_each_coedge(lp, |_, _| visits += 1);
    assert!(matches!(walk, Err(TraversalError::Cycle { .. })));
    assert_eq!(visits, 4);
    assert_eq!(doc.loop_state(lp), LoopState::Corrupt);
    assert!(doc.to_polygon(lp, true).is_none());
    assert!(!doc.verify(lp, false));
    assert!(matches!(doc.to_json(), Err(Error::Unverified(_))));
}

#[test]
fn strict_commit_rolls_back_invalid_changes() {
    let mut doc = Document::with_config(ModelConfig::default().strict());
    let lp = rect(&mut doc, 0.0, 0.0, 1.0, 1.0);
    let coedge = doc.loop_coedges(lp).unwrap()[1];

    doc.begin("detach").unwrap();
    doc.remove_coedge(lp, coedge).unwrap();
    let err = doc.commit().unwrap_err();
    assert!(matches!(err, TransactionError::VerificationFailed { .. }));

    assert_eq!(doc.loop_len(lp).unwrap(), 4);
    assert_eq!(doc.loop_state(lp), LoopState::Closed);
    assert!(!doc.can_undo());
}

#[test]
fn deleting_a_slab_round_trips_through_undo() {
    let mut doc = Document::new();
    let outline = rect(&mut doc, 0.0, 0.0, 10.0, 10.0);
    let slab = doc.create_slab(outline, 0.0, 0.3).unwrap();
    let hole = rect(&mut doc, 2.0, 2.0, 4.0, 4.0);
    let opening = doc.create_opening(hole).unwrap();
    doc.add_opening(slab, opening).unwrap();
    let before = doc.dump(slab, true).unwrap();
    let count = doc.iter().count();

    doc.with_transaction("delete slab", |doc| Ok(doc.delete(slab)?))
        .unwrap();
    assert_eq!(doc.iter().count(), 0);
    assert_eq!(
        doc.last_transaction().unwrap().state(slab).unwrap().txn_type(),
        TxnType::Deletion
    );

    doc.undo().unwrap();
    assert_eq!(doc.iter().count(), count);
    assert_eq!(doc.dump(slab, true).unwrap(), before);
    assert!(doc.verify(slab, false));

    doc.redo().unwrap();
    assert_eq!(doc.iter().count(), 0);
}

#[test]
fn split_keeps_shared_edge_paired() {
    let mut doc = Document::new();
    let left = rect(&mut doc, 0.0, 0.0, 1.0, 1.0);
    let right = doc.create_loop();

    // Give the left square's right-hand edge a second, opposite co-edge in
    // another loop.
    let shared_coedge = doc.loop_coedges(left).unwrap()[1];
    let shared_edge = doc.coedge(shared_coedge).unwrap().edge;
    let twin = doc.create_coedge(shared_edge, true).unwrap();
    doc.append_coedge(right, twin, None).unwrap();
    assert_eq!(doc.coedge(twin).unwrap().partner, Some(shared_coedge));

    doc.split_coedge(shared_coedge, [1.0, 0.5, 0.0]).unwrap();
    assert_eq!(doc.loop_len(left).unwrap(), 5);
    assert_eq!(doc.loop_len(right).unwrap(), 2);
    assert_eq!(doc.loop_state(left), LoopState::Closed);
    for coedge in doc.loop_coedges(right).unwrap() {
        let partner = doc.coedge(coedge).unwrap().partner.unwrap();
        assert_eq!(doc.coedge(partner).unwrap().partner, Some(coedge));
    }
    assert!(doc.verify(left, false));
}

/// A square whose right-hand edge also carries the reversed co-edge of a
/// second, one-co-edge loop.
fn shared_edge_pair(doc: &mut Document) -> (EntityKey, EntityKey, EntityKey, EntityKey) {
    let left = rect(doc, 0.0, 0.0, 1.0, 1.0);
    let right = doc.create_loop();
    let shared_coedge = doc.loop_coedges(left).unwrap()[1];
    let shared_edge = doc.coedge(shared_coedge).unwrap().edge;
    let twin = doc.create_coedge(shared_edge, true).unwrap();
    doc.append_coedge(right, twin, None).unwrap();
    (left, right, shared_edge, twin)
}

#[test]
fn deleting_a_neighbour_loop_unpairs_the_survivor() {
    let mut doc = Document::new();
    let (left, right, shared_edge, twin) = shared_edge_pair(&mut doc);
    let shared_coedge = doc.loop_coedges(left).unwrap()[1];

    doc.with_transaction("delete neighbour", |doc| Ok(doc.delete(right)?))
        .unwrap();
    assert!(!doc.is_live(twin));
    assert_eq!(doc.coedge(shared_coedge).unwrap().partner, None);
    assert_eq!(doc.edge(shared_edge).unwrap().coedge, Some(shared_coedge));
    assert!(doc.verify(left, false));
    assert!(doc.to_json().is_ok());

    doc.undo().unwrap();
    assert_eq!(doc.coedge(shared_coedge).unwrap().partner, Some(twin));
    assert_eq!(doc.coedge(twin).unwrap().partner, Some(shared_coedge));
}

#[test]
fn deleting_the_primary_side_hands_the_edge_over() {
    let mut doc = Document::new();
    let (left, _, shared_edge, twin) = shared_edge_pair(&mut doc);
    let shared_coedge = doc.loop_coedges(left).unwrap()[1];
    assert_eq!(doc.edge(shared_edge).unwrap().coedge, Some(shared_coedge));

    doc.delete(left).unwrap();
    assert!(doc.is_live(shared_edge));
    assert_eq!(doc.edge(shared_edge).unwrap().coedge, Some(twin));
    assert_eq!(doc.coedge(twin).unwrap().partner, None);
    assert!(doc.collect_violations(shared_edge).is_empty());
}
