//! Ordered indexed set semantics: reconciliation, the dual index, sorting,
//! and the member-event relay.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::{json, Value};

use keel::{
    AddOptions, Arg, Changes, Collection, CollectionError, CollectionOptions,
    CollectionSetOptions, Comparator, Item, SetOptions, Validator,
};

fn item(value: Value) -> Item {
    Item::attrs(value)
}

fn collection(items: Vec<Value>) -> Collection {
    let c = Collection::new(CollectionOptions::default());
    c.add(items.into_iter().map(item).collect(), &AddOptions::silent());
    c
}

type Log = Rc<RefCell<Vec<String>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn watch(c: &Collection, log: &Log) {
    let sink = Rc::clone(log);
    c.on("all", move |name, _| sink.borrow_mut().push(name.to_owned()));
}

fn ids_in_order(c: &Collection) -> Vec<Value> {
    c.models()
        .iter()
        .map(|m| m.id().unwrap_or(Value::Null))
        .collect()
}

#[test]
fn add_indexes_and_orders_members() {
    let c = collection(vec![json!({"id": 1}), json!({"id": 2})]);
    assert_eq!(c.len(), 2);
    assert!(!c.is_empty());

    let first = c.at(0).unwrap();
    assert_eq!(first.id(), Some(json!(1)));
    assert_eq!(c.index_of(&first), Some(0));
    assert!(c.get_by_id(&json!(2)).is_some());
    assert!(c.get_by_cid(first.cid()).unwrap().ptr_eq(&first));
    assert!(c.has(&item(json!({"id": 1}))));
    assert!(!c.has(&item(json!({"id": 9}))));
    assert!(first.collection().unwrap().ptr_eq(&c));
}

#[test]
fn add_fires_add_with_index_then_update() {
    let c = collection(vec![json!({"id": 1})]);
    let indexes = Rc::new(RefCell::new(Vec::new()));
    let index_sink = Rc::clone(&indexes);
    c.on("add", move |_, args| {
        index_sink.borrow_mut().push(args[2].as_index());
    });
    let delta: Rc<RefCell<Option<Changes>>> = Rc::new(RefCell::new(None));
    let delta_sink = Rc::clone(&delta);
    c.on("update", move |_, args| {
        *delta_sink.borrow_mut() = args[1].as_changes().cloned();
    });

    c.add(vec![item(json!({"id": 2}))], &AddOptions::default());
    assert_eq!(indexes.borrow().as_slice(), [Some(1)]);
    let delta = delta.borrow();
    let changes = delta.as_ref().unwrap();
    assert_eq!(changes.added.len(), 1);
    assert!(changes.removed.is_empty() && changes.merged.is_empty());
}

#[test]
fn set_reconciles_merging_adding_and_removing() {
    let c = collection(vec![
        json!({"id": 1, "label": "a"}),
        json!({"id": 2, "label": "b"}),
    ]);
    let kept = c.get_by_id(&json!(2)).unwrap();
    let delta: Rc<RefCell<Option<Changes>>> = Rc::new(RefCell::new(None));
    let delta_sink = Rc::clone(&delta);
    c.on("update", move |_, args| {
        *delta_sink.borrow_mut() = args[1].as_changes().cloned();
    });

    let resolved = c.set(
        vec![
            item(json!({"id": 2, "label": "B"})),
            item(json!({"id": 3, "label": "c"})),
        ],
        &CollectionSetOptions::default(),
    );

    assert_eq!(ids_in_order(&c), [json!(2), json!(3)]);
    // The matched member survives as the same instance, merged in place.
    assert!(c.at(0).unwrap().ptr_eq(&kept));
    assert!(resolved[0].ptr_eq(&kept));
    assert_eq!(kept.get("label"), Some(json!("B")));

    let delta = delta.borrow();
    let changes = delta.as_ref().unwrap();
    assert_eq!(changes.added.len(), 1);
    assert_eq!(changes.added[0].id(), Some(json!(3)));
    assert_eq!(changes.removed.len(), 1);
    assert_eq!(changes.removed[0].id(), Some(json!(1)));
    assert_eq!(changes.merged.len(), 1);
    assert!(changes.merged[0].ptr_eq(&kept));
}

#[test]
fn reconciliation_event_order_is_merge_remove_add_update() {
    let c = collection(vec![
        json!({"id": 1, "label": "a"}),
        json!({"id": 2, "label": "b"}),
    ]);
    let seen = log();
    watch(&c, &seen);
    c.set(
        vec![
            item(json!({"id": 2, "label": "B"})),
            item(json!({"id": 3})),
        ],
        &CollectionSetOptions::default(),
    );
    assert_eq!(
        seen.borrow().as_slice(),
        ["change:label", "change", "remove", "add", "sort", "update"]
    );
}

#[test]
fn at_option_splices_additions_into_place() {
    let c = collection(vec![json!({"id": 1}), json!({"id": 2})]);
    let indexes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&indexes);
    c.on("add", move |_, args| sink.borrow_mut().push(args[2].as_index()));
    c.add(
        vec![item(json!({"id": 3})), item(json!({"id": 4}))],
        &AddOptions {
            at: Some(1),
            ..AddOptions::default()
        },
    );
    assert_eq!(ids_in_order(&c), [json!(1), json!(3), json!(4), json!(2)]);
    assert_eq!(indexes.borrow().as_slice(), [Some(1), Some(2)]);
}

#[test]
fn at_is_reclamped_after_removals_shrink_the_sequence() {
    let c = collection(vec![json!({"id": 1}), json!({"id": 2})]);
    let indexes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&indexes);
    c.on("add", move |_, args| sink.borrow_mut().push(args[2].as_index()));

    // Both members are unreferenced and removed before the splice, so the
    // position that was in bounds at call time lands at the new end.
    let resolved = c.set(
        vec![item(json!({"id": 3}))],
        &CollectionSetOptions {
            at: Some(2),
            ..CollectionSetOptions::default()
        },
    );
    assert_eq!(resolved.len(), 1);
    assert_eq!(ids_in_order(&c), [json!(3)]);
    assert_eq!(indexes.borrow().as_slice(), [Some(0)]);
}

#[test]
fn add_ignores_existing_members_unless_merging() {
    let c = collection(vec![json!({"id": 1, "label": "a"})]);
    c.add(
        vec![item(json!({"id": 1, "label": "x"}))],
        &AddOptions::default(),
    );
    assert_eq!(c.at(0).unwrap().get("label"), Some(json!("a")));

    c.add(
        vec![item(json!({"id": 1, "label": "x"}))],
        &AddOptions {
            merge: true,
            ..AddOptions::default()
        },
    );
    assert_eq!(c.at(0).unwrap().get("label"), Some(json!("x")));
    assert_eq!(c.len(), 1);
}

#[test]
fn attribute_comparator_keeps_members_sorted() {
    let c = Collection::new(CollectionOptions {
        comparator: Some(Comparator::Attr("rank".to_owned())),
        ..CollectionOptions::default()
    });
    c.add(
        vec![
            item(json!({"id": 1, "rank": 3})),
            item(json!({"id": 2, "rank": 1})),
            item(json!({"id": 3, "rank": 2})),
        ],
        &AddOptions::default(),
    );
    assert_eq!(c.pluck("rank"), [json!(1), json!(2), json!(3)]);
}

#[test]
fn merge_that_moves_the_sort_key_resorts() {
    let c = Collection::new(CollectionOptions {
        comparator: Some(Comparator::Attr("rank".to_owned())),
        ..CollectionOptions::default()
    });
    c.add(
        vec![
            item(json!({"id": 1, "rank": 1})),
            item(json!({"id": 2, "rank": 2})),
        ],
        &AddOptions::silent(),
    );
    let sorts = Rc::new(Cell::new(0));
    let count = Rc::clone(&sorts);
    c.on("sort", move |_, _| count.set(count.get() + 1));

    c.add(
        vec![item(json!({"id": 1, "rank": 3}))],
        &AddOptions {
            merge: true,
            ..AddOptions::default()
        },
    );
    assert_eq!(ids_in_order(&c), [json!(2), json!(1)]);
    assert_eq!(sorts.get(), 1);
}

#[test]
fn custom_comparator_controls_the_order() {
    let c = Collection::new(CollectionOptions {
        comparator: Some(Comparator::Cmp(Rc::new(|a, b| {
            let a = a.get("id").and_then(|v| v.as_i64()).unwrap_or(0);
            let b = b.get("id").and_then(|v| v.as_i64()).unwrap_or(0);
            b.cmp(&a)
        }))),
        ..CollectionOptions::default()
    });
    c.add(
        vec![item(json!({"id": 1})), item(json!({"id": 3})), item(json!({"id": 2}))],
        &AddOptions::default(),
    );
    assert_eq!(ids_in_order(&c), [json!(3), json!(2), json!(1)]);
}

#[test]
fn sort_without_a_comparator_is_an_error() {
    let c = collection(vec![json!({"id": 1})]);
    assert!(matches!(c.sort(), Err(CollectionError::NoComparator)));

    c.set_comparator(Some(Comparator::Attr("id".to_owned())));
    assert!(c.sort().is_ok());
}

#[test]
fn reset_replaces_wholesale_with_a_single_event() {
    let c = collection(vec![json!({"id": 1}), json!({"id": 2})]);
    let old = c.at(0).unwrap();
    let seen = log();
    watch(&c, &seen);

    c.reset(vec![item(json!({"id": 3}))], false);
    assert_eq!(ids_in_order(&c), [json!(3)]);
    assert_eq!(seen.borrow().as_slice(), ["reset"]);

    // Detached members no longer bubble into the collection.
    assert!(old.collection().is_none());
    old.trigger("change", &[Arg::Model(old.clone())]);
    assert_eq!(seen.borrow().as_slice(), ["reset"]);
}

#[test]
fn remove_fires_remove_with_index_then_update() {
    let c = collection(vec![json!({"id": 1}), json!({"id": 2})]);
    let seen = log();
    watch(&c, &seen);
    let indexes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&indexes);
    c.on("remove", move |_, args| {
        sink.borrow_mut().push(args[2].as_index());
    });

    let removed = c.remove(&[item(json!({"id": 2}))], false);
    assert_eq!(removed.len(), 1);
    assert_eq!(c.len(), 1);
    assert_eq!(indexes.borrow().as_slice(), [Some(1)]);
    assert_eq!(seen.borrow().as_slice(), ["remove", "update"]);
}

#[test]
fn destroy_event_removes_the_member() {
    let c = collection(vec![json!({"id": 1}), json!({"id": 2})]);
    let m = c.get_by_id(&json!(1)).unwrap();
    m.trigger("destroy", &[Arg::Model(m.clone()), Arg::Collection(c.clone())]);
    assert!(c.get_by_id(&json!(1)).is_none());
    assert_eq!(c.len(), 1);
    assert!(m.collection().is_none());
}

#[test]
fn id_change_rekeys_the_index() {
    let c = collection(vec![json!({"id": 1})]);
    let m = c.get_by_id(&json!(1)).unwrap();
    m.set_attr("id", json!(9), &SetOptions::default());
    assert!(c.get_by_id(&json!(1)).is_none());
    assert!(c.get_by_id(&json!(9)).unwrap().ptr_eq(&m));
    // The client-id entry never moves.
    assert!(c.get_by_cid(m.cid()).unwrap().ptr_eq(&m));
}

#[test]
fn events_from_other_collections_do_not_leak() {
    let c1 = collection(vec![]);
    let c2 = collection(vec![]);
    let m = c1
        .add_one(item(json!({"id": 1})), &AddOptions::silent())
        .unwrap();
    c2.add(vec![Item::Model(m.clone())], &AddOptions::silent());

    let first = log();
    watch(&c1, &first);
    let second = log();
    watch(&c2, &second);

    c2.remove(&[Item::Model(m.clone())], false);
    assert!(first.borrow().is_empty());
    assert_eq!(second.borrow().as_slice(), ["remove", "update"]);
    assert_eq!(c1.len(), 1);
    // The advisory owner link still points at the first collection.
    assert!(m.collection().unwrap().ptr_eq(&c1));
}

#[test]
fn member_change_events_bubble_to_the_collection() {
    let c = collection(vec![json!({"id": 1, "label": "a"})]);
    let seen = log();
    let sink = Rc::clone(&seen);
    c.on("change:label", move |_, args| {
        sink.borrow_mut().push(
            args[1]
                .as_value()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        );
    });
    c.at(0).unwrap().set_attr("label", json!("b"), &SetOptions::default());
    assert_eq!(seen.borrow().as_slice(), ["b"]);
}

#[test]
fn membership_queries_scan_in_order() {
    let c = collection(vec![
        json!({"id": 1, "kind": "x"}),
        json!({"id": 2, "kind": "y"}),
        json!({"id": 3, "kind": "x"}),
    ]);
    assert_eq!(c.pluck("kind"), [json!("x"), json!("y"), json!("x")]);

    let mut probe = keel::Attributes::new();
    probe.insert("kind".to_owned(), json!("x"));
    let hits = c.where_attrs(&probe);
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id(), Some(json!(1)));
    assert!(c.find_where(&probe).unwrap().ptr_eq(&hits[0]));
    assert_eq!(
        c.model_ids(),
        [Some(json!(1)), Some(json!(2)), Some(json!(3))]
    );
}

#[test]
fn stack_and_queue_operations() {
    let c = collection(vec![]);
    c.push(item(json!({"id": 1})), &AddOptions::default());
    c.push(item(json!({"id": 2})), &AddOptions::default());
    c.unshift(item(json!({"id": 0})), &AddOptions::default());
    assert_eq!(ids_in_order(&c), [json!(0), json!(1), json!(2)]);

    assert_eq!(c.shift(false).unwrap().id(), Some(json!(0)));
    assert_eq!(c.pop(false).unwrap().id(), Some(json!(2)));
    assert_eq!(ids_in_order(&c), [json!(1)]);
}

#[test]
fn validation_failure_blocks_member_construction() {
    let validator: Validator = Rc::new(|proposed, _| match proposed.get("n") {
        Some(n) if n.as_i64().unwrap_or(0) < 0 => Some(json!("negative")),
        _ => None,
    });
    let c = Collection::new(CollectionOptions {
        validator: Some(validator),
        ..CollectionOptions::default()
    });
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    c.on("invalid", move |_, args| {
        sink.borrow_mut().push(args[1].as_value().cloned());
    });

    let added = c.add(
        vec![item(json!({"n": -1})), item(json!({"n": 1}))],
        &AddOptions {
            validate: true,
            ..AddOptions::default()
        },
    );
    assert_eq!(added.len(), 1);
    assert_eq!(c.len(), 1);
    assert_eq!(errors.borrow().as_slice(), [Some(json!("negative"))]);
}

#[test]
fn clone_collection_shares_member_handles() {
    let c = collection(vec![json!({"id": 1})]);
    let copy = c.clone_collection();
    assert_eq!(copy.len(), 1);
    assert!(copy.at(0).unwrap().ptr_eq(&c.at(0).unwrap()));

    copy.add(vec![item(json!({"id": 2}))], &AddOptions::default());
    assert_eq!(c.len(), 1);
    assert_eq!(copy.len(), 2);
}
