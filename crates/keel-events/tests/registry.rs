//! Registry semantics: registration order, the wildcard channel, snapshot
//! dispatch, once guards, and off filters.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use keel_events::{callback, Emitter, EntityId, HandlerId, IdGen};

type Log = Rc<RefCell<Vec<String>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn recorder(log: &Log, tag: &str) -> impl Fn(&str, &[i64]) + 'static {
    let log = Rc::clone(log);
    let tag = tag.to_owned();
    move |name, args| log.borrow_mut().push(format!("{tag}/{name}{args:?}"))
}

fn emitter() -> Emitter<i64> {
    Emitter::with_ids(IdGen::new())
}

#[test]
fn handlers_fire_in_registration_order() {
    let e = emitter();
    let seen = log();
    e.on("ping", recorder(&seen, "first"));
    e.on("ping", recorder(&seen, "second"));
    e.trigger("ping", &[1]);
    assert_eq!(seen.borrow().as_slice(), ["first/ping[1]", "second/ping[1]"]);
}

#[test]
fn wildcard_channel_sees_every_event_after_named_handlers() {
    let e = emitter();
    let seen = log();
    e.on("all", recorder(&seen, "all"));
    e.on("ping", recorder(&seen, "named"));
    e.trigger("ping", &[]);
    e.trigger("pong", &[7]);
    assert_eq!(
        seen.borrow().as_slice(),
        ["named/ping[]", "all/ping[]", "all/pong[7]"]
    );
}

#[test]
fn whitespace_separated_names_bind_each_token() {
    let e = emitter();
    let seen = log();
    e.on("ping pong", recorder(&seen, "h"));
    e.trigger("ping", &[]);
    e.trigger("pong", &[]);
    assert_eq!(seen.borrow().as_slice(), ["h/ping[]", "h/pong[]"]);
}

#[test]
fn trigger_splits_whitespace_separated_names() {
    let e = emitter();
    let seen = log();
    e.on("ping", recorder(&seen, "p"));
    e.on("pong", recorder(&seen, "q"));
    e.trigger("ping pong", &[3]);
    assert_eq!(seen.borrow().as_slice(), ["p/ping[3]", "q/pong[3]"]);
}

#[test]
fn on_map_binds_distinct_callbacks_per_name() {
    let e = emitter();
    let seen = log();
    e.on_map(vec![
        ("ping".to_owned(), callback(recorder(&seen, "p"))),
        ("pong".to_owned(), callback(recorder(&seen, "q"))),
    ]);
    e.trigger("pong", &[]);
    e.trigger("ping", &[]);
    assert_eq!(seen.borrow().as_slice(), ["q/pong[]", "p/ping[]"]);
}

#[test]
fn off_by_name_removes_only_that_binding() {
    let e = emitter();
    let seen = log();
    e.on("ping pong", recorder(&seen, "h"));
    e.off(Some("ping"), None, None);
    e.trigger("ping pong", &[]);
    assert_eq!(seen.borrow().as_slice(), ["h/pong[]"]);
    assert!(!e.has_handlers("ping"));
    assert!(e.has_handlers("pong"));
}

#[test]
fn off_by_handler_id_spares_other_handlers() {
    let e = emitter();
    let seen = log();
    let first = e.on("ping", recorder(&seen, "first"));
    e.on("ping", recorder(&seen, "second"));
    e.off(None, Some(first), None);
    e.trigger("ping", &[]);
    assert_eq!(seen.borrow().as_slice(), ["second/ping[]"]);
}

#[test]
fn off_by_context_removes_across_names() {
    let e = emitter();
    let ids = IdGen::new();
    let ctx: EntityId = ids.entity_id();
    let other: EntityId = ids.entity_id();
    let seen = log();
    e.on_with_context("ping pong", recorder(&seen, "tagged"), ctx);
    e.on_with_context("ping", recorder(&seen, "kept"), other);
    e.off(None, None, Some(ctx));
    e.trigger("ping pong", &[]);
    assert_eq!(seen.borrow().as_slice(), ["kept/ping[]"]);
}

#[test]
fn off_all_clears_every_handler() {
    let e = emitter();
    let seen = log();
    e.on("ping", recorder(&seen, "a"));
    e.on("all", recorder(&seen, "b"));
    e.off_all();
    e.trigger("ping", &[]);
    assert!(seen.borrow().is_empty());
    assert!(!e.has_handlers("ping"));
    assert!(!e.has_handlers("all"));
}

#[test]
fn once_fires_exactly_once() {
    let e = emitter();
    let hits = Rc::new(Cell::new(0));
    let count = Rc::clone(&hits);
    e.once("ping", move |_, _| count.set(count.get() + 1));
    e.trigger("ping", &[]);
    e.trigger("ping", &[]);
    assert_eq!(hits.get(), 1);
    assert!(!e.has_handlers("ping"));
}

#[test]
fn once_removes_itself_before_invoking() {
    // A re-entrant trigger from inside the callback must not fire it again.
    let e = emitter();
    let hits = Rc::new(Cell::new(0));
    let count = Rc::clone(&hits);
    let inner = e.clone();
    e.once("ping", move |_, _| {
        count.set(count.get() + 1);
        inner.trigger("ping", &[]);
    });
    e.trigger("ping", &[]);
    assert_eq!(hits.get(), 1);
}

#[test]
fn once_guards_are_per_name() {
    let e = emitter();
    let seen = log();
    e.once("ping pong", recorder(&seen, "h"));
    e.trigger("ping", &[]);
    e.trigger("ping", &[]);
    e.trigger("pong", &[]);
    assert_eq!(seen.borrow().as_slice(), ["h/ping[]", "h/pong[]"]);
}

#[test]
fn removal_during_dispatch_spares_the_current_snapshot() {
    let e = emitter();
    let seen = log();
    let second_id: Rc<Cell<Option<HandlerId>>> = Rc::new(Cell::new(None));
    let slot = Rc::clone(&second_id);
    let inner = e.clone();
    let sink = Rc::clone(&seen);
    e.on("ping", move |_, _| {
        sink.borrow_mut().push("first".to_owned());
        if let Some(id) = slot.get() {
            inner.off(None, Some(id), None);
        }
    });
    let id = e.on("ping", recorder(&seen, "second"));
    second_id.set(Some(id));
    e.trigger("ping", &[]);
    e.trigger("ping", &[]);
    // The second handler still ran in the dispatch that removed it.
    assert_eq!(seen.borrow().as_slice(), ["first", "second/ping[]", "first"]);
}

#[test]
fn registration_during_dispatch_waits_for_the_next_trigger() {
    let e = emitter();
    let seen = log();
    let armed = Rc::new(Cell::new(false));
    let once_flag = Rc::clone(&armed);
    let inner = e.clone();
    let sink = Rc::clone(&seen);
    e.on("ping", move |_, _| {
        sink.borrow_mut().push("outer".to_owned());
        if !once_flag.replace(true) {
            let late_sink = Rc::clone(&sink);
            inner.on("ping", move |_, _| late_sink.borrow_mut().push("late".to_owned()));
        }
    });
    e.trigger("ping", &[]);
    assert_eq!(seen.borrow().as_slice(), ["outer"]);
    e.trigger("ping", &[]);
    assert_eq!(seen.borrow().as_slice(), ["outer", "outer", "late"]);
}

#[test]
fn handler_ids_cover_every_name_of_one_call() {
    let e = emitter();
    let seen = log();
    let id = e.on("ping pong", recorder(&seen, "h"));
    e.off(None, Some(id), None);
    e.trigger("ping pong", &[]);
    assert!(seen.borrow().is_empty());
}
