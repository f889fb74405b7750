//! The event registry: `on` / `off` / `once` / `trigger`.
//!
//! An [`Emitter`] is a cheaply clonable handle onto one entity's handler
//! table. Handlers all share the uniform signature `Fn(&str, &[A])`: the
//! event name is always the first argument, so a wildcard (`"all"`) handler
//! can tell deliveries apart without a special calling convention.
//!
//! Dispatch is synchronous and runs in registration order against a snapshot
//! taken before iteration starts, so handlers that subscribe or unsubscribe
//! mid-dispatch never affect the in-flight delivery. A handler that panics is
//! not caught; the panic aborts delivery to later handlers for that trigger
//! call.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::ids::{EntityId, HandlerId, IdGen};
use crate::listening::Listening;

/// Shared handler. Plain `Fn` so the same callback can be re-entered when a
/// handler triggers further events; handlers keep mutable state behind
/// `Cell` / `RefCell`.
pub type Callback<A> = Rc<dyn Fn(&str, &[A])>;

/// Wraps a closure into the shared [`Callback`] form.
pub fn callback<A, F>(f: F) -> Callback<A>
where
    F: Fn(&str, &[A]) + 'static,
{
    Rc::new(f)
}

/// How a registration call names its events.
///
/// One tagged union, normalized by [`NameSpec::parse`] before any of it
/// reaches the registry.
pub enum NameSpec<A> {
    /// A single event token.
    One(String),
    /// The same callback bound to every token.
    Many(Vec<String>),
    /// Per-token callbacks.
    Map(Vec<(String, Callback<A>)>),
}

impl<A> NameSpec<A> {
    /// Normalizes a raw name argument: whitespace splits into `Many`.
    pub fn parse(input: &str) -> Self {
        let mut names: Vec<String> = input.split_whitespace().map(str::to_owned).collect();
        if names.len() == 1 {
            Self::One(names.pop().unwrap_or_default())
        } else {
            Self::Many(names)
        }
    }

    pub(crate) fn bindings(self, fallback: Callback<A>) -> Vec<(String, Callback<A>)> {
        match self {
            Self::One(name) => vec![(name, fallback)],
            Self::Many(names) => names
                .into_iter()
                .map(|name| (name, Rc::clone(&fallback)))
                .collect(),
            Self::Map(entries) => entries,
        }
    }
}

pub(crate) struct HandlerRecord<A> {
    pub(crate) id: HandlerId,
    pub(crate) callback: Callback<A>,
    pub(crate) context: Option<EntityId>,
    pub(crate) listening: Option<Rc<RefCell<Listening<A>>>>,
    /// `once` guard, shared with every snapshot clone of this record.
    pub(crate) fired: Option<Rc<Cell<bool>>>,
}

impl<A> Clone for HandlerRecord<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Rc::clone(&self.callback),
            context: self.context,
            listening: self.listening.clone(),
            fired: self.fired.clone(),
        }
    }
}

pub(crate) struct RegistryState<A> {
    pub(crate) handlers: BTreeMap<String, Vec<HandlerRecord<A>>>,
    /// target id -> shared Listening record (this entity is the listener).
    pub(crate) listening_to: BTreeMap<EntityId, Rc<RefCell<Listening<A>>>>,
    /// listener id -> shared Listening record (this entity is the target).
    pub(crate) listeners: BTreeMap<EntityId, Rc<RefCell<Listening<A>>>>,
}

impl<A> RegistryState<A> {
    fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            listening_to: BTreeMap::new(),
            listeners: BTreeMap::new(),
        }
    }
}

/// Handle onto one entity's event registry.
pub struct Emitter<A> {
    id: EntityId,
    ids: IdGen,
    pub(crate) state: Rc<RefCell<RegistryState<A>>>,
}

impl<A> Clone for Emitter<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            ids: self.ids.clone(),
            state: Rc::clone(&self.state),
        }
    }
}

impl<A> Default for Emitter<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Emitter<A> {
    /// Creates an emitter drawing ids from the thread-shared generator.
    pub fn new() -> Self {
        Self::with_ids(IdGen::default())
    }

    /// Creates an emitter drawing ids from an explicit generator.
    pub fn with_ids(ids: IdGen) -> Self {
        Self {
            id: ids.entity_id(),
            ids,
            state: Rc::new(RefCell::new(RegistryState::new())),
        }
    }

    /// Stable identity of this entity.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The id generator this emitter draws from.
    pub fn ids(&self) -> &IdGen {
        &self.ids
    }

    /// Two handles to the same registry compare equal.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    pub fn downgrade(&self) -> WeakEmitter<A> {
        WeakEmitter {
            id: self.id,
            ids: self.ids.clone(),
            state: Rc::downgrade(&self.state),
        }
    }

    /// Registers `f` under one or more whitespace-separated event names.
    pub fn on<F>(&self, names: &str, f: F) -> HandlerId
    where
        F: Fn(&str, &[A]) + 'static,
    {
        self.on_shared(names, callback(f), None)
    }

    /// As [`Emitter::on`], tagging every binding with a context used only as
    /// an `off` filter.
    pub fn on_with_context<F>(&self, names: &str, f: F, context: EntityId) -> HandlerId
    where
        F: Fn(&str, &[A]) + 'static,
    {
        self.on_shared(names, callback(f), Some(context))
    }

    /// Registers an already-shared callback.
    pub fn on_shared(
        &self,
        names: &str,
        f: Callback<A>,
        context: Option<EntityId>,
    ) -> HandlerId {
        self.bind(NameSpec::parse(names).bindings(f), context, None, false)
    }

    /// Registers per-name callbacks from a [`NameSpec::Map`]-shaped argument.
    pub fn on_map(
        &self,
        entries: impl IntoIterator<Item = (String, Callback<A>)>,
    ) -> HandlerId {
        self.bind(entries.into_iter().collect(), None, None, false)
    }

    /// Registers `f` so that each named binding fires at most once.
    ///
    /// The binding removes itself *before* invoking the user callback, so a
    /// re-entrant trigger from inside the callback cannot fire it a second
    /// time. Each name carries its own guard: `once("a b")` firing `a` leaves
    /// the `b` binding intact.
    pub fn once<F>(&self, names: &str, f: F) -> HandlerId
    where
        F: Fn(&str, &[A]) + 'static,
    {
        self.once_shared(names, callback(f))
    }

    /// As [`Emitter::once`] with an already-shared callback.
    pub fn once_shared(&self, names: &str, f: Callback<A>) -> HandlerId {
        self.bind(NameSpec::parse(names).bindings(f), None, None, true)
    }

    /// Per-name callbacks, each firing at most once.
    pub fn once_map(
        &self,
        entries: impl IntoIterator<Item = (String, Callback<A>)>,
    ) -> HandlerId {
        self.bind(entries.into_iter().collect(), None, None, true)
    }

    pub(crate) fn bind(
        &self,
        bindings: Vec<(String, Callback<A>)>,
        context: Option<EntityId>,
        listening: Option<Rc<RefCell<Listening<A>>>>,
        once: bool,
    ) -> HandlerId {
        let id = self.ids.handler_id();
        let mut state = self.state.borrow_mut();
        for (name, cb) in bindings {
            state.handlers.entry(name).or_default().push(HandlerRecord {
                id,
                callback: cb,
                context,
                listening: listening.clone(),
                fired: if once { Some(Rc::new(Cell::new(false))) } else { None },
            });
            if let Some(listening) = &listening {
                listening.borrow_mut().retain();
            }
        }
        id
    }

    /// Unregisters handlers. Each supplied filter independently narrows the
    /// match; a call with no filters clears every handler *and* tears down
    /// every listening other entities hold on this emitter.
    pub fn off(
        &self,
        names: Option<&str>,
        handler: Option<HandlerId>,
        context: Option<EntityId>,
    ) {
        registry_off(&self.state, names, handler, context);
    }

    /// Removes everything: handlers and inbound listenings.
    pub fn off_all(&self) {
        self.off(None, None, None);
    }

    /// Synchronously invokes handlers bound to each whitespace-separated
    /// token, then handlers bound to the wildcard `"all"` channel.
    pub fn trigger(&self, names: &str, args: &[A]) {
        for name in names.split_whitespace() {
            self.trigger_one(name, args);
        }
    }

    fn trigger_one(&self, name: &str, args: &[A]) {
        let (named, all) = {
            let state = self.state.borrow();
            (
                state.handlers.get(name).cloned().unwrap_or_default(),
                state.handlers.get("all").cloned().unwrap_or_default(),
            )
        };
        self.dispatch(name, name, &named, args);
        self.dispatch("all", name, &all, args);
    }

    /// `channel` is the name the handlers are bound under; `event` is the
    /// name being delivered (they differ only on the wildcard channel).
    fn dispatch(&self, channel: &str, event: &str, snapshot: &[HandlerRecord<A>], args: &[A]) {
        for record in snapshot {
            if let Some(fired) = &record.fired {
                if fired.replace(true) {
                    continue;
                }
                registry_off(&self.state, Some(channel), Some(record.id), None);
            }
            (record.callback)(event, args);
        }
    }

    /// True if any handler is bound under `name`.
    pub fn has_handlers(&self, name: &str) -> bool {
        self.state.borrow().handlers.contains_key(name)
    }

    /// Number of entities this emitter is currently listening to.
    pub fn listening_count(&self) -> usize {
        self.state.borrow().listening_to.len()
    }

    /// Number of entities currently listening to this emitter.
    pub fn listener_count(&self) -> usize {
        self.state.borrow().listeners.len()
    }
}

/// Non-owning handle, used where a strong reference would create a cycle.
pub struct WeakEmitter<A> {
    id: EntityId,
    ids: IdGen,
    state: Weak<RefCell<RegistryState<A>>>,
}

impl<A> Clone for WeakEmitter<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            ids: self.ids.clone(),
            state: Weak::clone(&self.state),
        }
    }
}

impl<A> WeakEmitter<A> {
    pub fn upgrade(&self) -> Option<Emitter<A>> {
        self.state.upgrade().map(|state| Emitter {
            id: self.id,
            ids: self.ids.clone(),
            state,
        })
    }
}

/// Shared removal path used by `off`, once self-removal, and the listening
/// bridge's cooperative teardown.
pub(crate) fn registry_off<A>(
    state: &Rc<RefCell<RegistryState<A>>>,
    names: Option<&str>,
    handler: Option<HandlerId>,
    context: Option<EntityId>,
) {
    let full_clear = names.is_none() && handler.is_none() && context.is_none();
    let mut released: Vec<Rc<RefCell<Listening<A>>>> = Vec::new();
    let mut torn_down: Vec<Rc<RefCell<Listening<A>>>> = Vec::new();
    {
        let mut registry = state.borrow_mut();
        if full_clear {
            torn_down.extend(registry.listeners.values().cloned());
        }
        let selected: Vec<String> = match names {
            Some(names) => names.split_whitespace().map(str::to_owned).collect(),
            None => registry.handlers.keys().cloned().collect(),
        };
        for name in selected {
            let Some(records) = registry.handlers.get_mut(&name) else {
                continue;
            };
            records.retain(|record| {
                let matched = handler.map_or(true, |h| record.id == h)
                    && context.map_or(true, |c| record.context == Some(c));
                if matched {
                    if let Some(listening) = &record.listening {
                        released.push(Rc::clone(listening));
                    }
                }
                !matched
            });
            if records.is_empty() {
                registry.handlers.remove(&name);
            }
        }
    }
    // Listening bookkeeping runs with the registry borrow released: a
    // cleanup touches both sides' maps, and listener and target may be the
    // same entity.
    for listening in released {
        Listening::release_one(&listening);
    }
    for listening in torn_down {
        Listening::cleanup(&listening);
    }
}
