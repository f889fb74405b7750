//! The listening bridge: `listen_to` / `stop_listening`.
//!
//! A [`Listening`] is the shared bookkeeping record for one
//! (listener, target) pair. All subscriptions between the pair share the one
//! record, which is what lets a single `stop_listening` call tear down an
//! arbitrary number of prior subscriptions atomically.
//!
//! Two modes:
//! - *cooperative*: the target exposes its own registry; the record only
//!   ref-counts subscriptions, and teardown rides the target's `off` path.
//! - *interop*: the target is foreign (no registry, or its subscribe path can
//!   fail); the record buffers the bound names itself so unsubscription can
//!   be replayed deterministically.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use thiserror::Error;

use crate::ids::{EntityId, HandlerId};
use crate::registry::{callback, registry_off, Callback, Emitter, NameSpec, RegistryState};

#[derive(Debug, Error)]
pub enum ListenError {
    #[error("target does not accept subscriptions")]
    Unsupported,
    #[error("target rejected subscription: {0}")]
    Rejected(String),
}

/// Something that can be listened to.
///
/// Cooperative targets return their registry from [`EventTarget::registry`];
/// the default `subscribe` / `unsubscribe` pair is the interop fallback for
/// targets that manage their own handler storage.
pub trait EventTarget<A> {
    /// Stable identity of the target entity.
    fn entity_id(&self) -> EntityId;

    /// The target's own registry when it implements the cooperative contract.
    fn registry(&self) -> Option<Emitter<A>> {
        None
    }

    /// Interop subscription path. May fail; a failure during `listen_to`
    /// leaves no partial state behind.
    fn subscribe(
        &self,
        name: &str,
        callback: Callback<A>,
        context: EntityId,
    ) -> Result<(), ListenError> {
        let _ = (name, callback, context);
        Err(ListenError::Unsupported)
    }

    /// Interop unsubscription path; `name` of `None` removes every binding
    /// made under `context`.
    fn unsubscribe(&self, name: Option<&str>, context: EntityId) {
        let _ = (name, context);
    }
}

impl<A> EventTarget<A> for Emitter<A> {
    fn entity_id(&self) -> EntityId {
        self.id()
    }

    fn registry(&self) -> Option<Emitter<A>> {
        Some(self.clone())
    }
}

/// Shared bookkeeping for one (listener, target) pair.
pub struct Listening<A> {
    listener_id: EntityId,
    target_id: EntityId,
    listener: Weak<RefCell<RegistryState<A>>>,
    /// Present in cooperative mode.
    target: Option<Weak<RefCell<RegistryState<A>>>>,
    /// Present in interop mode: replays the target's unsubscription.
    foreign_unbind: Option<Rc<dyn Fn(Option<&str>, EntityId)>>,
    count: usize,
    interop: bool,
    /// Interop mode buffers its bindings so teardown can prune them.
    bindings: Vec<(String, HandlerId)>,
}

impl<A> Listening<A> {
    fn new(listener_id: EntityId, target_id: EntityId, listener: Weak<RefCell<RegistryState<A>>>) -> Self {
        Self {
            listener_id,
            target_id,
            listener,
            target: None,
            foreign_unbind: None,
            count: 0,
            interop: true,
            bindings: Vec::new(),
        }
    }

    pub(crate) fn retain(&mut self) {
        self.count += 1;
    }

    /// One cooperative subscription went away; the record is deleted from
    /// both sides once the last one does.
    pub(crate) fn release_one(record: &Rc<RefCell<Self>>) {
        let emptied = {
            let mut listening = record.borrow_mut();
            listening.count = listening.count.saturating_sub(1);
            listening.count == 0
        };
        if emptied {
            Self::cleanup(record);
        }
    }

    /// Removes the record from both sides' bookkeeping maps.
    pub(crate) fn cleanup(record: &Rc<RefCell<Self>>) {
        let (listener, target, listener_id, target_id, interop) = {
            let listening = record.borrow();
            (
                listening.listener.clone(),
                listening.target.clone(),
                listening.listener_id,
                listening.target_id,
                listening.interop,
            )
        };
        if let Some(state) = listener.upgrade() {
            state.borrow_mut().listening_to.remove(&target_id);
        }
        if !interop {
            if let Some(state) = target.and_then(|weak| weak.upgrade()) {
                state.borrow_mut().listeners.remove(&listener_id);
            }
        }
    }

    /// Tears down this record's subscriptions on the target, narrowed by the
    /// optional name and handler filters.
    pub(crate) fn stop(
        record: &Rc<RefCell<Self>>,
        names: Option<&str>,
        handler: Option<HandlerId>,
        listener_id: EntityId,
    ) {
        let (interop, target, foreign) = {
            let listening = record.borrow();
            (
                listening.interop,
                listening.target.clone(),
                listening.foreign_unbind.clone(),
            )
        };
        if interop {
            if let Some(unbind) = foreign {
                unbind(names, listener_id);
            }
            let emptied = {
                let mut listening = record.borrow_mut();
                listening.bindings.retain(|(name, id)| {
                    let name_hit = names
                        .map_or(true, |tokens| tokens.split_whitespace().any(|n| n == name));
                    let handler_hit = handler.map_or(true, |h| *id == h);
                    !(name_hit && handler_hit)
                });
                listening.bindings.is_empty()
            };
            if emptied {
                Self::cleanup(record);
            }
        } else if let Some(state) = target.and_then(|weak| weak.upgrade()) {
            // Rides the target's own off path: handler backrefs decrement the
            // count, and the record cleans itself up at zero.
            registry_off(&state, names, handler, Some(listener_id));
        } else {
            // Target is gone; nothing to unsubscribe from.
            Self::cleanup(record);
        }
    }
}

impl<A: 'static> Emitter<A> {
    /// Subscribes this entity to `names` on `target`, routed through the
    /// pair's unique [`Listening`] record.
    pub fn listen_to<T, F>(&self, target: &T, names: &str, f: F) -> Result<HandlerId, ListenError>
    where
        T: EventTarget<A> + Clone + 'static,
        F: Fn(&str, &[A]) + 'static,
    {
        self.listen_to_shared(target, names, callback(f))
    }

    /// As [`Emitter::listen_to`] with an already-shared callback.
    pub fn listen_to_shared<T>(
        &self,
        target: &T,
        names: &str,
        f: Callback<A>,
    ) -> Result<HandlerId, ListenError>
    where
        T: EventTarget<A> + Clone + 'static,
    {
        if names.split_whitespace().next().is_none() {
            return Ok(self.ids().handler_id());
        }
        let target_id = target.entity_id();
        let (record, created) = {
            let mut state = self.state.borrow_mut();
            match state.listening_to.get(&target_id) {
                Some(record) => (Rc::clone(record), false),
                None => {
                    let record = Rc::new(RefCell::new(Listening::new(
                        self.id(),
                        target_id,
                        Rc::downgrade(&self.state),
                    )));
                    state.listening_to.insert(target_id, Rc::clone(&record));
                    (record, true)
                }
            }
        };
        match target.registry() {
            Some(registry) => {
                {
                    let mut listening = record.borrow_mut();
                    listening.interop = false;
                    listening.target = Some(Rc::downgrade(&registry.state));
                }
                registry
                    .state
                    .borrow_mut()
                    .listeners
                    .insert(self.id(), Rc::clone(&record));
                let id = registry.bind(
                    NameSpec::parse(names).bindings(f),
                    Some(self.id()),
                    Some(Rc::clone(&record)),
                    false,
                );
                Ok(id)
            }
            None => {
                let mut bound: Vec<String> = Vec::new();
                for name in names.split_whitespace() {
                    if let Err(err) = target.subscribe(name, Rc::clone(&f), self.id()) {
                        // No partial state: roll back what this call bound and
                        // drop the record if this call created it empty.
                        for earlier in &bound {
                            target.unsubscribe(Some(earlier), self.id());
                        }
                        if created && record.borrow().bindings.is_empty() {
                            self.state.borrow_mut().listening_to.remove(&target_id);
                        }
                        return Err(err);
                    }
                    bound.push(name.to_owned());
                }
                let id = self.ids().handler_id();
                {
                    let mut listening = record.borrow_mut();
                    listening.interop = true;
                    if listening.foreign_unbind.is_none() {
                        let foreign = target.clone();
                        listening.foreign_unbind = Some(Rc::new(move |name, context| {
                            match name {
                                None => foreign.unsubscribe(None, context),
                                Some(tokens) => {
                                    for token in tokens.split_whitespace() {
                                        foreign.unsubscribe(Some(token), context);
                                    }
                                }
                            }
                        }));
                    }
                    for name in bound {
                        listening.bindings.push((name, id));
                    }
                }
                Ok(id)
            }
        }
    }

    /// Listens until each named binding fires once; the binding removes
    /// itself before the user callback runs.
    pub fn listen_to_once<T, F>(&self, target: &T, names: &str, f: F) -> Result<(), ListenError>
    where
        T: EventTarget<A> + Clone + 'static,
        F: Fn(&str, &[A]) + 'static,
    {
        let shared = callback(f);
        let target_id = target.entity_id();
        for name in names.split_whitespace() {
            let slot: Rc<Cell<Option<HandlerId>>> = Rc::new(Cell::new(None));
            let fired = Rc::new(Cell::new(false));
            let weak = self.downgrade();
            let inner = Rc::clone(&shared);
            let handle = Rc::clone(&slot);
            let bound_name = name.to_owned();
            let wrapped = callback(move |event: &str, args: &[A]| {
                if fired.replace(true) {
                    return;
                }
                if let Some(listener) = weak.upgrade() {
                    listener.stop_listening_filtered(
                        Some(target_id),
                        Some(&bound_name),
                        handle.get(),
                    );
                }
                inner(event, args);
            });
            let id = self.listen_to_shared(target, name, wrapped)?;
            slot.set(Some(id));
        }
        Ok(())
    }

    /// Tears down every listening this entity holds.
    pub fn stop_listening(&self) {
        self.stop_listening_filtered(None, None, None);
    }

    /// Tears down only the listening on one target.
    pub fn stop_listening_to(&self, target: EntityId) {
        self.stop_listening_filtered(Some(target), None, None);
    }

    /// General teardown: optional target, optional whitespace-separated name
    /// filter, optional handler filter.
    pub fn stop_listening_filtered(
        &self,
        target: Option<EntityId>,
        names: Option<&str>,
        handler: Option<HandlerId>,
    ) {
        let records: Vec<Rc<RefCell<Listening<A>>>> = {
            let state = self.state.borrow();
            match target {
                Some(target_id) => state
                    .listening_to
                    .get(&target_id)
                    .cloned()
                    .into_iter()
                    .collect(),
                None => state.listening_to.values().cloned().collect(),
            }
        };
        for record in records {
            Listening::stop(&record, names, handler, self.id());
        }
    }
}
