//! The attribute store: a single entity's key/value state with diffing,
//! validation, and change events.
//!
//! A [`Model`] is a clonable handle; clones observe the same state. Attribute
//! values are `serde_json::Value`, compared with deep structural equality.
//! Mutation goes exclusively through [`Model::set`] (and its `unset` / `clear`
//! wrappers), which drives the quiescent/changing state machine: a `set`
//! arriving re-entrantly from inside a change handler fires its own
//! per-attribute events and returns, leaving the outermost call to drain the
//! pending queue and fire the aggregate `"change"` events until the state
//! settles.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};
use thiserror::Error;

use keel_events::{EntityId, EventTarget, HandlerId, IdGen, ListenError};

use crate::collection::{Collection, CollectionInner};
use crate::events::{Arg, Events};

/// Attribute bag. With `preserve_order` enabled, iteration order is insertion
/// order, which fixes the order of per-attribute change events.
pub type Attributes = Map<String, Value>;

/// Validation collaborator: returns an error value to reject the proposed
/// attribute state, `None` to accept it.
pub type Validator = Rc<dyn Fn(&Attributes, &SetOptions) -> Option<Value>>;

/// Client-assigned identity: process-local, stable for the model's lifetime,
/// never reused, independent of any server-assigned id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Cid(pub(crate) u64);

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Options for one `set` call.
#[derive(Clone, Debug, Default)]
pub struct SetOptions {
    /// Run the validator against the union of current and proposed attributes.
    pub validate: bool,
    /// Suppress events for this call.
    pub silent: bool,
    /// Delete the named attributes instead of assigning them.
    pub unset: bool,
}

impl SetOptions {
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    pub fn validated() -> Self {
        Self {
            validate: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("cannot derive a url: no url root and no owning collection url")]
    NoUrl,
}

/// Construction options.
#[derive(Clone, Default)]
pub struct ModelOptions {
    /// Which attribute carries the server-assigned identity. Default `"id"`.
    pub id_attribute: Option<String>,
    pub validator: Option<Validator>,
    /// Filled in for any key the initial attributes leave absent.
    pub defaults: Option<Attributes>,
    pub url_root: Option<String>,
    /// Id generator; defaults to the thread-shared counter.
    pub ids: Option<IdGen>,
    /// Options forwarded to the construction-time `set`.
    pub set: SetOptions,
}

struct ModelState {
    cid: Cid,
    id_attribute: String,
    attributes: Attributes,
    /// Attributes differing from the quiescent snapshot.
    changed: Attributes,
    /// The quiescent snapshot itself.
    previous: Attributes,
    changing: bool,
    pending: bool,
    validator: Option<Validator>,
    validation_error: Option<Value>,
    defaults: Option<Attributes>,
    url_root: Option<String>,
    /// Advisory, non-owning link to the collection that added this model.
    collection: Option<Weak<CollectionInner>>,
    ids: IdGen,
}

pub(crate) struct ModelInner {
    pub(crate) events: Events,
    state: RefCell<ModelState>,
}

/// Handle onto one attribute store.
pub struct Model {
    pub(crate) inner: Rc<ModelInner>,
}

impl Clone for Model {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Model")
            .field("cid", &state.cid)
            .field("attributes", &state.attributes)
            .finish()
    }
}

impl Model {
    pub fn new(attrs: Attributes, options: ModelOptions) -> Self {
        let ids = options.ids.unwrap_or_default();
        let events = Events::with_ids(ids.clone());
        let cid = Cid(ids.mint());
        let mut initial = options.defaults.clone().unwrap_or_default();
        for (key, value) in attrs {
            initial.insert(key, value);
        }
        let model = Self {
            inner: Rc::new(ModelInner {
                events,
                state: RefCell::new(ModelState {
                    cid,
                    id_attribute: options.id_attribute.unwrap_or_else(|| "id".to_owned()),
                    attributes: Attributes::new(),
                    changed: Attributes::new(),
                    previous: Attributes::new(),
                    changing: false,
                    pending: false,
                    validator: options.validator,
                    validation_error: None,
                    defaults: options.defaults,
                    url_root: options.url_root,
                    collection: None,
                    ids,
                }),
            }),
        };
        // A freshly constructed model starts quiescent: the construction-time
        // set leaves no change history behind. Its validation outcome is
        // still observable through validation_error().
        model.set(initial, &options.set);
        model.inner.state.borrow_mut().changed = Attributes::new();
        model
    }

    /// Two handles to the same model compare equal.
    pub fn ptr_eq(&self, other: &Model) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn cid(&self) -> Cid {
        self.inner.state.borrow().cid
    }

    pub fn id_attribute(&self) -> String {
        self.inner.state.borrow().id_attribute.clone()
    }

    /// The server-assigned identity: `attributes[id_attribute]`, `None` when
    /// absent or null.
    pub fn id(&self) -> Option<Value> {
        let state = self.inner.state.borrow();
        match state.attributes.get(&state.id_attribute) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        }
    }

    /// True iff the model has never been assigned a server identity.
    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    pub fn get(&self, attr: &str) -> Option<Value> {
        self.inner.state.borrow().attributes.get(attr).cloned()
    }

    /// True if the attribute is present and non-null.
    pub fn has(&self, attr: &str) -> bool {
        !matches!(self.get(attr), None | Some(Value::Null))
    }

    pub fn attributes(&self) -> Attributes {
        self.inner.state.borrow().attributes.clone()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.attributes())
    }

    /// True if every given pair matches the current attributes.
    pub fn matches(&self, attrs: &Attributes) -> bool {
        let state = self.inner.state.borrow();
        attrs
            .iter()
            .all(|(key, value)| state.attributes.get(key) == Some(value))
    }

    /// HTML-escaped string form of an attribute; absent and null render empty.
    pub fn escape(&self, attr: &str) -> String {
        let raw = match self.get(attr) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        };
        let mut escaped = String::with_capacity(raw.len());
        for ch in raw.chars() {
            match ch {
                '&' => escaped.push_str("&amp;"),
                '<' => escaped.push_str("&lt;"),
                '>' => escaped.push_str("&gt;"),
                '"' => escaped.push_str("&quot;"),
                '\'' => escaped.push_str("&#x27;"),
                '`' => escaped.push_str("&#x60;"),
                _ => escaped.push(ch),
            }
        }
        escaped
    }

    pub fn validation_error(&self) -> Option<Value> {
        self.inner.state.borrow().validation_error.clone()
    }

    /// Sets (or with `options.unset`, deletes) the given attributes.
    ///
    /// Fires one `change:<attr>` per attribute whose value differs from the
    /// current one, in attribute-iteration order. The outermost call alone
    /// fires the aggregate `change` events once quiescent, draining any
    /// work queued by re-entrant sets. Returns `false` without mutating
    /// anything if validation was requested and rejected the proposal.
    pub fn set(&self, attrs: Attributes, options: &SetOptions) -> bool {
        if !self.validate_attrs(&attrs, options) {
            return false;
        }
        let mut changes: Vec<String> = Vec::new();
        let was_changing;
        {
            let mut state = self.inner.state.borrow_mut();
            was_changing = state.changing;
            state.changing = true;
            if !was_changing {
                state.previous = state.attributes.clone();
                state.changed = Attributes::new();
            }
            for (attr, value) in attrs {
                let differs_now = match (state.attributes.get(&attr), options.unset) {
                    (current, true) => current.is_some(),
                    (Some(current), false) => current != &value,
                    (None, false) => true,
                };
                if differs_now {
                    changes.push(attr.clone());
                }
                let differs_from_quiescent = match (state.previous.get(&attr), options.unset) {
                    (previous, true) => previous.is_some(),
                    (Some(previous), false) => previous != &value,
                    (None, false) => true,
                };
                if differs_from_quiescent {
                    let recorded = if options.unset { Value::Null } else { value.clone() };
                    state.changed.insert(attr.clone(), recorded);
                } else {
                    // Set away from and back to the quiescent value: not a change.
                    state.changed.shift_remove(&attr);
                }
                if options.unset {
                    state.attributes.shift_remove(&attr);
                } else {
                    state.attributes.insert(attr, value);
                }
            }
            if !options.silent && !changes.is_empty() {
                state.pending = true;
            }
        }
        if !options.silent {
            for attr in &changes {
                let current = self.get(attr).unwrap_or(Value::Null);
                self.trigger(
                    &format!("change:{attr}"),
                    &[Arg::Model(self.clone()), Arg::Value(current)],
                );
            }
        }
        if was_changing {
            // A re-entrant call: the outermost set owns the aggregate events.
            return true;
        }
        if !options.silent {
            loop {
                let drained = {
                    let mut state = self.inner.state.borrow_mut();
                    if state.pending {
                        state.pending = false;
                        true
                    } else {
                        false
                    }
                };
                if !drained {
                    break;
                }
                self.trigger("change", &[Arg::Model(self.clone())]);
            }
        }
        {
            let mut state = self.inner.state.borrow_mut();
            state.pending = false;
            state.changing = false;
        }
        true
    }

    /// Single-attribute form of [`Model::set`].
    pub fn set_attr(&self, attr: &str, value: Value, options: &SetOptions) -> bool {
        let mut attrs = Attributes::new();
        attrs.insert(attr.to_owned(), value);
        self.set(attrs, options)
    }

    /// Deletes one attribute.
    pub fn unset(&self, attr: &str, options: &SetOptions) -> bool {
        let mut attrs = Attributes::new();
        attrs.insert(attr.to_owned(), Value::Null);
        self.set(
            attrs,
            &SetOptions {
                unset: true,
                ..options.clone()
            },
        )
    }

    /// Deletes every attribute.
    pub fn clear(&self, options: &SetOptions) -> bool {
        let attrs: Attributes = {
            let state = self.inner.state.borrow();
            state
                .attributes
                .keys()
                .map(|key| (key.clone(), Value::Null))
                .collect()
        };
        self.set(
            attrs,
            &SetOptions {
                unset: true,
                ..options.clone()
            },
        )
    }

    /// With an attribute: has it changed from the quiescent snapshot?
    /// Without: has anything?
    pub fn has_changed(&self, attr: Option<&str>) -> bool {
        let state = self.inner.state.borrow();
        match attr {
            None => !state.changed.is_empty(),
            Some(attr) => state.changed.contains_key(attr),
        }
    }

    /// Without a diff: the changed-attribute bag, `None` when nothing
    /// changed. With a diff: which of the supplied hypothetical values would
    /// differ from the reference state (the quiescent snapshot while
    /// changing, current attributes otherwise), without mutating anything.
    pub fn changed_attributes(&self, diff: Option<&Attributes>) -> Option<Attributes> {
        let state = self.inner.state.borrow();
        match diff {
            None => {
                if state.changed.is_empty() {
                    None
                } else {
                    Some(state.changed.clone())
                }
            }
            Some(diff) => {
                let old = if state.changing {
                    &state.previous
                } else {
                    &state.attributes
                };
                let mut changed = Attributes::new();
                for (attr, value) in diff {
                    if old.get(attr) == Some(value) {
                        continue;
                    }
                    changed.insert(attr.clone(), value.clone());
                }
                if changed.is_empty() {
                    None
                } else {
                    Some(changed)
                }
            }
        }
    }

    /// An attribute's value in the quiescent snapshot.
    pub fn previous(&self, attr: &str) -> Option<Value> {
        self.inner.state.borrow().previous.get(attr).cloned()
    }

    /// The whole quiescent snapshot.
    pub fn previous_attributes(&self) -> Attributes {
        self.inner.state.borrow().previous.clone()
    }

    /// A new, independent model with a copy of the current attributes.
    /// Nested structures are shared the way `Value: Clone` shares them; the
    /// clone gets a fresh cid and no collection link.
    pub fn clone_model(&self) -> Model {
        let state = self.inner.state.borrow();
        Model::new(
            state.attributes.clone(),
            ModelOptions {
                id_attribute: Some(state.id_attribute.clone()),
                validator: state.validator.clone(),
                defaults: state.defaults.clone(),
                url_root: state.url_root.clone(),
                ids: Some(state.ids.clone()),
                set: SetOptions::default(),
            },
        )
    }

    /// Runs the validator against the current attributes alone.
    pub fn is_valid(&self) -> bool {
        self.validate_attrs(&Attributes::new(), &SetOptions::validated())
    }

    pub(crate) fn validate_attrs(&self, attrs: &Attributes, options: &SetOptions) -> bool {
        if !options.validate {
            return true;
        }
        let validator = self.inner.state.borrow().validator.clone();
        let Some(validator) = validator else {
            return true;
        };
        let merged = {
            let state = self.inner.state.borrow();
            let mut merged = state.attributes.clone();
            for (key, value) in attrs {
                merged.insert(key.clone(), value.clone());
            }
            merged
        };
        let error = validator(&merged, options);
        self.inner.state.borrow_mut().validation_error = error.clone();
        match error {
            None => true,
            Some(error) => {
                self.trigger("invalid", &[Arg::Model(self.clone()), Arg::Value(error)]);
                false
            }
        }
    }

    /// The collection that first added this model, if it is still alive.
    pub fn collection(&self) -> Option<Collection> {
        self.inner
            .state
            .borrow()
            .collection
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Collection::from_inner)
    }

    pub(crate) fn has_collection(&self) -> bool {
        self.inner.state.borrow().collection.is_some()
    }

    pub(crate) fn set_collection(&self, collection: Option<&Collection>) {
        self.inner.state.borrow_mut().collection =
            collection.map(|collection| Rc::downgrade(&collection.inner));
    }

    /// The transport endpoint for this model: the explicit url root, else the
    /// owning collection's url, extended with the id for persisted models.
    pub fn url(&self) -> Result<String, ModelError> {
        let base = self
            .inner
            .state
            .borrow()
            .url_root
            .clone()
            .or_else(|| self.collection().and_then(|collection| collection.url()));
        let base = base.ok_or(ModelError::NoUrl)?;
        match self.id() {
            None => Ok(base),
            Some(Value::String(id)) => Ok(format!("{}/{}", base.trim_end_matches('/'), id)),
            Some(other) => Ok(format!("{}/{}", base.trim_end_matches('/'), other)),
        }
    }

    // Event registry delegation.

    pub fn events(&self) -> &Events {
        &self.inner.events
    }

    pub fn entity_id(&self) -> EntityId {
        self.inner.events.id()
    }

    pub fn on<F>(&self, names: &str, f: F) -> HandlerId
    where
        F: Fn(&str, &[Arg]) + 'static,
    {
        self.inner.events.on(names, f)
    }

    pub fn once<F>(&self, names: &str, f: F) -> HandlerId
    where
        F: Fn(&str, &[Arg]) + 'static,
    {
        self.inner.events.once(names, f)
    }

    pub fn off(&self, names: Option<&str>, handler: Option<HandlerId>, context: Option<EntityId>) {
        self.inner.events.off(names, handler, context);
    }

    pub fn off_all(&self) {
        self.inner.events.off_all();
    }

    pub fn trigger(&self, names: &str, args: &[Arg]) {
        self.inner.events.trigger(names, args);
    }

    pub fn listen_to<T, F>(&self, target: &T, names: &str, f: F) -> Result<HandlerId, ListenError>
    where
        T: EventTarget<Arg> + Clone + 'static,
        F: Fn(&str, &[Arg]) + 'static,
    {
        self.inner.events.listen_to(target, names, f)
    }

    pub fn listen_to_once<T, F>(&self, target: &T, names: &str, f: F) -> Result<(), ListenError>
    where
        T: EventTarget<Arg> + Clone + 'static,
        F: Fn(&str, &[Arg]) + 'static,
    {
        self.inner.events.listen_to_once(target, names, f)
    }

    pub fn stop_listening(&self) {
        self.inner.events.stop_listening();
    }

    pub fn stop_listening_to(&self, target: EntityId) {
        self.inner.events.stop_listening_to(target);
    }

    /// Detaches all listenings and announces destruction; a containing
    /// collection removes the model through its relay.
    pub(crate) fn publish_destroy(&self) {
        self.stop_listening();
        let mut args = vec![Arg::Model(self.clone())];
        if let Some(collection) = self.collection() {
            args.push(Arg::Collection(collection));
        }
        self.trigger("destroy", &args);
    }
}

impl EventTarget<Arg> for Model {
    fn entity_id(&self) -> EntityId {
        self.inner.events.id()
    }

    fn registry(&self) -> Option<Events> {
        Some(self.inner.events.clone())
    }
}
