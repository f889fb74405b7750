//! The ordered indexed set: an ordered sequence of models with dual-key
//! lookup, reconciliation against an incoming list, and event relaying.
//!
//! A [`Collection`] subscribes to every contained model's wildcard channel,
//! so model-level events bubble to collection-level listeners. The dual index
//! (`cid` -> model, id -> model) is kept exactly in step with the ordered
//! sequence: an id change on a contained model atomically re-keys the
//! id-indexed entry while the cid entry never moves.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use thiserror::Error;

use keel_events::{callback, EntityId, EventTarget, HandlerId, IdGen, ListenError};

use crate::events::{Arg, Changes, Events};
use crate::model::{
    Attributes, Cid, Model, ModelError, ModelOptions, SetOptions as ModelSetOptions, Validator,
};

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("cannot sort a collection without a comparator")]
    NoComparator,
    #[error("cannot derive a url for this collection")]
    NoUrl,
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Sort-order collaborator: sort by one attribute, by a derived key, or with
/// a full comparison function.
#[derive(Clone)]
pub enum Comparator {
    /// Sort by a named attribute.
    Attr(String),
    /// Sort by a derived key.
    Key(Rc<dyn Fn(&Model) -> Value>),
    /// Full two-model comparison.
    Cmp(Rc<dyn Fn(&Model, &Model) -> Ordering>),
}

/// One incoming item for `set` / `add` / `reset`: either an existing model
/// handle or a plain attribute bag to construct one from.
#[derive(Clone)]
pub enum Item {
    Model(Model),
    Attrs(Attributes),
}

impl Item {
    /// Convenience: wraps a `Value::Object` as an attribute bag. Any other
    /// value becomes an empty bag.
    pub fn attrs(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Attrs(map),
            _ => Self::Attrs(Attributes::new()),
        }
    }
}

impl From<Model> for Item {
    fn from(model: Model) -> Self {
        Self::Model(model)
    }
}

impl From<Attributes> for Item {
    fn from(attrs: Attributes) -> Self {
        Self::Attrs(attrs)
    }
}

/// Options for one reconciliation pass.
#[derive(Clone, Debug)]
pub struct SetOptions {
    /// Construct and insert items that match no existing member.
    pub add: bool,
    /// Remove members the incoming list does not reference.
    pub remove: bool,
    /// Merge incoming attributes into matched members.
    pub merge: bool,
    /// Fixed insertion position for additions; disables sorting.
    pub at: Option<usize>,
    /// Allow the comparator to run after this call.
    pub sort: bool,
    pub silent: bool,
    /// Forwarded to model construction and merge.
    pub validate: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            add: true,
            remove: true,
            merge: true,
            at: None,
            sort: true,
            silent: false,
            validate: false,
        }
    }
}

impl SetOptions {
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }
}

/// Options for the add-only convenience operations.
#[derive(Clone, Debug)]
pub struct AddOptions {
    pub at: Option<usize>,
    /// Merge attributes into an already-present match instead of ignoring it.
    pub merge: bool,
    pub sort: bool,
    pub silent: bool,
    pub validate: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            at: None,
            merge: false,
            sort: true,
            silent: false,
            validate: false,
        }
    }
}

impl AddOptions {
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }
}

/// Construction options.
#[derive(Clone, Default)]
pub struct CollectionOptions {
    pub comparator: Option<Comparator>,
    /// Id attribute for members constructed from attribute bags.
    pub id_attribute: Option<String>,
    /// Validator for members constructed from attribute bags.
    pub validator: Option<Validator>,
    /// Defaults for members constructed from attribute bags.
    pub defaults: Option<Attributes>,
    pub url: Option<String>,
    pub ids: Option<IdGen>,
}

struct CollectionState {
    models: Vec<Model>,
    by_cid: BTreeMap<Cid, Model>,
    by_id: BTreeMap<String, Model>,
    comparator: Option<Comparator>,
    id_attribute: String,
    validator: Option<Validator>,
    defaults: Option<Attributes>,
    url: Option<String>,
    ids: IdGen,
}

pub(crate) struct CollectionInner {
    pub(crate) events: Events,
    state: RefCell<CollectionState>,
}

/// Handle onto one ordered indexed set.
pub struct Collection {
    pub(crate) inner: Rc<CollectionInner>,
}

impl Clone for Collection {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("len", &self.len())
            .finish()
    }
}

/// Index key for a server-assigned id value; null ids are not indexed.
fn id_key(id: &Value) -> Option<String> {
    match id {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl Collection {
    pub fn new(options: CollectionOptions) -> Self {
        let ids = options.ids.unwrap_or_default();
        let events = Events::with_ids(ids.clone());
        Self {
            inner: Rc::new(CollectionInner {
                events,
                state: RefCell::new(CollectionState {
                    models: Vec::new(),
                    by_cid: BTreeMap::new(),
                    by_id: BTreeMap::new(),
                    comparator: options.comparator,
                    id_attribute: options.id_attribute.unwrap_or_else(|| "id".to_owned()),
                    validator: options.validator,
                    defaults: options.defaults,
                    url: options.url,
                    ids,
                }),
            }),
        }
    }

    /// Builds a collection and silently seeds it with `items`.
    pub fn from_items(items: Vec<Item>, options: CollectionOptions) -> Self {
        let collection = Self::new(options);
        collection.reset(items, true);
        collection
    }

    pub(crate) fn from_inner(inner: Rc<CollectionInner>) -> Self {
        Self { inner }
    }

    /// Two handles to the same collection compare equal.
    pub fn ptr_eq(&self, other: &Collection) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn len(&self) -> usize {
        self.inner.state.borrow().models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the ordered sequence.
    pub fn models(&self) -> Vec<Model> {
        self.inner.state.borrow().models.clone()
    }

    pub fn at(&self, index: usize) -> Option<Model> {
        self.inner.state.borrow().models.get(index).cloned()
    }

    pub fn index_of(&self, model: &Model) -> Option<usize> {
        self.inner
            .state
            .borrow()
            .models
            .iter()
            .position(|member| member.ptr_eq(model))
    }

    /// The server id an attribute bag would be indexed under.
    pub fn model_id(&self, attrs: &Attributes) -> Option<Value> {
        let state = self.inner.state.borrow();
        match attrs.get(&state.id_attribute) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        }
    }

    /// Resolves an incoming item against the dual index: by cid for model
    /// handles, by id otherwise.
    pub fn get(&self, item: &Item) -> Option<Model> {
        match item {
            Item::Model(model) => {
                if let Some(found) = self.get_by_cid(model.cid()) {
                    return Some(found);
                }
                let id = self.model_id(&model.attributes())?;
                self.get_by_id(&id)
            }
            Item::Attrs(attrs) => {
                let id = self.model_id(attrs)?;
                self.get_by_id(&id)
            }
        }
    }

    pub fn get_by_id(&self, id: &Value) -> Option<Model> {
        let key = id_key(id)?;
        self.inner.state.borrow().by_id.get(&key).cloned()
    }

    pub fn get_by_cid(&self, cid: Cid) -> Option<Model> {
        self.inner.state.borrow().by_cid.get(&cid).cloned()
    }

    pub fn has(&self, item: &Item) -> bool {
        self.get(item).is_some()
    }

    /// Reconciles the collection against an incoming list.
    ///
    /// Matched members are merged (`options.merge`), unmatched incoming items
    /// are constructed and inserted (`options.add`), unreferenced members are
    /// removed (`options.remove`). Removals apply before additions. Fires
    /// per-model `add` / `remove` events, `sort` when the order changed, and
    /// one aggregate `update` carrying the full delta. Returns the incoming
    /// items resolved to member handles; items dropped by validation are
    /// omitted.
    pub fn set(&self, items: Vec<Item>, options: &SetOptions) -> Vec<Model> {
        let at = {
            let state = self.inner.state.borrow();
            options.at.map(|at| at.min(state.models.len()))
        };
        let (sortable, sort_attr) = {
            let state = self.inner.state.borrow();
            let sortable = state.comparator.is_some() && at.is_none() && options.sort;
            let sort_attr = match &state.comparator {
                Some(Comparator::Attr(attr)) => Some(attr.clone()),
                _ => None,
            };
            (sortable, sort_attr)
        };
        let model_options = ModelSetOptions {
            validate: options.validate,
            silent: options.silent,
            unset: false,
        };

        let mut resolved: Vec<Model> = Vec::new();
        let mut ordered: Vec<Model> = Vec::new();
        let mut to_add: Vec<Model> = Vec::new();
        let mut to_merge: Vec<Model> = Vec::new();
        let mut seen: BTreeSet<Cid> = BTreeSet::new();
        let mut needs_sort = false;

        for item in items {
            if let Some(existing) = self.get(&item) {
                let same_instance = matches!(&item, Item::Model(model) if model.ptr_eq(&existing));
                if options.merge && !same_instance {
                    let attrs = match &item {
                        Item::Model(model) => model.attributes(),
                        Item::Attrs(attrs) => attrs.clone(),
                    };
                    // A merge rejected by validation is skipped entirely.
                    if existing.set(attrs, &model_options) {
                        to_merge.push(existing.clone());
                        if sortable && !needs_sort {
                            needs_sort = match &sort_attr {
                                Some(attr) => existing.has_changed(Some(attr)),
                                None => existing.has_changed(None),
                            };
                        }
                    }
                }
                if seen.insert(existing.cid()) {
                    ordered.push(existing.clone());
                }
                resolved.push(existing);
            } else if options.add {
                if let Some(model) = self.prepare_model(item, options) {
                    self.add_reference(&model);
                    seen.insert(model.cid());
                    ordered.push(model.clone());
                    to_add.push(model.clone());
                    resolved.push(model);
                }
            }
        }

        let mut to_remove: Vec<Model> = Vec::new();
        if options.remove {
            let current = self.inner.state.borrow().models.clone();
            for model in current {
                if !seen.contains(&model.cid()) {
                    to_remove.push(model);
                }
            }
            if !to_remove.is_empty() {
                self.remove_members(&to_remove, options.silent);
            }
        }

        let mut order_changed = false;
        let mut spliced_at = None;
        let replace = !sortable && options.add && options.remove && at.is_none();
        {
            let mut state = self.inner.state.borrow_mut();
            if replace && !ordered.is_empty() {
                // Wholesale replacement: swap the backing sequence and detect
                // positionally whether the order actually changed.
                order_changed = state.models.len() != ordered.len()
                    || state
                        .models
                        .iter()
                        .zip(&ordered)
                        .any(|(before, after)| !before.ptr_eq(after));
                state.models = ordered.clone();
            } else if !to_add.is_empty() {
                if sortable {
                    needs_sort = true;
                }
                // Removals may have shrunk the sequence since `at` was
                // clamped, so clamp again at splice time.
                let index = at.unwrap_or(state.models.len()).min(state.models.len());
                spliced_at = at.map(|_| index);
                // O(n) rebuild rather than per-element shifting.
                let mut next = Vec::with_capacity(state.models.len() + to_add.len());
                next.extend_from_slice(&state.models[..index]);
                next.extend(to_add.iter().cloned());
                next.extend_from_slice(&state.models[index..]);
                state.models = next;
            }
        }
        if needs_sort {
            self.sort_internal(true);
        }

        if !options.silent {
            for (offset, model) in to_add.iter().enumerate() {
                let index = spliced_at
                    .map(|at| at + offset)
                    .or_else(|| self.index_of(model));
                let mut args = vec![Arg::Model(model.clone()), Arg::Collection(self.clone())];
                if let Some(index) = index {
                    args.push(Arg::Index(index));
                }
                model.trigger("add", &args);
            }
            if needs_sort || order_changed {
                self.trigger("sort", &[Arg::Collection(self.clone())]);
            }
            if !to_add.is_empty() || !to_remove.is_empty() || !to_merge.is_empty() {
                self.trigger(
                    "update",
                    &[
                        Arg::Collection(self.clone()),
                        Arg::Changes(Changes {
                            added: to_add,
                            removed: to_remove,
                            merged: to_merge,
                        }),
                    ],
                );
            }
        }
        resolved
    }

    /// Add-only reconciliation.
    pub fn add(&self, items: Vec<Item>, options: &AddOptions) -> Vec<Model> {
        self.set(
            items,
            &SetOptions {
                add: true,
                remove: false,
                merge: options.merge,
                at: options.at,
                sort: options.sort,
                silent: options.silent,
                validate: options.validate,
            },
        )
    }

    pub fn add_one(&self, item: Item, options: &AddOptions) -> Option<Model> {
        self.add(vec![item], options).pop()
    }

    /// Removes the referenced members. Fires per-model `remove` events and
    /// one aggregate `update` unless silent.
    pub fn remove(&self, items: &[Item], silent: bool) -> Vec<Model> {
        let members: Vec<Model> = items.iter().filter_map(|item| self.get(item)).collect();
        let removed = self.remove_members(&members, silent);
        if !silent && !removed.is_empty() {
            self.trigger(
                "update",
                &[
                    Arg::Collection(self.clone()),
                    Arg::Changes(Changes {
                        removed: removed.clone(),
                        ..Changes::default()
                    }),
                ],
            );
        }
        removed
    }

    /// Replaces the whole membership, detaching every previous member's
    /// subscription first, and fires a single `reset` event instead of
    /// incremental `add` / `remove` events.
    pub fn reset(&self, items: Vec<Item>, silent: bool) -> Vec<Model> {
        let previous = self.inner.state.borrow().models.clone();
        for model in &previous {
            self.remove_reference(model);
        }
        {
            let mut state = self.inner.state.borrow_mut();
            state.models.clear();
            state.by_cid.clear();
            state.by_id.clear();
        }
        let models = self.add(items, &AddOptions::silent());
        if !silent {
            self.trigger("reset", &[Arg::Collection(self.clone())]);
        }
        models
    }

    pub fn push(&self, item: Item, options: &AddOptions) -> Option<Model> {
        let at = self.len();
        self.add(
            vec![item],
            &AddOptions {
                at: Some(at),
                ..options.clone()
            },
        )
        .pop()
    }

    pub fn pop(&self, silent: bool) -> Option<Model> {
        let last = self.at(self.len().checked_sub(1)?)?;
        self.remove(&[Item::Model(last)], silent).pop()
    }

    pub fn unshift(&self, item: Item, options: &AddOptions) -> Option<Model> {
        self.add(
            vec![item],
            &AddOptions {
                at: Some(0),
                ..options.clone()
            },
        )
        .pop()
    }

    pub fn shift(&self, silent: bool) -> Option<Model> {
        let first = self.at(0)?;
        self.remove(&[Item::Model(first)], silent).pop()
    }

    /// Re-applies the comparator to the existing members.
    pub fn sort(&self) -> Result<(), CollectionError> {
        if self.inner.state.borrow().comparator.is_none() {
            return Err(CollectionError::NoComparator);
        }
        self.sort_internal(false);
        Ok(())
    }

    fn sort_internal(&self, silent: bool) {
        let comparator = self.inner.state.borrow().comparator.clone();
        let Some(comparator) = comparator else {
            return;
        };
        // Sort a snapshot so user comparators run without the state borrowed.
        let mut models = self.inner.state.borrow().models.clone();
        match &comparator {
            Comparator::Attr(attr) => models.sort_by(|a, b| {
                let left = a.get(attr);
                let right = b.get(attr);
                compare_values(left.as_ref(), right.as_ref())
            }),
            Comparator::Key(key) => {
                models.sort_by(|a, b| compare_values(Some(&key(a)), Some(&key(b))))
            }
            Comparator::Cmp(cmp) => models.sort_by(|a, b| cmp(a, b)),
        }
        self.inner.state.borrow_mut().models = models;
        if !silent {
            self.trigger("sort", &[Arg::Collection(self.clone())]);
        }
    }

    pub fn comparator(&self) -> Option<Comparator> {
        self.inner.state.borrow().comparator.clone()
    }

    pub fn set_comparator(&self, comparator: Option<Comparator>) {
        self.inner.state.borrow_mut().comparator = comparator;
    }

    pub fn url(&self) -> Option<String> {
        self.inner.state.borrow().url.clone()
    }

    /// Snapshot of `[from, to)` of the ordered sequence, clamped to bounds.
    pub fn slice(&self, from: usize, to: usize) -> Vec<Model> {
        let state = self.inner.state.borrow();
        let to = to.min(state.models.len());
        let from = from.min(to);
        state.models[from..to].to_vec()
    }

    /// Each member's `attr` value; absent attributes render as null.
    pub fn pluck(&self, attr: &str) -> Vec<Value> {
        self.models()
            .iter()
            .map(|model| model.get(attr).unwrap_or(Value::Null))
            .collect()
    }

    /// Members whose attributes match every given pair.
    pub fn where_attrs(&self, attrs: &Attributes) -> Vec<Model> {
        self.models()
            .into_iter()
            .filter(|model| model.matches(attrs))
            .collect()
    }

    pub fn find_where(&self, attrs: &Attributes) -> Option<Model> {
        self.models().into_iter().find(|model| model.matches(attrs))
    }

    /// Each member's server id, in sequence order.
    pub fn model_ids(&self) -> Vec<Option<Value>> {
        self.models().iter().map(Model::id).collect()
    }

    /// `(id, model)` pairs, in sequence order.
    pub fn entries(&self) -> Vec<(Option<Value>, Model)> {
        self.models()
            .into_iter()
            .map(|model| (model.id(), model))
            .collect()
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.models().iter().map(Model::to_json).collect())
    }

    /// A new collection over the same member handles and configuration.
    pub fn clone_collection(&self) -> Collection {
        let (options, models) = {
            let state = self.inner.state.borrow();
            (
                CollectionOptions {
                    comparator: state.comparator.clone(),
                    id_attribute: Some(state.id_attribute.clone()),
                    validator: state.validator.clone(),
                    defaults: state.defaults.clone(),
                    url: state.url.clone(),
                    ids: Some(state.ids.clone()),
                },
                state.models.clone(),
            )
        };
        Self::from_items(models.into_iter().map(Item::Model).collect(), options)
    }

    /// Resolves an item to a member-ready model: instances adopt this
    /// collection as their advisory owner, attribute bags construct a new
    /// model with the collection's configuration. A construction rejected by
    /// validation fires `invalid` on the collection and yields `None`.
    pub(crate) fn prepare_model(&self, item: Item, options: &SetOptions) -> Option<Model> {
        match item {
            Item::Model(model) => {
                if !model.has_collection() {
                    model.set_collection(Some(self));
                }
                Some(model)
            }
            Item::Attrs(attrs) => {
                let (id_attribute, validator, defaults, ids) = {
                    let state = self.inner.state.borrow();
                    (
                        state.id_attribute.clone(),
                        state.validator.clone(),
                        state.defaults.clone(),
                        state.ids.clone(),
                    )
                };
                let model = Model::new(
                    attrs,
                    ModelOptions {
                        id_attribute: Some(id_attribute),
                        validator,
                        defaults,
                        url_root: None,
                        ids: Some(ids),
                        set: ModelSetOptions {
                            validate: options.validate,
                            silent: options.silent,
                            unset: false,
                        },
                    },
                );
                model.set_collection(Some(self));
                match model.validation_error() {
                    None => Some(model),
                    Some(error) => {
                        self.trigger(
                            "invalid",
                            &[Arg::Collection(self.clone()), Arg::Value(error)],
                        );
                        None
                    }
                }
            }
        }
    }

    /// Removes known members: ordered sequence, dual index, per-model
    /// `remove` events. The relay stays attached until after the event so the
    /// removal bubbles to collection listeners.
    fn remove_members(&self, members: &[Model], silent: bool) -> Vec<Model> {
        let mut removed = Vec::new();
        for member in members {
            let Some(model) = self.get(&Item::Model(member.clone())) else {
                continue;
            };
            let index = {
                let mut state = self.inner.state.borrow_mut();
                let Some(index) = state.models.iter().position(|m| m.ptr_eq(&model)) else {
                    continue;
                };
                state.models.remove(index);
                state.by_cid.remove(&model.cid());
                if let Some(key) = model.id().as_ref().and_then(id_key) {
                    state.by_id.remove(&key);
                }
                index
            };
            if !silent {
                model.trigger(
                    "remove",
                    &[
                        Arg::Model(model.clone()),
                        Arg::Collection(self.clone()),
                        Arg::Index(index),
                    ],
                );
            }
            removed.push(model.clone());
            self.remove_reference(&model);
        }
        removed
    }

    /// Indexes a new member and attaches the wildcard relay.
    fn add_reference(&self, model: &Model) {
        {
            let mut state = self.inner.state.borrow_mut();
            state.by_cid.insert(model.cid(), model.clone());
            if let Some(key) = model.id().as_ref().and_then(id_key) {
                state.by_id.insert(key, model.clone());
            }
        }
        // The relay holds only a weak reference: members must not keep their
        // collection alive.
        let weak = Rc::downgrade(&self.inner);
        let relay = callback(move |name: &str, args: &[Arg]| {
            if let Some(inner) = weak.upgrade() {
                Collection::from_inner(inner).on_model_event(name, args);
            }
        });
        model
            .events()
            .on_shared("all", relay, Some(self.entity_id()));
    }

    /// Detaches the wildcard relay and drops the advisory owner link.
    fn remove_reference(&self, model: &Model) {
        if let Some(owner) = model.collection() {
            if owner.ptr_eq(self) {
                model.set_collection(None);
            }
        }
        model.off(Some("all"), None, Some(self.entity_id()));
    }

    /// Relay for contained-model events: re-fires everything verbatim on the
    /// collection, except that `add` / `remove` originating from a different
    /// collection sharing the model are ignored. A member's `destroy` removes
    /// it; a `change` re-keys the id index when the id attribute moved.
    fn on_model_event(&self, name: &str, args: &[Arg]) {
        if let Some(Arg::Model(model)) = args.first() {
            if name == "add" || name == "remove" {
                if let Some(Arg::Collection(collection)) = args.get(1) {
                    if !collection.ptr_eq(self) {
                        return;
                    }
                }
            }
            if name == "destroy" {
                self.remove(&[Item::Model(model.clone())], false);
            }
            if name == "change" {
                let previous_id = self.model_id(&model.previous_attributes());
                let current_id = self.model_id(&model.attributes());
                if previous_id != current_id {
                    let mut state = self.inner.state.borrow_mut();
                    if let Some(key) = previous_id.as_ref().and_then(id_key) {
                        state.by_id.remove(&key);
                    }
                    if let Some(key) = current_id.as_ref().and_then(id_key) {
                        state.by_id.insert(key, model.clone());
                    }
                }
            }
        }
        self.trigger(name, args);
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

    pub fn stop_listening(&self) {
        self.inner.events.stop_listening();
    }
}

impl EventTarget<Arg> for Collection {
    fn entity_id(&self) -> EntityId {
        self.inner.events.id()
    }

    fn registry(&self) -> Option<Events> {
        Some(self.inner.events.clone())
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over sort keys: absent before present, then by type rank,
/// then within-type comparison.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_value(a, b),
    }
}

fn compare_value(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                match compare_value(left, right) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => Ordering::Equal,
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
