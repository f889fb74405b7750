//! Concrete event payload for the data layer.
//!
//! Handlers receive `(event_name, &[Arg])`. The argument layout per reserved
//! event name:
//!
//! - `change:<attr>`: `[Model, Value]` (the new value)
//! - `change`: `[Model]`
//! - `invalid`: `[Model | Collection, Value]` (the validation error)
//! - `add` / `remove`: `[Model, Collection, Index]`
//! - `update`: `[Collection, Changes]`
//! - `sort` / `reset`: `[Collection]`
//! - `destroy`: `[Model, Collection?]`
//! - `request`: `[Model | Collection]`
//! - `sync` / `error`: `[Model | Collection, Value]` (the response)

use serde_json::Value;

use crate::collection::Collection;
use crate::model::Model;

/// Registry specialized to the data layer's payload.
pub type Events = keel_events::Emitter<Arg>;

/// Shared callback over the data layer's payload.
pub type Callback = keel_events::Callback<Arg>;

/// One positional event argument.
#[derive(Clone, Debug)]
pub enum Arg {
    Model(Model),
    Collection(Collection),
    Value(Value),
    Index(usize),
    Changes(Changes),
}

impl Arg {
    pub fn as_model(&self) -> Option<&Model> {
        match self {
            Self::Model(model) => Some(model),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Self::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(index) => Some(*index),
            _ => None,
        }
    }

    pub fn as_changes(&self) -> Option<&Changes> {
        match self {
            Self::Changes(changes) => Some(changes),
            _ => None,
        }
    }
}

/// Structural delta carried by a collection `update` event.
#[derive(Clone, Debug, Default)]
pub struct Changes {
    pub added: Vec<Model>,
    pub removed: Vec<Model>,
    pub merged: Vec<Model>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.merged.is_empty()
    }
}
