//! An observable data layer: attribute-tracking models and ordered,
//! id-indexed collections with reconciliation and bubbling change events.
//!
//! A [`Model`] holds a bag of JSON attributes and reports every mutation
//! through fine-grained (`change:<attr>`) and aggregate (`change`) events.
//! A [`Collection`] keeps models in a comparator-defined or insertion order,
//! indexes them by client and server identity, reconciles its membership
//! against incoming lists, and relays every member event to its own
//! listeners. The `sync` module maps both onto CRUD requests against a
//! pluggable [`Transport`].
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use keel::{Collection, CollectionOptions, Item};
//! use serde_json::json;
//!
//! let todos = Collection::new(CollectionOptions::default());
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&seen);
//! todos.on("add remove", move |name, _args| {
//!     sink.borrow_mut().push(name.to_owned());
//! });
//!
//! todos.set(vec![Item::attrs(json!({"id": 1, "title": "write"}))], &Default::default());
//! todos.set(vec![Item::attrs(json!({"id": 2, "title": "ship"}))], &Default::default());
//!
//! assert!(todos.get_by_id(&json!(2)).is_some());
//! assert!(todos.get_by_id(&json!(1)).is_none());
//! assert_eq!(seen.borrow().as_slice(), ["add", "remove", "add"]);
//! ```

pub mod collection;
pub mod events;
pub mod model;
pub mod sync;

pub use collection::{
    AddOptions, Collection, CollectionError, CollectionOptions, Comparator, Item,
    SetOptions as CollectionSetOptions,
};
pub use events::{Arg, Callback, Changes, Events};
pub use model::{Attributes, Cid, Model, ModelError, ModelOptions, SetOptions, Validator};
pub use sync::{
    DestroyOptions, FetchOptions, SaveOptions, SyncMethod, SyncRequest, Transport,
};
