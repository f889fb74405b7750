//! The persistence seam: maps model and collection state onto CRUD requests
//! against a pluggable [`Transport`].
//!
//! The transport is synchronous; `Ok` carries the server's response body,
//! `Err` the error payload. Every operation announces itself with a
//! `request` event before sending, then fires `sync` on success or `error`
//! on failure. Optimistic updates apply local state before the request;
//! `wait` defers them until the server has accepted.

use serde_json::Value;

use crate::collection::{
    AddOptions, Collection, CollectionError, Item, SetOptions as CollectionSetOptions,
};
use crate::events::Arg;
use crate::model::{Attributes, Model, ModelError, SetOptions as ModelSetOptions};

/// The CRUD verb for one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMethod {
    Create,
    Read,
    Update,
    Patch,
    Delete,
}

impl SyncMethod {
    /// The HTTP method an HTTP-backed transport would use.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create => "POST",
            Self::Read => "GET",
            Self::Update => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// One outgoing request.
#[derive(Clone, Debug)]
pub struct SyncRequest {
    pub method: SyncMethod,
    pub url: String,
    pub body: Option<Value>,
}

/// Server-side of the persistence seam.
pub trait Transport {
    /// Issues one request; `Ok` carries the response body, `Err` the error
    /// payload.
    fn send(&self, request: &SyncRequest) -> Result<Value, Value>;
}

/// Options for [`Model::save`].
#[derive(Clone, Debug)]
pub struct SaveOptions {
    /// Apply local attributes only after the server accepts.
    pub wait: bool,
    /// Send only the changed attributes with `PATCH` instead of the full
    /// state with `PUT`.
    pub patch: bool,
    /// Validation is on by default for saves.
    pub validate: bool,
    pub silent: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            wait: false,
            patch: false,
            validate: true,
            silent: false,
        }
    }
}

/// Options for [`Model::destroy`].
#[derive(Clone, Debug, Default)]
pub struct DestroyOptions {
    /// Announce destruction only after the server accepts.
    pub wait: bool,
}

/// Options for [`Collection::fetch`].
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    /// Replace the membership wholesale instead of reconciling.
    pub reset: bool,
    /// Reconciliation options for the non-reset path; `set.silent` also
    /// governs the reset path.
    pub set: CollectionSetOptions,
}

impl Model {
    /// Reloads the model's attributes from the server. Returns `Ok(false)`
    /// when the server rejected the request or the response failed
    /// validation; either outcome is also announced by an event.
    pub fn fetch(
        &self,
        transport: &dyn Transport,
        options: &ModelSetOptions,
    ) -> Result<bool, ModelError> {
        let url = self.url()?;
        let request = SyncRequest {
            method: SyncMethod::Read,
            url,
            body: None,
        };
        self.trigger("request", &[Arg::Model(self.clone())]);
        match transport.send(&request) {
            Ok(response) => {
                let attrs = object_attrs(&response);
                if !self.set(attrs, options) {
                    return Ok(false);
                }
                self.trigger("sync", &[Arg::Model(self.clone()), Arg::Value(response)]);
                Ok(true)
            }
            Err(error) => {
                self.trigger("error", &[Arg::Model(self.clone()), Arg::Value(error)]);
                Ok(false)
            }
        }
    }

    /// Persists the model: `POST` while new, then `PUT` (or `PATCH` with
    /// `options.patch`). With `attrs`, those are set first; under `wait` they
    /// are only validated now and merged into the request body. Server
    /// response attributes are merged back into the model on success.
    pub fn save(
        &self,
        attrs: Option<Attributes>,
        transport: &dyn Transport,
        options: &SaveOptions,
    ) -> Result<bool, ModelError> {
        let set_options = ModelSetOptions {
            validate: options.validate,
            silent: options.silent,
            unset: false,
        };
        match (&attrs, options.wait) {
            (Some(attrs), false) => {
                if !self.set(attrs.clone(), &set_options) {
                    return Ok(false);
                }
            }
            _ => {
                // Deferred or attribute-less saves still validate the state
                // that would be sent.
                let probe = attrs.clone().unwrap_or_default();
                if !self.validate_attrs(&probe, &set_options) {
                    return Ok(false);
                }
            }
        }

        let method = if self.is_new() {
            SyncMethod::Create
        } else if options.patch {
            SyncMethod::Patch
        } else {
            SyncMethod::Update
        };
        let body = if options.patch {
            Value::Object(attrs.clone().unwrap_or_default())
        } else {
            let mut merged = self.attributes();
            if options.wait {
                if let Some(attrs) = &attrs {
                    for (key, value) in attrs {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(merged)
        };
        let url = self.url()?;
        let request = SyncRequest {
            method,
            url,
            body: Some(body),
        };
        self.trigger("request", &[Arg::Model(self.clone())]);
        match transport.send(&request) {
            Ok(response) => {
                // The server response wins over the locally proposed values.
                let mut server_attrs = attrs.filter(|_| options.wait).unwrap_or_default();
                for (key, value) in object_attrs(&response) {
                    server_attrs.insert(key, value);
                }
                if !self.set(server_attrs, &set_options) {
                    return Ok(false);
                }
                self.trigger("sync", &[Arg::Model(self.clone()), Arg::Value(response)]);
                Ok(true)
            }
            Err(error) => {
                self.trigger("error", &[Arg::Model(self.clone()), Arg::Value(error)]);
                Ok(false)
            }
        }
    }

    /// Deletes the model on the server and announces `destroy`, which a
    /// containing collection turns into removal. A never-persisted model
    /// skips the request (and the `sync` event) and returns `Ok(false)`.
    pub fn destroy(
        &self,
        transport: &dyn Transport,
        options: &DestroyOptions,
    ) -> Result<bool, ModelError> {
        if self.is_new() {
            self.publish_destroy();
            return Ok(false);
        }
        let url = self.url()?;
        let request = SyncRequest {
            method: SyncMethod::Delete,
            url,
            body: None,
        };
        self.trigger("request", &[Arg::Model(self.clone())]);
        if !options.wait {
            self.publish_destroy();
        }
        match transport.send(&request) {
            Ok(response) => {
                if options.wait {
                    self.publish_destroy();
                }
                self.trigger("sync", &[Arg::Model(self.clone()), Arg::Value(response)]);
                Ok(true)
            }
            Err(error) => {
                self.trigger("error", &[Arg::Model(self.clone()), Arg::Value(error)]);
                Ok(false)
            }
        }
    }
}

impl Collection {
    /// Reloads the membership from the server: an array response becomes one
    /// attribute bag per element. Reconciles by default; `options.reset`
    /// replaces wholesale.
    pub fn fetch(
        &self,
        transport: &dyn Transport,
        options: &FetchOptions,
    ) -> Result<bool, CollectionError> {
        let url = self.url().ok_or(CollectionError::NoUrl)?;
        let request = SyncRequest {
            method: SyncMethod::Read,
            url,
            body: None,
        };
        self.trigger("request", &[Arg::Collection(self.clone())]);
        match transport.send(&request) {
            Ok(response) => {
                let items: Vec<Item> = match &response {
                    Value::Array(values) => values.iter().cloned().map(Item::attrs).collect(),
                    Value::Object(map) => vec![Item::Attrs(map.clone())],
                    _ => Vec::new(),
                };
                if options.reset {
                    self.reset(items, options.set.silent);
                } else {
                    self.set(items, &options.set);
                }
                self.trigger("sync", &[Arg::Collection(self.clone()), Arg::Value(response)]);
                Ok(true)
            }
            Err(error) => {
                self.trigger("error", &[Arg::Collection(self.clone()), Arg::Value(error)]);
                Ok(false)
            }
        }
    }

    /// Constructs a model from the item, persists it, and adds it to the
    /// collection, immediately or (with `wait`) after server acceptance.
    /// Returns `None` when construction failed validation.
    pub fn create(
        &self,
        item: Item,
        transport: &dyn Transport,
        wait: bool,
    ) -> Result<Option<Model>, CollectionError> {
        let prepare = CollectionSetOptions {
            validate: true,
            ..CollectionSetOptions::default()
        };
        let Some(model) = self.prepare_model(item, &prepare) else {
            return Ok(None);
        };
        if !wait {
            self.add(vec![Item::Model(model.clone())], &AddOptions::default());
        }
        let saved = model.save(
            None,
            transport,
            &SaveOptions {
                wait,
                ..SaveOptions::default()
            },
        )?;
        if wait && saved {
            self.add(vec![Item::Model(model.clone())], &AddOptions::default());
        }
        Ok(Some(model))
    }
}

fn object_attrs(response: &Value) -> Attributes {
    match response {
        Value::Object(map) => map.clone(),
        _ => Attributes::new(),
    }
}
