//! Publish/subscribe core for the keel data layer.
//!
//! Any entity can embed an [`Emitter`] by composition to gain the full
//! `on` / `off` / `once` / `trigger` contract plus the listening bridge
//! (`listen_to` / `stop_listening`). The emitter is generic over the event
//! argument type; the data layer supplies its own payload enum.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use keel_events::Emitter;
//!
//! let emitter: Emitter<i64> = Emitter::new();
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&seen);
//! emitter.on("tick", move |name, args| {
//!     sink.borrow_mut().push((name.to_owned(), args.to_vec()));
//! });
//! emitter.trigger("tick", &[7]);
//! emitter.off_all();
//! emitter.trigger("tick", &[8]);
//! assert_eq!(seen.borrow().as_slice(), &[("tick".to_owned(), vec![7])]);
//! ```

pub mod ids;
pub mod listening;
pub mod registry;

pub use ids::{EntityId, HandlerId, IdGen};
pub use listening::{EventTarget, ListenError, Listening};
pub use registry::{callback, Callback, Emitter, NameSpec, WeakEmitter};
