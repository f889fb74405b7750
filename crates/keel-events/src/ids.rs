//! Monotonic id generation for entities and handler bindings.
//!
//! Every emitter gets a stable [`EntityId`] and every registration call gets a
//! [`HandlerId`]; both are minted from an explicit, injectable [`IdGen`] so
//! tests can run against an isolated counter. Ids are never reused within a
//! generator's lifetime.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

thread_local! {
    static SHARED_COUNTER: Rc<Cell<u64>> = Rc::new(Cell::new(1));
}

/// Handle on a monotonically increasing counter.
///
/// `IdGen::default()` returns a view of a thread-local shared counter, so
/// entities created without an explicit generator still receive ids that are
/// unique across the whole thread. `IdGen::new()` starts a fresh counter.
#[derive(Clone, Debug)]
pub struct IdGen {
    next: Rc<Cell<u64>>,
}

impl IdGen {
    /// Creates an isolated generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: Rc::new(Cell::new(1)),
        }
    }

    /// Mints the next raw id.
    pub fn mint(&self) -> u64 {
        let id = self.next.get();
        self.next.set(id + 1);
        id
    }

    /// Mints a stable entity identity.
    pub fn entity_id(&self) -> EntityId {
        EntityId(self.mint())
    }

    pub(crate) fn handler_id(&self) -> HandlerId {
        HandlerId(self.mint())
    }
}

impl Default for IdGen {
    fn default() -> Self {
        SHARED_COUNTER.with(|counter| Self {
            next: Rc::clone(counter),
        })
    }
}

/// Stable identity of an event-bearing entity. Keys the listening
/// bookkeeping and serves as an `off` context filter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EntityId(pub(crate) u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// Identity of one registration call. One `on` call binding several event
/// names yields a single `HandlerId` covering every binding it made, so a
/// later `off` can remove exactly what that call registered.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct HandlerId(pub(crate) u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}
