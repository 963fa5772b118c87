//! # Event pooling
//!
//! Records are recycled per concrete type. [`EventPool::acquire`] pops the most
//! recently released instance (or builds a new one) and stamps its origin;
//! [`EventPool::release`] pushes it back. The pool never clears payload
//! fields: producers are expected to `reset` a record after acquiring it.
//!
//! Records are handed out as [`EventRef`] handles. A handle is a shared,
//! interior-mutable reference, and its identity (not its contents) is what the
//! dispatcher uses to detect a record submitted twice before it was processed.

use crate::event::{origin_from_location, EventRecord};
use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::rc::Rc;
use tracing::warn;

/// Identity of a pooled record, stable for the record's whole pooled life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(usize);

/// Shared handle to an event record.
///
/// Cloning the handle aliases the same record; it does not copy the payload.
pub struct EventRef<T> {
    inner: Rc<RefCell<T>>,
}

impl<T> EventRef<T> {
    /// Wraps a record that did not come from a pool.
    pub fn new(record: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(record)),
        }
    }

    /// Immutably borrows the record.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.borrow()
    }

    /// Mutably borrows the record.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }

    pub(crate) fn try_borrow(&self) -> Option<Ref<'_, T>> {
        self.inner.try_borrow().ok()
    }

    /// Identity of the underlying record.
    pub fn id(&self) -> RecordId {
        RecordId(Rc::as_ptr(&self.inner) as *const () as usize)
    }

    /// Returns `true` if both handles point at the same record.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    /// Number of live handles to this record.
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }
}

impl<T> Clone for EventRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for EventRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRef")
            .field("id", &self.id())
            .field("record", &self.inner)
            .finish()
    }
}

/// Per-type counters for one record type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Records constructed because the free list was empty.
    pub allocated: usize,
    /// Records currently waiting in the free list.
    pub available: usize,
}

/// Free-list recycler for event records, one stack per concrete type.
pub struct EventPool {
    free: RefCell<HashMap<TypeId, Box<dyn Any>>>,
    allocated: RefCell<HashMap<TypeId, usize>>,
    capture_origin: bool,
}

impl EventPool {
    /// Creates an empty pool. With `capture_origin` off every acquired record
    /// gets an empty origin.
    pub fn new(capture_origin: bool) -> Self {
        Self {
            free: RefCell::new(HashMap::new()),
            allocated: RefCell::new(HashMap::new()),
            capture_origin,
        }
    }

    /// Takes a record of type `T`, reusing a released one when available.
    ///
    /// The origin is the caller's source file stem when origin capture is on.
    #[track_caller]
    pub fn acquire<T: EventRecord>(&self) -> EventRef<T> {
        let origin = if self.capture_origin {
            origin_from_location(Location::caller())
        } else {
            String::new()
        };
        self.acquire_with_origin(&origin)
    }

    /// Takes a record of type `T` and stamps the given origin on it.
    pub fn acquire_with_origin<T: EventRecord>(&self, origin: &str) -> EventRef<T> {
        let reused = self.free_list::<T, _>(|list| list.pop());
        let record = match reused {
            Some(record) => record,
            None => {
                *self
                    .allocated
                    .borrow_mut()
                    .entry(TypeId::of::<T>())
                    .or_insert(0) += 1;
                EventRef::new(T::default())
            }
        };
        record.borrow_mut().set_origin(origin);
        record
    }

    /// Returns a record to its free list.
    ///
    /// The caller guarantees nobody reads or writes the record afterwards.
    /// Releasing the same record twice hands it out twice; this is not
    /// guarded, but a release while other handles are still alive is logged.
    pub fn release<T: EventRecord>(&self, record: EventRef<T>) {
        if record.handle_count() > 1 {
            warn!(
                "Releasing {} while {} other handle(s) still reference it",
                std::any::type_name::<T>(),
                record.handle_count() - 1
            );
        }
        self.free_list::<T, _>(|list| list.push(record));
    }

    /// Counters for record type `T`.
    pub fn stats<T: EventRecord>(&self) -> PoolStats {
        PoolStats {
            allocated: self
                .allocated
                .borrow()
                .get(&TypeId::of::<T>())
                .copied()
                .unwrap_or(0),
            available: self.free_list::<T, _>(|list| list.len()),
        }
    }

    fn free_list<T: EventRecord, R>(&self, f: impl FnOnce(&mut Vec<EventRef<T>>) -> R) -> R {
        let mut free = self.free.borrow_mut();
        let entry = free
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Vec::<EventRef<T>>::new()));
        match entry.downcast_mut::<Vec<EventRef<T>>>() {
            Some(list) => f(list),
            // Keys are the TypeId of the stored Vec's element type.
            None => unreachable!("free list type mismatch"),
        }
    }
}

impl Default for EventPool {
    fn default() -> Self {
        Self::new(cfg!(debug_assertions))
    }
}

impl fmt::Debug for EventPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPool")
            .field("types", &self.free.borrow().len())
            .field("capture_origin", &self.capture_origin)
            .finish()
    }
}
