//! Working-copy cache.
//!
//! One instance per concrete record type, owned by the dispatcher. Each
//! dispatch copies the submitted record into it with `clone_from` and hands
//! handlers the copy, so every handler in a pass sees the same frozen values
//! no matter what the producer does with its own record afterwards.

use crate::event::EventRecord;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Snapshot a dispatch pass fans out.
pub(crate) struct Snapshot<T> {
    pub(crate) copy: Rc<RefCell<T>>,
    /// `true` when the cached copy was busy and a transient one was made.
    pub(crate) transient: bool,
}

#[derive(Default)]
pub(crate) struct WorkingCopyCache {
    copies: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
}

impl WorkingCopyCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Copies `source` into the working copy for `T`.
    ///
    /// If a pass for `T` is still reading the working copy (an immediate send
    /// of the same type from inside one of its handlers), the nested pass gets
    /// a transient copy and the outer pass keeps its values.
    pub(crate) fn snapshot<T: EventRecord>(&self, source: &T) -> Snapshot<T> {
        let copy = self.working_copy::<T>();
        let cached = match copy.try_borrow_mut() {
            Ok(mut working) => {
                working.clone_from(source);
                true
            }
            Err(_) => false,
        };

        if cached {
            Snapshot {
                copy,
                transient: false,
            }
        } else {
            Snapshot {
                copy: Rc::new(RefCell::new(source.clone())),
                transient: true,
            }
        }
    }

    /// Number of record types that have a working copy.
    pub(crate) fn len(&self) -> usize {
        self.copies.borrow().len()
    }

    fn working_copy<T: EventRecord>(&self) -> Rc<RefCell<T>> {
        let mut copies = self.copies.borrow_mut();
        let entry = copies
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Rc::new(RefCell::new(T::default())) as Rc<dyn Any>)
            .clone();
        match entry.downcast::<RefCell<T>>() {
            Ok(copy) => copy,
            // Entries are keyed by the TypeId of their payload type.
            Err(_) => unreachable!("working copy type mismatch"),
        }
    }
}
