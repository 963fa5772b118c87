//! # Scope adapters
//!
//! Both adapters answer one question: which [`EventDispatcher`] owns category
//! `C` for this producer or listener?
//!
//! - [`GlobalDispatchers`]: one dispatcher per category for the whole thread.
//! - [`Hierarchy`]: dispatchers attached to nodes of an ownership tree, found
//!   by walking up from the caller's node. Several dispatchers of the same
//!   category can coexist, each serving its own subtree.
//!
//! A category without a dispatcher is a configuration error and is reported
//! as soon as it is resolved.

mod global;
mod hierarchy;

pub use global::GlobalDispatchers;
pub use hierarchy::{Hierarchy, NodeId, ScopedListener};

use crate::dispatcher::EventDispatcher;
use crate::event::EventCategory;
use std::any::Any;
use std::rc::Rc;

/// Type-erased dispatcher slot, keyed by its category's `TypeId`.
type ErasedDispatcher = Rc<dyn Any>;

fn erase<C: EventCategory>(dispatcher: Rc<EventDispatcher<C>>) -> ErasedDispatcher {
    dispatcher
}

fn restore<C: EventCategory>(slot: &ErasedDispatcher) -> Option<Rc<EventDispatcher<C>>> {
    slot.clone().downcast::<EventDispatcher<C>>().ok()
}
