//! # Event records and categories
//!
//! Every event belongs to exactly one [`EventCategory`], a zero-sized marker
//! type that partitions the bus into independent dispatch domains. Concrete
//! payloads implement [`EventRecord`] and name their category through an
//! associated type, so a record can never be routed to a dispatcher of the
//! wrong category.
//!
//! [`Event`] is the object-safe view of a record. Catch-all handlers receive
//! `&dyn Event` and can downcast when they need the concrete payload:
//!
//! ```rust
//! use event_bus::{define_category, define_event, Event};
//!
//! define_category!(pub Game);
//! define_event! {
//!     pub struct ScoreChanged in Game {
//!         pub value: i32,
//!     }
//!     debug: "Score updated."
//! }
//!
//! let mut event = ScoreChanged::default();
//! event.reset(5);
//! let erased: &dyn Event = &event;
//! assert_eq!(erased.downcast_ref::<ScoreChanged>().map(|e| e.value), Some(5));
//! ```

use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::panic::Location;
use std::path::Path;

/// Marker for a family of related events handled by one dispatcher per scope.
pub trait EventCategory: 'static {
    /// Human-readable category name used in logs and errors.
    const NAME: &'static str;
}

/// Gives trait objects access to [`Any`] for downcasting.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Object-safe view of an event record.
pub trait Event: AsAny + Debug {
    /// Provenance tag, usually the source file that acquired the record.
    fn origin(&self) -> &str;

    /// Overwrites the provenance tag.
    fn set_origin(&mut self, origin: &str);

    /// Short type name used in diagnostics.
    fn event_name(&self) -> &'static str;

    /// Text surfaced once per dispatch, before handlers run. Empty means none.
    fn debug_data(&self) -> String {
        String::new()
    }
}

impl dyn Event {
    /// Returns `true` if the erased record is a `T`.
    pub fn is<T: Event>(&self) -> bool {
        self.as_any().type_id() == TypeId::of::<T>()
    }

    /// Downcasts the erased record to its concrete type.
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// A concrete, poolable event payload.
///
/// `Clone::clone_from` is what copies a submitted record into the dispatcher's
/// working copy, so types with heap fields should keep the default
/// implementation or one that reuses buffers.
pub trait EventRecord: Event + Clone + Default {
    /// The category whose dispatcher delivers this record.
    type Category: EventCategory;
}

/// Derives an origin tag from a source location: the file name without its
/// extension, the same shape the pool stamps on acquired records.
pub fn origin_from_location(location: &Location<'_>) -> String {
    Path::new(location.file())
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string()
}
