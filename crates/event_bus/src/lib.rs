//! # Event Bus
//!
//! A typed, single-threaded publish/subscribe event bus for decoupling
//! producers and consumers inside one runtime.
//!
//! ## Core Features
//!
//! - **Typed categories**: every record belongs to one [`EventCategory`] and can
//!   only reach that category's dispatcher
//! - **Pooled records**: [`EventPool`] recycles record instances instead of
//!   allocating one per send
//! - **Queued and immediate dispatch**: breadth-first queued delivery, or
//!   synchronous delivery that may nest inside a running handler
//! - **Frozen snapshots**: handlers see a working copy taken at dispatch time,
//!   never the producer's record
//! - **Weak listeners**: dead owners are pruned lazily, the registry never
//!   keeps them alive
//! - **Async handlers**: futures launched on the tokio `LocalSet` attached to
//!   the dispatcher, each with its own [`CompletionHandle`] when asked for
//! - **Scopes**: one dispatcher per category ([`GlobalDispatchers`]) or one per
//!   subtree of an ownership tree ([`Hierarchy`])
//!
//! ## Quick Start Example
//!
//! ```rust
//! use event_bus::*;
//! use std::rc::Rc;
//!
//! define_category!(pub Game);
//!
//! define_event! {
//!     pub struct ScoreChanged in Game {
//!         pub value: i32,
//!     }
//!     debug: "Score changed."
//! }
//!
//! struct Scoreboard;
//!
//! impl Scoreboard {
//!     fn on_score(&self, event: &ScoreChanged) -> Result<(), EventError> {
//!         println!("score is now {}", event.value);
//!         Ok(())
//!     }
//! }
//!
//! impl EventListener<Game> for Scoreboard {
//!     fn handlers(table: &mut HandlerTable<Game, Self>) {
//!         table.on(Self::on_score);
//!     }
//! }
//!
//! # fn main() -> Result<(), EventError> {
//! let globals = GlobalDispatchers::new();
//! globals.install::<Game>(DispatchConfig::default());
//!
//! let scoreboard = Rc::new(Scoreboard);
//! globals.register_listener::<Game, _>(&scoreboard)?;
//!
//! let record = globals.acquire::<ScoreChanged>()?;
//! record.borrow_mut().reset(5);
//! globals.send(&record)?;
//! globals.release(record)?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
mod macros;

pub mod completion;
pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod pool;
pub mod registry;
pub mod scope;

pub use completion::{CompletionHandle, HandlerFuture, TaskOutcome, TaskSpawner};
pub use config::DispatchConfig;
pub use diagnostics::{DiagnosticSink, LogLevel, MemorySink, NullSink, TracingSink};
pub use dispatcher::{DispatchState, DispatchStats, EventDispatcher};
pub use error::EventError;
pub use event::{origin_from_location, AsAny, Event, EventCategory, EventRecord};
pub use pool::{EventPool, EventRef, PoolStats, RecordId};
pub use registry::{
    AlwaysAlive, BindingId, BindingTarget, EventListener, HandlerDescriptor, HandlerTable, LifeToken,
    ListenerBinding, ListenerRegistry, Liveness, LivenessFn,
};
pub use scope::{GlobalDispatchers, Hierarchy, NodeId, ScopedListener};
