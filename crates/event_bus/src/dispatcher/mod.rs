//! # Dispatch engine
//!
//! [`EventDispatcher`] owns one category's listener registry, its working-copy
//! cache and its submission queue. It is a two-state machine:
//!
//! - `Idle`: a [`submit`](EventDispatcher::submit) enqueues the record and
//!   drains the queue on the caller's stack until it is empty.
//! - `Draining`: submissions made by handlers are appended to the same queue
//!   and delivered by the running drain, after everything queued before them.
//!
//! [`submit_immediate`](EventDispatcher::submit_immediate) skips the queue and
//! fans out before returning, whatever the state. Called from a handler, the
//! nested event is fully delivered before that handler continues.
//!
//! Everything runs on one thread. Handlers see the working copy of a record,
//! never the submitted instance, and must not keep references to it past
//! their own invocation.

mod cache;
mod stats;

pub use stats::DispatchStats;

use crate::config::DispatchConfig;
use crate::diagnostics::{DiagnosticSink, LogLevel, TracingSink};
use crate::error::{EventError, Result};
use crate::event::{Event, EventCategory, EventRecord};
use crate::pool::{EventPool, EventRef, RecordId};
use crate::registry::{BindingId, BindingTarget, EventListener, ListenerRegistry, Liveness};
use cache::WorkingCopyCache;
use std::any::{type_name, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use tokio::task::LocalSet;
use tracing::{debug, info};

/// Whether a dispatcher is currently draining its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Draining,
}

type Deliver<C> = Box<dyn FnOnce(&EventDispatcher<C>) -> Result<()>>;

struct PendingEvent<C: EventCategory> {
    id: RecordId,
    deliver: Deliver<C>,
}

/// Puts the dispatcher back to `Idle` on every exit path of a drain,
/// including handler errors and panics.
struct DrainGuard<'a> {
    state: &'a Cell<DispatchState>,
}

impl<'a> DrainGuard<'a> {
    fn enter(state: &'a Cell<DispatchState>) -> Self {
        state.set(DispatchState::Draining);
        Self { state }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.state.set(DispatchState::Idle);
    }
}

/// Dispatch engine for one event category.
pub struct EventDispatcher<C: EventCategory> {
    config: DispatchConfig,
    registry: ListenerRegistry,
    cache: WorkingCopyCache,
    queue: RefCell<VecDeque<PendingEvent<C>>>,
    state: Cell<DispatchState>,
    stats: RefCell<DispatchStats>,
    sink: Rc<dyn DiagnosticSink>,
    pool: EventPool,
    _category: PhantomData<C>,
}

impl<C: EventCategory> EventDispatcher<C> {
    /// Creates an idle dispatcher that reports diagnostics through `tracing`.
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_sink(config, Rc::new(TracingSink))
    }

    /// Creates an idle dispatcher reporting to a custom diagnostic sink.
    pub fn with_sink(config: DispatchConfig, sink: Rc<dyn DiagnosticSink>) -> Self {
        Self {
            registry: ListenerRegistry::new(),
            cache: WorkingCopyCache::new(),
            queue: RefCell::new(VecDeque::with_capacity(config.initial_queue_capacity)),
            state: Cell::new(DispatchState::Idle),
            stats: RefCell::new(DispatchStats::default()),
            sink,
            pool: EventPool::new(config.capture_origin),
            config,
            _category: PhantomData,
        }
    }

    /// Name of the category this dispatcher serves.
    pub fn category(&self) -> &'static str {
        C::NAME
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Runs this dispatcher's async handlers on `local`. Without an attached
    /// `LocalSet` an async handler fails its dispatch with
    /// [`EventError::NoAsyncRuntime`].
    pub fn attach_local_set(&self, local: Rc<LocalSet>) {
        self.registry.spawner().attach(local);
    }

    pub fn has_local_set(&self) -> bool {
        self.registry.spawner().is_attached()
    }

    // ------------------------------------------------------------------
    // Pooling
    // ------------------------------------------------------------------

    /// The record pool shared by this category's producers.
    pub fn pool(&self) -> &EventPool {
        &self.pool
    }

    /// Takes a record from the category pool, stamped with the caller's origin.
    #[track_caller]
    pub fn acquire<T: EventRecord<Category = C>>(&self) -> EventRef<T> {
        self.pool.acquire::<T>()
    }

    /// Returns a fully dispatched record to the category pool.
    pub fn release<T: EventRecord<Category = C>>(&self, record: EventRef<T>) {
        self.pool.release(record);
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Binds every handler `L` declares. The listener stays registered until
    /// it is dropped. Returns the number of handlers bound.
    pub fn register<L: EventListener<C>>(&self, listener: &Rc<L>) -> usize {
        self.register_inner(listener, None)
    }

    /// Like [`register`](Self::register), with an additional host-side
    /// liveness condition (e.g. "the owning scene node still exists").
    pub fn register_with_liveness<L, V>(&self, listener: &Rc<L>, liveness: V) -> usize
    where
        L: EventListener<C>,
        V: Liveness + 'static,
    {
        self.register_inner(listener, Some(Rc::new(liveness)))
    }

    fn register_inner<L: EventListener<C>>(
        &self,
        listener: &Rc<L>,
        liveness: Option<Rc<dyn Liveness>>,
    ) -> usize {
        let count = self.registry.register::<C, L>(listener, liveness);
        info!(
            "📝 Registered [{}] handlers of {} on {}",
            count,
            type_name::<L>(),
            C::NAME
        );
        count
    }

    /// Binds a closure for one concrete record type.
    pub fn subscribe<T, F, V>(&self, liveness: V, handler: F) -> BindingId
    where
        T: EventRecord<Category = C>,
        F: Fn(&T) -> Result<()> + 'static,
        V: Liveness + 'static,
    {
        self.registry.bind(
            BindingTarget::Concrete(TypeId::of::<T>()),
            type_name::<F>(),
            Rc::new(liveness),
            move |event: &dyn Event| match event.downcast_ref::<T>() {
                Some(event) => handler(event),
                None => Err(EventError::HandlerNotFound(format!(
                    "{} delivered to a handler for {}",
                    event.event_name(),
                    type_name::<T>()
                ))),
            },
        )
    }

    /// Binds a closure receiving every record of the category.
    pub fn subscribe_any<F, V>(&self, liveness: V, handler: F) -> BindingId
    where
        F: Fn(&dyn Event) -> Result<()> + 'static,
        V: Liveness + 'static,
    {
        self.registry.bind(
            BindingTarget::CatchAll,
            type_name::<F>(),
            Rc::new(liveness),
            handler,
        )
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Queues a record for delivery.
    ///
    /// When the dispatcher is idle the queue is drained before this returns;
    /// when it is already draining (the caller is a handler) the record is
    /// delivered by the running drain once everything ahead of it is done.
    ///
    /// A record that is still queued is not queued again: the duplicate is
    /// reported through the diagnostic sink and dropped.
    ///
    /// The first handler error aborts the drain and is returned. The
    /// dispatcher is idle again afterwards and records still queued are
    /// delivered by the next drain.
    pub fn submit<T: EventRecord<Category = C>>(&self, record: &EventRef<T>) -> Result<()> {
        if self.reject_if_queued(record) {
            return Ok(());
        }

        let queued = record.clone();
        self.queue.borrow_mut().push_back(PendingEvent {
            id: record.id(),
            deliver: Box::new(move |dispatcher: &EventDispatcher<C>| {
                dispatcher.dispatch_record(&queued)
            }),
        });
        self.stats.borrow_mut().events_queued += 1;

        match self.state.get() {
            DispatchState::Draining => Ok(()),
            DispatchState::Idle => self.drain(),
        }
    }

    /// Delivers a record right away, bypassing the queue.
    ///
    /// Works in any state, so a handler can use it to get synchronous
    /// cause and effect. A record that is still queued is rejected the same
    /// way [`submit`](Self::submit) rejects it.
    pub fn submit_immediate<T: EventRecord<Category = C>>(&self, record: &EventRef<T>) -> Result<()> {
        if self.reject_if_queued(record) {
            return Ok(());
        }
        self.stats.borrow_mut().immediate_dispatches += 1;
        self.dispatch_record(record)
    }

    /// Drains records left queued by an aborted drain. No-op while draining.
    pub fn flush(&self) -> Result<()> {
        if self.state.get() == DispatchState::Draining || self.pending() == 0 {
            return Ok(());
        }
        self.drain()
    }

    fn drain(&self) -> Result<()> {
        let _guard = DrainGuard::enter(&self.state);
        while let Some(pending) = self.next_pending() {
            (pending.deliver)(self)?;
        }
        Ok(())
    }

    fn next_pending(&self) -> Option<PendingEvent<C>> {
        self.queue.borrow_mut().pop_front()
    }

    fn reject_if_queued<T: EventRecord>(&self, record: &EventRef<T>) -> bool {
        let id = record.id();
        if !self.queue.borrow().iter().any(|pending| pending.id == id) {
            return false;
        }

        self.stats.borrow_mut().duplicates_rejected += 1;
        let name = record
            .try_borrow()
            .map(|r| r.event_name())
            .unwrap_or_else(type_name::<T>);
        self.sink.emit(
            LogLevel::Warn,
            C::NAME,
            &format!(
                "{} is being reused before it was processed. Merge the events or acquire a new record for each send.",
                name
            ),
        );
        true
    }

    /// Snapshots `record` into the working copy and fans the copy out.
    fn dispatch_record<T: EventRecord<Category = C>>(&self, record: &EventRef<T>) -> Result<()> {
        let snapshot = {
            let source = record.try_borrow().ok_or_else(|| {
                EventError::HandlerExecution(format!(
                    "{} was mutably borrowed when it was dispatched",
                    type_name::<T>()
                ))
            })?;
            self.cache.snapshot(&*source)
        };

        if snapshot.transient {
            self.stats.borrow_mut().transient_snapshots += 1;
            debug!(
                "Nested dispatch of {} while its working copy is in use; using a transient snapshot",
                type_name::<T>()
            );
        }

        let working = snapshot.copy.borrow();
        if self.config.emit_debug_data {
            let line = working.debug_data();
            if !line.is_empty() {
                self.sink.emit(LogLevel::Debug, C::NAME, &line);
            }
        }
        if self.config.warn_unhandled && !self.registry.has_bindings_for(TypeId::of::<T>()) {
            self.sink.emit(
                LogLevel::Warn,
                C::NAME,
                &format!("No handlers for {}", working.event_name()),
            );
        }

        self.stats.borrow_mut().events_dispatched += 1;
        match self.registry.fan_out(TypeId::of::<T>(), &*working) {
            Ok(invoked) => {
                self.stats.borrow_mut().handlers_invoked += invoked as u64;
                Ok(())
            }
            Err(e) => {
                self.stats.borrow_mut().handler_failures += 1;
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn state(&self) -> DispatchState {
        self.state.get()
    }

    pub fn is_idle(&self) -> bool {
        self.state.get() == DispatchState::Idle
    }

    /// Records waiting in the queue.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Bindings held across all buckets, including dead ones not yet pruned.
    pub fn listener_count(&self) -> usize {
        self.registry.total()
    }

    /// Bindings held in the bucket for record type `T`.
    pub fn listener_count_for<T: EventRecord<Category = C>>(&self) -> usize {
        self.registry.count(BindingTarget::Concrete(TypeId::of::<T>()))
    }

    /// Bindings held in the catch-all bucket.
    pub fn catch_all_count(&self) -> usize {
        self.registry.count(BindingTarget::CatchAll)
    }

    /// Record types that have a working copy.
    pub fn working_copy_count(&self) -> usize {
        self.cache.len()
    }

    /// Removes dead bindings without dispatching. Returns how many went.
    pub fn sweep_dead_listeners(&self) -> usize {
        self.registry.sweep()
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    pub fn stats(&self) -> DispatchStats {
        let mut stats = self.stats.borrow().clone();
        stats.listeners_pruned = self.registry.pruned();
        stats.total_listeners = self.registry.total();
        stats
    }
}

impl<C: EventCategory> Default for EventDispatcher<C> {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

impl<C: EventCategory> fmt::Debug for EventDispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("category", &C::NAME)
            .field("state", &self.state.get())
            .field("pending", &self.pending())
            .field("listeners", &self.registry.total())
            .finish()
    }
}
