//! # Listener registry
//!
//! Handlers are bound either under the category's catch-all bucket or under
//! the bucket of one concrete record type. At fan-out the catch-all bucket
//! runs first, then the concrete bucket, each in registration order.
//!
//! Listeners describe their handlers through [`EventListener`], an explicit
//! registration table standing in for attribute scanning:
//!
//! ```rust
//! use event_bus::{define_category, define_event, Event, EventError, EventListener, HandlerTable};
//!
//! define_category!(pub Game);
//! define_event! {
//!     pub struct ScoreChanged in Game { pub value: i32 }
//! }
//!
//! struct Scoreboard;
//!
//! impl Scoreboard {
//!     fn on_score(&self, event: &ScoreChanged) -> Result<(), EventError> {
//!         println!("score is now {}", event.value);
//!         Ok(())
//!     }
//!
//!     fn on_any(&self, event: &dyn Event) -> Result<(), EventError> {
//!         println!("saw {}", event.event_name());
//!         Ok(())
//!     }
//! }
//!
//! impl EventListener<Game> for Scoreboard {
//!     fn handlers(table: &mut HandlerTable<Game, Self>) {
//!         table.on(Self::on_score).on_any(Self::on_any);
//!     }
//! }
//! ```
//!
//! Owners are held weakly. A binding whose liveness check fails is skipped.
//! Buckets are never compacted while a fan-out pass is walking them; dead
//! bindings are removed once the outermost pass over their bucket ends.

use crate::completion::{CompletionHandle, HandlerFuture, TaskSpawner};
use crate::error::{EventError, Result};
use crate::event::{Event, EventCategory, EventRecord};
use std::any::{type_name, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

/// Answers whether a listener's owner still exists.
pub trait Liveness {
    fn is_alive(&self) -> bool;
}

impl<T: ?Sized> Liveness for Weak<T> {
    fn is_alive(&self) -> bool {
        self.strong_count() > 0
    }
}

/// Liveness for bindings that live as long as their dispatcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAlive;

impl Liveness for AlwaysAlive {
    fn is_alive(&self) -> bool {
        true
    }
}

/// Liveness flag flipped explicitly by the host, e.g. when it destroys the
/// object that registered the handlers.
#[derive(Debug, Clone)]
pub struct LifeToken {
    alive: Rc<Cell<bool>>,
}

impl LifeToken {
    pub fn new() -> Self {
        Self {
            alive: Rc::new(Cell::new(true)),
        }
    }

    /// Marks the owner dead for every clone of this token.
    pub fn kill(&self) {
        self.alive.set(false);
    }
}

impl Default for LifeToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness for LifeToken {
    fn is_alive(&self) -> bool {
        self.alive.get()
    }
}

/// Liveness given by a closure.
pub struct LivenessFn<F>(pub F);

impl<F: Fn() -> bool> Liveness for LivenessFn<F> {
    fn is_alive(&self) -> bool {
        (self.0)()
    }
}

struct AllAlive(Vec<Rc<dyn Liveness>>);

impl Liveness for AllAlive {
    fn is_alive(&self) -> bool {
        self.0.iter().all(|l| l.is_alive())
    }
}

/// Bucket a binding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingTarget {
    /// Receives every record of the category.
    CatchAll,
    /// Receives records of one concrete type.
    Concrete(TypeId),
}

/// Unique id of a binding inside one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(u64);

pub(crate) type HandlerCall = Rc<dyn Fn(&dyn Event) -> Result<()>>;

/// One handler bound to one bucket.
pub struct ListenerBinding {
    id: BindingId,
    label: String,
    wants_completion: bool,
    liveness: Rc<dyn Liveness>,
    call: HandlerCall,
}

impl ListenerBinding {
    pub fn id(&self) -> BindingId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn wants_completion(&self) -> bool {
        self.wants_completion
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }
}

impl fmt::Debug for ListenerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBinding")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("wants_completion", &self.wants_completion)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Discovered handler, before it is bound to an owner.
pub struct HandlerDescriptor<L> {
    label: &'static str,
    target: BindingTarget,
    wants_completion: bool,
    make: Box<dyn Fn(Weak<L>, TaskSpawner) -> HandlerCall>,
}

impl<L> HandlerDescriptor<L> {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn target(&self) -> BindingTarget {
        self.target
    }

    pub fn wants_completion(&self) -> bool {
        self.wants_completion
    }
}

impl<L> fmt::Debug for HandlerDescriptor<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("label", &self.label)
            .field("target", &self.target)
            .field("wants_completion", &self.wants_completion)
            .finish()
    }
}

/// Registration table a listener fills in for one category.
pub struct HandlerTable<C, L> {
    entries: Vec<HandlerDescriptor<L>>,
    _category: PhantomData<C>,
}

fn downcast<T: EventRecord>(event: &dyn Event) -> Result<&T> {
    event.downcast_ref::<T>().ok_or_else(|| {
        EventError::HandlerNotFound(format!(
            "{} delivered to a handler for {}",
            event.event_name(),
            type_name::<T>()
        ))
    })
}

impl<C: EventCategory, L: 'static> HandlerTable<C, L> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            _category: PhantomData,
        }
    }

    /// Handler for one concrete record type.
    pub fn on<T, F>(&mut self, handler: F) -> &mut Self
    where
        T: EventRecord<Category = C>,
        F: Fn(&L, &T) -> Result<()> + 'static,
    {
        let handler = Rc::new(handler);
        self.push::<F>(BindingTarget::Concrete(TypeId::of::<T>()), false, move |owner, _| {
            let handler = handler.clone();
            Rc::new(move |event: &dyn Event| {
                let Some(owner) = owner.upgrade() else {
                    return Ok(());
                };
                handler(&owner, downcast::<T>(event)?)
            })
        })
    }

    /// Handler receiving every record of the category.
    pub fn on_any<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&L, &dyn Event) -> Result<()> + 'static,
    {
        let handler = Rc::new(handler);
        self.push::<F>(BindingTarget::CatchAll, false, move |owner, _| {
            let handler = handler.clone();
            Rc::new(move |event: &dyn Event| {
                let Some(owner) = owner.upgrade() else {
                    return Ok(());
                };
                handler(&owner, event)
            })
        })
    }

    /// Async handler for one concrete record type. The returned future is
    /// launched and not awaited.
    pub fn on_async<T, F, Fut>(&mut self, handler: F) -> &mut Self
    where
        T: EventRecord<Category = C>,
        F: Fn(&L, &T) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        let handler = Rc::new(handler);
        let label = type_name::<F>();
        self.push::<F>(BindingTarget::Concrete(TypeId::of::<T>()), false, move |owner, spawner| {
            let handler = handler.clone();
            Rc::new(move |event: &dyn Event| {
                let Some(owner) = owner.upgrade() else {
                    return Ok(());
                };
                let future = handler(&owner, downcast::<T>(event)?);
                spawner.launch(label, None, future)
            })
        })
    }

    /// Async handler for one concrete record type that also receives the
    /// completion handle of the task it becomes.
    pub fn on_async_with_handle<T, F>(&mut self, handler: F) -> &mut Self
    where
        T: EventRecord<Category = C>,
        F: Fn(&L, &T, CompletionHandle) -> HandlerFuture + 'static,
    {
        let handler = Rc::new(handler);
        let label = type_name::<F>();
        self.push::<F>(BindingTarget::Concrete(TypeId::of::<T>()), true, move |owner, spawner| {
            let handler = handler.clone();
            Rc::new(move |event: &dyn Event| {
                let Some(owner) = owner.upgrade() else {
                    return Ok(());
                };
                let handle = CompletionHandle::new(label);
                let future = handler(&owner, downcast::<T>(event)?, handle.clone());
                spawner.launch(label, Some(handle), future)
            })
        })
    }

    /// Async catch-all handler.
    pub fn on_any_async<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&L, &dyn Event) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        let handler = Rc::new(handler);
        let label = type_name::<F>();
        self.push::<F>(BindingTarget::CatchAll, false, move |owner, spawner| {
            let handler = handler.clone();
            Rc::new(move |event: &dyn Event| {
                let Some(owner) = owner.upgrade() else {
                    return Ok(());
                };
                spawner.launch(label, None, handler(&owner, event))
            })
        })
    }

    /// Async catch-all handler that receives its completion handle.
    pub fn on_any_async_with_handle<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&L, &dyn Event, CompletionHandle) -> HandlerFuture + 'static,
    {
        let handler = Rc::new(handler);
        let label = type_name::<F>();
        self.push::<F>(BindingTarget::CatchAll, true, move |owner, spawner| {
            let handler = handler.clone();
            Rc::new(move |event: &dyn Event| {
                let Some(owner) = owner.upgrade() else {
                    return Ok(());
                };
                let handle = CompletionHandle::new(label);
                let future = handler(&owner, event, handle.clone());
                spawner.launch(label, Some(handle), future)
            })
        })
    }

    /// The discovered handlers, in declaration order.
    pub fn descriptors(&self) -> &[HandlerDescriptor<L>] {
        &self.entries
    }

    fn push<F>(
        &mut self,
        target: BindingTarget,
        wants_completion: bool,
        make: impl Fn(Weak<L>, TaskSpawner) -> HandlerCall + 'static,
    ) -> &mut Self {
        self.entries.push(HandlerDescriptor {
            label: type_name::<F>(),
            target,
            wants_completion,
            make: Box::new(make),
        });
        self
    }
}

impl<C: EventCategory, L: 'static> Default for HandlerTable<C, L> {
    fn default() -> Self {
        Self::new()
    }
}

/// An object exposing event handlers for category `C`.
pub trait EventListener<C: EventCategory>: Sized + 'static {
    /// Declares this listener's handlers, in invocation order per bucket.
    fn handlers(table: &mut HandlerTable<C, Self>);
}

/// Mapping from bucket to ordered bindings, owned by one dispatcher.
pub struct ListenerRegistry {
    buckets: RefCell<HashMap<BindingTarget, Vec<Rc<ListenerBinding>>>>,
    /// Fan-out passes currently walking each bucket.
    passes: RefCell<HashMap<BindingTarget, usize>>,
    spawner: TaskSpawner,
    next_id: Cell<u64>,
    pruned: Cell<u64>,
}

/// Marks a bucket as being walked. The last pass to leave compacts it.
struct PassGuard<'a> {
    registry: &'a ListenerRegistry,
    target: BindingTarget,
}

impl<'a> PassGuard<'a> {
    fn enter(registry: &'a ListenerRegistry, target: BindingTarget) -> Self {
        *registry.passes.borrow_mut().entry(target).or_insert(0) += 1;
        Self { registry, target }
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        let outermost = {
            let mut passes = self.registry.passes.borrow_mut();
            match passes.get_mut(&self.target) {
                Some(depth) if *depth > 1 => {
                    *depth -= 1;
                    false
                }
                _ => {
                    passes.remove(&self.target);
                    true
                }
            }
        };
        if outermost {
            self.registry.compact(self.target);
        }
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            buckets: RefCell::new(HashMap::new()),
            passes: RefCell::new(HashMap::new()),
            spawner: TaskSpawner::new(),
            next_id: Cell::new(0),
            pruned: Cell::new(0),
        }
    }

    /// Binds every handler `L` declares for category `C` to `owner`.
    ///
    /// The owner is held weakly; `extra` adds a host-side liveness condition.
    /// Returns the number of bindings created.
    pub fn register<C, L>(&self, owner: &Rc<L>, extra: Option<Rc<dyn Liveness>>) -> usize
    where
        C: EventCategory,
        L: EventListener<C>,
    {
        let mut table = HandlerTable::<C, L>::new();
        L::handlers(&mut table);

        let weak = Rc::downgrade(owner);
        let liveness: Rc<dyn Liveness> = match extra {
            Some(extra) => Rc::new(AllAlive(vec![Rc::new(weak.clone()) as Rc<dyn Liveness>, extra])),
            None => Rc::new(weak.clone()),
        };

        let mut count = 0;
        for descriptor in table.entries {
            let call = (descriptor.make)(weak.clone(), self.spawner.clone());
            self.insert(
                descriptor.target,
                descriptor.label.to_string(),
                descriptor.wants_completion,
                liveness.clone(),
                call,
            );
            count += 1;
        }
        count
    }

    /// Binds a closure directly, without a listener type.
    pub fn bind(
        &self,
        target: BindingTarget,
        label: impl Into<String>,
        liveness: Rc<dyn Liveness>,
        call: impl Fn(&dyn Event) -> Result<()> + 'static,
    ) -> BindingId {
        self.insert(target, label.into(), false, liveness, Rc::new(call))
    }

    fn insert(
        &self,
        target: BindingTarget,
        label: String,
        wants_completion: bool,
        liveness: Rc<dyn Liveness>,
        call: HandlerCall,
    ) -> BindingId {
        let id = BindingId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.buckets
            .borrow_mut()
            .entry(target)
            .or_default()
            .push(Rc::new(ListenerBinding {
                id,
                label,
                wants_completion,
                liveness,
                call,
            }));
        id
    }

    /// Spawner async handlers bound here launch through.
    pub fn spawner(&self) -> &TaskSpawner {
        &self.spawner
    }

    /// Invokes the catch-all bucket, then the bucket for `concrete`, skipping
    /// dead bindings. Returns the number of handlers invoked.
    ///
    /// The first handler error stops the pass and is returned.
    pub fn fan_out(&self, concrete: TypeId, event: &dyn Event) -> Result<usize> {
        let mut invoked = 0;
        for target in [BindingTarget::CatchAll, BindingTarget::Concrete(concrete)] {
            let _pass = PassGuard::enter(self, target);
            let mut index = 0;
            // Bindings are fetched one at a time so handlers may register
            // listeners or dispatch again while the pass is running.
            while let Some(binding) = self.binding_at(target, index) {
                index += 1;
                if binding.is_alive() {
                    (binding.call)(event)?;
                    invoked += 1;
                }
            }
        }
        Ok(invoked)
    }

    fn binding_at(&self, target: BindingTarget, index: usize) -> Option<Rc<ListenerBinding>> {
        self.buckets
            .borrow()
            .get(&target)
            .and_then(|bucket| bucket.get(index).cloned())
    }

    fn is_walked(&self, target: BindingTarget) -> bool {
        self.passes.borrow().contains_key(&target)
    }

    fn compact(&self, target: BindingTarget) -> usize {
        let mut buckets = self.buckets.borrow_mut();
        let Some(bucket) = buckets.get_mut(&target) else {
            return 0;
        };
        let before = bucket.len();
        bucket.retain(|b| b.is_alive());
        let removed = before - bucket.len();
        self.pruned.set(self.pruned.get() + removed as u64);
        removed
    }

    /// Bindings currently held in one bucket, dead or alive.
    pub fn count(&self, target: BindingTarget) -> usize {
        self.buckets.borrow().get(&target).map_or(0, Vec::len)
    }

    /// Bindings currently held across all buckets.
    pub fn total(&self) -> usize {
        self.buckets.borrow().values().map(Vec::len).sum()
    }

    /// Whether a record of type `concrete` would reach any live binding.
    pub fn has_bindings_for(&self, concrete: TypeId) -> bool {
        let buckets = self.buckets.borrow();
        [BindingTarget::CatchAll, BindingTarget::Concrete(concrete)]
            .iter()
            .filter_map(|target| buckets.get(target))
            .any(|bucket| bucket.iter().any(|b| b.is_alive()))
    }

    /// Bindings removed because their owner died.
    pub fn pruned(&self) -> u64 {
        self.pruned.get()
    }

    /// Labels of the bindings in one bucket, in invocation order.
    pub fn labels(&self, target: BindingTarget) -> Vec<String> {
        self.buckets
            .borrow()
            .get(&target)
            .map(|bucket| bucket.iter().map(|b| b.label.clone()).collect())
            .unwrap_or_default()
    }

    /// Removes every dead binding without dispatching anything.
    ///
    /// Buckets a fan-out pass is walking are left alone; they are compacted
    /// when that pass ends.
    pub fn sweep(&self) -> usize {
        let targets: Vec<BindingTarget> = self.buckets.borrow().keys().copied().collect();
        targets
            .into_iter()
            .filter(|target| !self.is_walked(*target))
            .map(|target| self.compact(target))
            .sum()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("bindings", &self.total())
            .field("pruned", &self.pruned.get())
            .finish()
    }
}
