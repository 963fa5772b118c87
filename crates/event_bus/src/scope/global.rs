//! Process-wide dispatchers, one per category.
//!
//! `GlobalDispatchers` is an explicit registry object. Hosts that prefer an
//! ambient default use [`GlobalDispatchers::current`], a per-thread instance
//! (the bus is single-threaded, so "process-wide" means the dispatching
//! thread).
//!
//! A category's dispatcher must be installed before anything registers or
//! sends in that category. The first install wins; later installs return the
//! existing dispatcher unchanged.

use super::{erase, restore, ErasedDispatcher};
use crate::config::DispatchConfig;
use crate::diagnostics::DiagnosticSink;
use crate::dispatcher::EventDispatcher;
use crate::error::{EventError, Result};
use crate::event::{EventCategory, EventRecord};
use crate::pool::EventRef;
use crate::registry::EventListener;
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info};

thread_local! {
    static CURRENT: Rc<GlobalDispatchers> = Rc::new(GlobalDispatchers::new());
}

/// Registry of the single dispatcher owning each category.
#[derive(Default)]
pub struct GlobalDispatchers {
    dispatchers: RefCell<HashMap<TypeId, ErasedDispatcher>>,
    installed: RefCell<Vec<&'static str>>,
}

impl GlobalDispatchers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The calling thread's default registry.
    pub fn current() -> Rc<Self> {
        CURRENT.with(Rc::clone)
    }

    /// Creates the dispatcher for `C` unless one already exists.
    pub fn install<C: EventCategory>(&self, config: DispatchConfig) -> Rc<EventDispatcher<C>> {
        self.install_with(|| EventDispatcher::new(config))
    }

    /// Like [`install`](Self::install), reporting through a custom sink.
    pub fn install_with_sink<C: EventCategory>(
        &self,
        config: DispatchConfig,
        sink: Rc<dyn DiagnosticSink>,
    ) -> Rc<EventDispatcher<C>> {
        self.install_with(|| EventDispatcher::with_sink(config, sink))
    }

    fn install_with<C: EventCategory>(
        &self,
        create: impl FnOnce() -> EventDispatcher<C>,
    ) -> Rc<EventDispatcher<C>> {
        if let Ok(existing) = self.dispatcher::<C>() {
            debug!("Dispatcher for {} already installed, keeping it", C::NAME);
            return existing;
        }

        let dispatcher = Rc::new(create());
        self.dispatchers
            .borrow_mut()
            .insert(TypeId::of::<C>(), erase(dispatcher.clone()));
        self.installed.borrow_mut().push(C::NAME);
        info!("📡 Installed global dispatcher for {}", C::NAME);
        dispatcher
    }

    /// Resolves the dispatcher owning `C`.
    pub fn dispatcher<C: EventCategory>(&self) -> Result<Rc<EventDispatcher<C>>> {
        self.dispatchers
            .borrow()
            .get(&TypeId::of::<C>())
            .and_then(restore::<C>)
            .ok_or(EventError::CategoryNotRegistered(C::NAME))
    }

    pub fn is_installed<C: EventCategory>(&self) -> bool {
        self.dispatchers.borrow().contains_key(&TypeId::of::<C>())
    }

    /// Installed category names, in installation order.
    pub fn categories(&self) -> Vec<&'static str> {
        self.installed.borrow().clone()
    }

    /// Registers `listener` with the dispatcher of `C`.
    pub fn register_listener<C, L>(&self, listener: &Rc<L>) -> Result<usize>
    where
        C: EventCategory,
        L: EventListener<C>,
    {
        Ok(self.dispatcher::<C>()?.register(listener))
    }

    /// Queued send through the dispatcher of the record's category.
    pub fn send<T: EventRecord>(&self, record: &EventRef<T>) -> Result<()> {
        self.dispatcher::<T::Category>()?.submit(record)
    }

    /// Immediate send through the dispatcher of the record's category.
    pub fn send_immediate<T: EventRecord>(&self, record: &EventRef<T>) -> Result<()> {
        self.dispatcher::<T::Category>()?.submit_immediate(record)
    }

    /// Takes a record from its category's pool.
    #[track_caller]
    pub fn acquire<T: EventRecord>(&self) -> Result<EventRef<T>> {
        let dispatcher = self.dispatcher::<T::Category>()?;
        Ok(dispatcher.acquire::<T>())
    }

    /// Returns a record to its category's pool.
    pub fn release<T: EventRecord>(&self, record: EventRef<T>) -> Result<()> {
        self.dispatcher::<T::Category>()?.release(record);
        Ok(())
    }
}

impl fmt::Debug for GlobalDispatchers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalDispatchers")
            .field("categories", &*self.installed.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::registry::HandlerTable;
    use crate::{define_category, define_event};
    use std::cell::Cell;

    define_category!(Audio);
    define_category!(Input);

    define_event! {
        struct Volume in Audio {
            level: u8,
        }
    }

    define_event! {
        struct KeyDown in Input {
            code: u32,
        }
    }

    #[derive(Default)]
    struct Mixer {
        levels: RefCell<Vec<u8>>,
    }

    impl Mixer {
        fn on_volume(&self, event: &Volume) -> Result<()> {
            self.levels.borrow_mut().push(event.level);
            Ok(())
        }
    }

    impl EventListener<Audio> for Mixer {
        fn handlers(table: &mut HandlerTable<Audio, Self>) {
            table.on(Self::on_volume);
        }
    }

    #[test]
    fn test_unregistered_category_is_an_error() {
        let globals = GlobalDispatchers::new();
        let err = globals.dispatcher::<Audio>().unwrap_err();

        assert!(matches!(err, EventError::CategoryNotRegistered("Audio")));
        assert!(err.is_configuration());
        assert!(globals.acquire::<Volume>().is_err());
    }

    #[test]
    fn test_first_install_wins() {
        let globals = GlobalDispatchers::new();
        let first = globals.install::<Audio>(DispatchConfig::default());
        let second = globals.install::<Audio>(DispatchConfig::default().with_debug_data(false));

        assert!(Rc::ptr_eq(&first, &second));
        assert!(second.config().emit_debug_data);
        assert_eq!(globals.categories(), vec!["Audio"]);
    }

    #[test]
    fn test_send_routes_by_category() {
        let globals = GlobalDispatchers::new();
        globals.install::<Audio>(DispatchConfig::default());
        globals.install::<Input>(DispatchConfig::default());

        let mixer = Rc::new(Mixer::default());
        assert_eq!(globals.register_listener::<Audio, _>(&mixer).unwrap(), 1);

        let keys = Rc::new(Cell::new(0));
        let counter = keys.clone();
        globals
            .dispatcher::<Input>()
            .unwrap()
            .subscribe_any(crate::registry::AlwaysAlive, move |event: &dyn Event| {
                assert!(event.is::<KeyDown>());
                counter.set(counter.get() + 1);
                Ok(())
            });

        let volume = globals.acquire::<Volume>().unwrap();
        volume.borrow_mut().reset(7);
        globals.send(&volume).unwrap();
        globals.release(volume).unwrap();

        globals.send_immediate(&globals.acquire::<KeyDown>().unwrap()).unwrap();

        assert_eq!(*mixer.levels.borrow(), vec![7]);
        assert_eq!(keys.get(), 1);
    }

    #[test]
    fn test_pool_is_per_category_dispatcher() {
        let globals = GlobalDispatchers::new();
        globals.install::<Audio>(DispatchConfig::default());

        let record = globals.acquire::<Volume>().unwrap();
        let id = record.id();
        globals.release(record).unwrap();

        assert_eq!(globals.acquire::<Volume>().unwrap().id(), id);
    }

    #[test]
    fn test_current_is_shared_per_thread() {
        let a = GlobalDispatchers::current();
        let b = GlobalDispatchers::current();
        assert!(Rc::ptr_eq(&a, &b));
    }
}
