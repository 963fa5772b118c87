//! Integration tests for async handlers and completion handles
//!
//! Async handlers are launched on the `LocalSet` attached to their dispatcher
//! and never awaited by it; the tests await the completion handles instead.

use event_bus::{
    define_category, define_event, CompletionHandle, DispatchConfig, Event, EventDispatcher, EventError,
    EventListener, HandlerFuture, HandlerTable, NullSink, TaskOutcome,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;

define_category!(Assets);

define_event! {
    struct LoadLevel in Assets {
        level: u32,
    }
}

define_event! {
    struct Unload in Assets {
        level: u32,
    }
}

define_event! {
    struct Corrupt in Assets {
        level: u32,
    }
}

#[derive(Default)]
struct Loader {
    handles: RefCell<Vec<CompletionHandle>>,
    loaded: Rc<Cell<u32>>,
    unloaded: Rc<Cell<u32>>,
}

impl Loader {
    fn on_load(&self, event: &LoadLevel, handle: CompletionHandle) -> HandlerFuture {
        self.handles.borrow_mut().push(handle.clone());
        let level = event.level;
        let loaded = self.loaded.clone();
        Box::pin(async move {
            if !handle.is_launched() {
                return Err(EventError::handler("handle not bound before first poll"));
            }
            tokio::task::yield_now().await;
            loaded.set(loaded.get() + level);
            Ok(())
        })
    }

    fn on_unload(&self, event: &Unload) -> HandlerFuture {
        let level = event.level;
        let unloaded = self.unloaded.clone();
        Box::pin(async move {
            if level == 0 {
                return Err(EventError::handler("nothing to unload"));
            }
            unloaded.set(unloaded.get() + level);
            Ok(())
        })
    }

    fn on_any(&self, event: &dyn Event, handle: CompletionHandle) -> HandlerFuture {
        self.handles.borrow_mut().push(handle);
        let name = event.event_name();
        Box::pin(async move {
            if name.is_empty() {
                return Err(EventError::handler("unnamed event"));
            }
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
    }
}

impl EventListener<Assets> for Loader {
    fn handlers(table: &mut HandlerTable<Assets, Self>) {
        table
            .on_async_with_handle(Self::on_load)
            .on_async(Self::on_unload)
            .on_any_async_with_handle(Self::on_any);
    }
}

/// Listener whose background work panics.
#[derive(Default)]
struct Crasher {
    handles: RefCell<Vec<CompletionHandle>>,
}

impl Crasher {
    fn on_corrupt(&self, event: &Corrupt, handle: CompletionHandle) -> HandlerFuture {
        self.handles.borrow_mut().push(handle);
        let level = event.level;
        Box::pin(async move {
            tokio::task::yield_now().await;
            if level > 0 {
                panic!("corrupt level {}", level);
            }
            Ok(())
        })
    }
}

impl EventListener<Assets> for Crasher {
    fn handlers(table: &mut HandlerTable<Assets, Self>) {
        table.on_async_with_handle(Self::on_corrupt);
    }
}

fn detached_dispatcher() -> Rc<EventDispatcher<Assets>> {
    Rc::new(EventDispatcher::with_sink(DispatchConfig::default(), Rc::new(NullSink)))
}

fn dispatcher(local: &Rc<LocalSet>) -> Rc<EventDispatcher<Assets>> {
    let dispatcher = detached_dispatcher();
    dispatcher.attach_local_set(local.clone());
    dispatcher
}

fn load(dispatcher: &EventDispatcher<Assets>, level: u32) -> Result<(), EventError> {
    let record = dispatcher.acquire::<LoadLevel>();
    record.borrow_mut().reset(level);
    dispatcher.submit(&record)?;
    dispatcher.release(record);
    Ok(())
}

#[tokio::test]
async fn test_async_handler_receives_bound_handle() {
    let local = Rc::new(LocalSet::new());
    local
        .run_until(async {
            let dispatcher = dispatcher(&local);
            let loader = Rc::new(Loader::default());
            assert_eq!(dispatcher.register(&loader), 3);

            load(&dispatcher, 4).unwrap();

            // Dispatch returned without awaiting anything.
            assert_eq!(loader.loaded.get(), 0);

            let handles = loader.handles.borrow().clone();
            assert_eq!(handles.len(), 2);
            assert!(handles.iter().all(CompletionHandle::is_launched));

            let load_handle = &handles[1];
            assert_eq!(load_handle.wait().await, TaskOutcome::Completed);
            assert_eq!(loader.loaded.get(), 4);

            // The catch-all task is still sleeping; its owner cancels it.
            let any_handle = &handles[0];
            assert!(!any_handle.is_finished());
            any_handle.abort();
            assert_eq!(any_handle.outcome(), Some(TaskOutcome::Cancelled));
        })
        .await;
}

#[tokio::test]
async fn test_each_dispatch_gets_its_own_handle() {
    let local = Rc::new(LocalSet::new());
    local
        .run_until(async {
            let dispatcher = dispatcher(&local);
            let loader = Rc::new(Loader::default());
            dispatcher.register(&loader);

            load(&dispatcher, 1).unwrap();
            load(&dispatcher, 2).unwrap();

            let handles = loader.handles.borrow().clone();
            assert_eq!(handles.len(), 4);
            for handle in handles.iter().skip(1).step_by(2) {
                handle.join().await.unwrap();
            }
            for handle in handles.iter().step_by(2) {
                handle.abort();
            }

            assert_eq!(loader.loaded.get(), 3);
        })
        .await;
}

#[tokio::test]
async fn test_async_failure_does_not_fail_dispatch() {
    let local = Rc::new(LocalSet::new());
    local
        .run_until(async {
            let dispatcher = dispatcher(&local);
            let loader = Rc::new(Loader::default());
            dispatcher.register(&loader);

            let record = dispatcher.acquire::<Unload>();
            record.borrow_mut().reset(0);
            dispatcher.submit(&record).unwrap();

            record.borrow_mut().reset(5);
            dispatcher.submit(&record).unwrap();

            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(loader.unloaded.get(), 5);

            for handle in loader.handles.borrow().iter() {
                handle.abort();
            }
        })
        .await;
}

#[tokio::test]
async fn test_panicking_handler_settles_its_handle() {
    let local = Rc::new(LocalSet::new());
    local
        .run_until(async {
            let dispatcher = dispatcher(&local);
            let crasher = Rc::new(Crasher::default());
            dispatcher.register(&crasher);

            let record = dispatcher.acquire::<Corrupt>();
            record.borrow_mut().reset(7);
            dispatcher.submit(&record).unwrap();

            let handle = crasher.handles.borrow()[0].clone();
            let outcome = tokio::time::timeout(Duration::from_millis(500), handle.wait())
                .await
                .expect("handle never settled");
            assert!(matches!(outcome, TaskOutcome::Failed(ref m) if m.contains("corrupt level 7")));
            assert!(matches!(handle.join().await, Err(EventError::HandlerExecution(_))));

            // The dispatcher is unaffected and keeps delivering.
            assert!(dispatcher.is_idle());
            dispatcher.submit(&record).unwrap();
            assert_eq!(crasher.handles.borrow().len(), 2);
        })
        .await;
}

#[tokio::test]
async fn test_async_handler_without_local_set_is_an_error() {
    let dispatcher = detached_dispatcher();
    let loader = Rc::new(Loader::default());
    dispatcher.register(&loader);
    assert!(!dispatcher.has_local_set());

    let err = load(&dispatcher, 1).unwrap_err();

    assert!(matches!(err, EventError::NoAsyncRuntime(_)));
    assert!(dispatcher.is_idle());
    assert_eq!(loader.loaded.get(), 0);
}

#[test]
fn test_async_handler_outside_runtime_is_an_error() {
    let dispatcher = detached_dispatcher();
    let loader = Rc::new(Loader::default());
    dispatcher.register(&loader);

    let err = load(&dispatcher, 1).unwrap_err();

    assert!(matches!(err, EventError::NoAsyncRuntime(_)));
    assert!(dispatcher.is_idle());
}

#[test]
fn test_attached_set_runs_tasks_once_driven() {
    let local = Rc::new(LocalSet::new());
    let dispatcher = dispatcher(&local);
    let loader = Rc::new(Loader::default());
    dispatcher.register(&loader);

    // Launching needs no runtime; the tasks wait for the set to be driven.
    load(&dispatcher, 6).unwrap();
    let handles = loader.handles.borrow().clone();
    assert!(handles.iter().all(CompletionHandle::is_launched));
    assert_eq!(loader.loaded.get(), 0);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let outcome = runtime.block_on(local.run_until(handles[1].wait()));

    assert_eq!(outcome, TaskOutcome::Completed);
    assert_eq!(loader.loaded.get(), 6);
    handles[0].abort();
}
