//! The two walkthroughs the demo runs: one dispatcher per category for the
//! whole program, and dispatchers scoped to rooms of a small world tree.

use crate::config::ScenarioSettings;
use anyhow::{Context, Result};
use event_bus::{
    define_category, define_event, CompletionHandle, DispatchConfig, DispatchStats, Event, EventError,
    EventListener, GlobalDispatchers, HandlerFuture, HandlerTable, Hierarchy, ScopedListener,
};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;
use tracing::{debug, info};

define_category!(pub Example);

define_event! {
    /// A number was picked.
    pub struct NumberSet in Example {
        pub number: i32,
    }
    debug: "Setting a number."
}

/// Listener that records every number it receives and "saves" each one in
/// the background.
pub struct NumberWatcher {
    name: String,
    received: RefCell<Vec<i32>>,
    saves: RefCell<Vec<CompletionHandle>>,
}

impl NumberWatcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            received: RefCell::new(Vec::new()),
            saves: RefCell::new(Vec::new()),
        }
    }

    fn on_number_set(&self, event: &NumberSet) -> Result<(), EventError> {
        info!("🔢 {} received number {} from [{}]", self.name, event.number, event.origin());
        self.received.borrow_mut().push(event.number);
        Ok(())
    }

    fn on_event(&self, event: &dyn Event) -> Result<(), EventError> {
        debug!("{} saw {}", self.name, event.event_name());
        Ok(())
    }

    fn save_number(&self, event: &NumberSet, handle: CompletionHandle) -> HandlerFuture {
        self.saves.borrow_mut().push(handle);
        let owner = self.name.clone();
        let number = event.number;
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            debug!("💾 {} saved number {}", owner, number);
            Ok(())
        })
    }

    pub fn received(&self) -> Vec<i32> {
        self.received.borrow().clone()
    }

    /// Waits for every background save this watcher started.
    pub async fn wait_for_saves(&self) -> Result<usize> {
        let saves = self.saves.borrow().clone();
        for save in &saves {
            save.join()
                .await
                .with_context(|| format!("{} failed to save a number", self.name))?;
        }
        Ok(saves.len())
    }
}

impl EventListener<Example> for NumberWatcher {
    fn handlers(table: &mut HandlerTable<Example, Self>) {
        table
            .on(Self::on_number_set)
            .on_any(Self::on_event)
            .on_async_with_handle(Self::save_number);
    }
}

/// Stats of one dispatcher, labelled by where it lives.
#[derive(Debug, Serialize)]
pub struct DispatcherReport {
    pub scope: String,
    pub stats: DispatchStats,
}

/// What a scenario observed.
#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub scenario: &'static str,
    pub received: BTreeMap<String, Vec<i32>>,
    pub saves_completed: usize,
    pub dispatchers: Vec<DispatcherReport>,
}

/// One dispatcher for the `Example` category, shared by everyone. Background
/// saves run on `local`, which the caller must be driving.
pub async fn run_global(
    settings: &ScenarioSettings,
    dispatch: &DispatchConfig,
    local: &Rc<LocalSet>,
) -> Result<ScenarioReport> {
    let globals = GlobalDispatchers::new();
    let dispatcher = globals.install::<Example>(dispatch.clone());
    dispatcher.attach_local_set(local.clone());

    let first = Rc::new(NumberWatcher::new("first"));
    let second = Rc::new(NumberWatcher::new("second"));
    globals.register_listener::<Example, _>(&first)?;
    globals.register_listener::<Example, _>(&second)?;

    for &number in &settings.queued_numbers {
        let event = globals.acquire::<NumberSet>()?;
        event.borrow_mut().reset(number);
        globals.send(&event)?;
        globals.release(event)?;
    }

    let event = globals.acquire::<NumberSet>()?;
    event.borrow_mut().reset(settings.immediate_number);
    globals.send_immediate(&event)?;
    globals.release(event)?;

    let saves_completed = first.wait_for_saves().await? + second.wait_for_saves().await?;

    let mut received = BTreeMap::new();
    for watcher in [&first, &second] {
        received.insert(watcher.name.clone(), watcher.received());
    }

    Ok(ScenarioReport {
        scenario: "global",
        received,
        saves_completed,
        dispatchers: vec![DispatcherReport {
            scope: "global".to_string(),
            stats: dispatcher.stats(),
        }],
    })
}

/// A world with several rooms, each with its own `Example` dispatcher. Every
/// room has a watcher on a nested node; numbers sent in one room stay there.
/// The last room is despawned before the final round.
pub async fn run_hierarchy(
    settings: &ScenarioSettings,
    dispatch: &DispatchConfig,
    local: &Rc<LocalSet>,
) -> Result<ScenarioReport> {
    let world = Hierarchy::new();
    let root = world.spawn_root("world");

    let mut rooms = Vec::with_capacity(settings.rooms);
    for index in 0..settings.rooms {
        let room = world.spawn_child(root, &format!("room-{}", index))?;
        let desk = world.spawn_child(room, "desk")?;
        let dispatcher = world.attach_dispatcher::<Example>(room, dispatch.clone())?;
        dispatcher.attach_local_set(local.clone());

        let watcher = Rc::new(NumberWatcher::new(format!("room-{}", index)));
        let scope = world
            .register_listener::<Example, _>(desk, &watcher)
            .with_context(|| format!("registering the watcher of room-{}", index))?;
        rooms.push((room, dispatcher, watcher, scope));
    }

    for (index, (_, _, _, scope)) in rooms.iter().enumerate() {
        for &number in &settings.queued_numbers {
            send(scope, number + index as i32 * 100, false)?;
        }
        send(scope, settings.immediate_number, true)?;
    }

    // Despawning a room kills the listeners below it; its dispatcher keeps
    // running for whoever still holds it.
    if let Some((room, _, _, scope)) = rooms.last() {
        world.despawn(*room)?;
        send(scope, -1, false)?;
    }

    let mut saves_completed = 0;
    let mut received = BTreeMap::new();
    let mut dispatchers = Vec::new();
    for (room, dispatcher, watcher, _) in &rooms {
        saves_completed += watcher.wait_for_saves().await?;
        received.insert(watcher.name.clone(), watcher.received());
        dispatchers.push(DispatcherReport {
            scope: format!("{} ({})", watcher.name, room),
            stats: dispatcher.stats(),
        });
    }

    Ok(ScenarioReport {
        scenario: "hierarchy",
        received,
        saves_completed,
        dispatchers,
    })
}

fn send(scope: &ScopedListener<Example>, number: i32, immediate: bool) -> Result<(), EventError> {
    let event = scope.acquire::<NumberSet>();
    event.borrow_mut().reset(number);
    if immediate {
        scope.send_immediate(&event)?;
    } else {
        scope.send(&event)?;
    }
    scope.release(event);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ScenarioSettings {
        ScenarioSettings {
            queued_numbers: vec![8, 15],
            immediate_number: 44,
            rooms: 3,
        }
    }

    #[tokio::test]
    async fn test_global_scenario_reaches_every_watcher() {
        let local = Rc::new(LocalSet::new());
        let report = local
            .run_until(run_global(&settings(), &DispatchConfig::default(), &local))
            .await
            .unwrap();

        assert_eq!(report.received["first"], vec![8, 15, 44]);
        assert_eq!(report.received["second"], vec![8, 15, 44]);
        assert_eq!(report.saves_completed, 6);

        let stats = &report.dispatchers[0].stats;
        assert_eq!(stats.events_queued, 2);
        assert_eq!(stats.immediate_dispatches, 1);
        assert_eq!(stats.duplicates_rejected, 0);
    }

    #[tokio::test]
    async fn test_hierarchy_scenario_keeps_rooms_apart() {
        let local = Rc::new(LocalSet::new());
        let report = local
            .run_until(run_hierarchy(&settings(), &DispatchConfig::default(), &local))
            .await
            .unwrap();

        assert_eq!(report.received["room-0"], vec![8, 15, 44]);
        assert_eq!(report.received["room-1"], vec![108, 115, 44]);
        // The despawned room's watcher missed the last number.
        assert_eq!(report.received["room-2"], vec![208, 215, 44]);
        assert_eq!(report.saves_completed, 9);

        let last = &report.dispatchers[2].stats;
        assert_eq!(last.events_dispatched, 4);
        assert_eq!(last.listeners_pruned, 3);
        assert_eq!(last.total_listeners, 0);
    }

    #[tokio::test]
    async fn test_scenario_without_local_set_reports_missing_set() {
        let globals = GlobalDispatchers::new();
        globals.install::<Example>(DispatchConfig::default());
        let watcher = Rc::new(NumberWatcher::new("lonely"));
        globals.register_listener::<Example, _>(&watcher).unwrap();

        let event = globals.acquire::<NumberSet>().unwrap();
        event.borrow_mut().reset(3);
        let err = globals.send(&event).unwrap_err();

        assert!(matches!(err, EventError::NoAsyncRuntime(_)));
        // Synchronous handlers before the async one still ran.
        assert_eq!(watcher.received(), vec![3]);
    }

    #[test]
    fn test_number_set_debug_line() {
        let mut event = NumberSet::default();
        event.set_origin("scenario");
        event.reset(8);
        assert_eq!(event.debug_data(), "[NumberSet] sent by [scenario] : Setting a number.");
    }
}
