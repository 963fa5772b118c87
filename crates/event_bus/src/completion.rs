//! # Async handlers and completion handles
//!
//! Some handlers return a future instead of finishing inline. The dispatcher
//! launches that future on the tokio `LocalSet` attached to it through a
//! [`TaskSpawner`] and moves on; it never awaits it. A dispatcher without an
//! attached `LocalSet` refuses to launch and reports
//! [`EventError::NoAsyncRuntime`].
//!
//! A handler can also ask for a [`CompletionHandle`] describing the task it is
//! about to become. The dispatcher creates the handle before invoking the
//! handler, passes a clone in, and binds the launched task to it straight
//! away: `LocalSet::spawn_local` hands back its `JoinHandle` synchronously and
//! does not poll the task until the set is driven, so the handle is already
//! bound when the handler's future first runs. Every dispatch gets its own
//! handle, and every handle settles: completion, error, panic, abort and the
//! task being dropped unfinished all produce an outcome.
//!
//! ```rust,no_run
//! # use event_bus::CompletionHandle;
//! # async fn example(handle: CompletionHandle) {
//! // Elsewhere in the listener: wait for, or cancel, the in-flight work.
//! let outcome = handle.wait().await;
//! println!("handler finished: {:?}", outcome);
//! # }
//! ```

use crate::error::{EventError, Result};
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use tokio::sync::Notify;
use tokio::task::{AbortHandle, LocalSet};
use tracing::{debug, error, warn};

/// Boxed future returned by async handlers.
pub type HandlerFuture = LocalBoxFuture<'static, Result<()>>;

/// How an async handler's task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

struct CompletionState {
    label: String,
    abort: RefCell<Option<AbortHandle>>,
    outcome: RefCell<Option<TaskOutcome>>,
    finished: Notify,
}

/// Handle to the asynchronous work started by one handler invocation.
#[derive(Clone)]
pub struct CompletionHandle {
    state: Rc<CompletionState>,
}

impl CompletionHandle {
    pub(crate) fn new(label: &str) -> Self {
        Self {
            state: Rc::new(CompletionState {
                label: label.to_string(),
                abort: RefCell::new(None),
                outcome: RefCell::new(None),
                finished: Notify::new(),
            }),
        }
    }

    /// Name of the handler that owns this task.
    pub fn label(&self) -> &str {
        &self.state.label
    }

    /// Whether the task has been handed to the scheduler.
    pub fn is_launched(&self) -> bool {
        self.state.abort.borrow().is_some()
    }

    /// Whether the task has ended, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.state.outcome.borrow().is_some()
    }

    /// The outcome, once the task has ended.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.state.outcome.borrow().clone()
    }

    /// Cancels the task. Has no effect once it has finished.
    pub fn abort(&self) {
        if self.is_finished() {
            return;
        }
        if let Some(handle) = self.state.abort.borrow().as_ref() {
            handle.abort();
        }
        debug!("Cancelled async handler {}", self.state.label);
        self.finish(TaskOutcome::Cancelled);
    }

    /// Waits until the task ends.
    pub async fn wait(&self) -> TaskOutcome {
        loop {
            let notified = self.state.finished.notified();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Same as [`wait`](Self::wait) but maps the outcome to a `Result`.
    pub async fn join(&self) -> Result<()> {
        match self.wait().await {
            TaskOutcome::Completed => Ok(()),
            TaskOutcome::Failed(message) => Err(EventError::HandlerExecution(message)),
            TaskOutcome::Cancelled => Err(EventError::TaskCancelled),
        }
    }

    fn bind(&self, abort: AbortHandle) {
        *self.state.abort.borrow_mut() = Some(abort);
    }

    fn finish(&self, outcome: TaskOutcome) {
        {
            let mut slot = self.state.outcome.borrow_mut();
            if slot.is_some() {
                return;
            }
            *slot = Some(outcome);
        }
        self.state.finished.notify_waiters();
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("label", &self.state.label)
            .field("launched", &self.is_launched())
            .field("outcome", &self.outcome())
            .finish()
    }
}

/// Settles a handle as cancelled if its task is dropped before finishing,
/// e.g. when the `LocalSet` goes away with the task still pending.
struct SettleOnDrop(Option<CompletionHandle>);

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = &self.0 {
            handle.finish(TaskOutcome::Cancelled);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Launches async handlers on the `LocalSet` a host attached.
///
/// Clones share the same slot, so attaching once reaches every handler
/// already bound through a clone.
#[derive(Clone, Default)]
pub struct TaskSpawner {
    local: Rc<RefCell<Option<Rc<LocalSet>>>>,
}

impl TaskSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs subsequently launched handlers on `local`. The host must drive the
    /// set (`run_until`, `await`) for the tasks to make progress.
    pub fn attach(&self, local: Rc<LocalSet>) {
        *self.local.borrow_mut() = Some(local);
    }

    pub fn detach(&self) {
        self.local.borrow_mut().take();
    }

    pub fn is_attached(&self) -> bool {
        self.local.borrow().is_some()
    }

    /// Spawns `future` and binds the task to `handle` before it is polled.
    pub(crate) fn launch<F>(&self, label: &str, handle: Option<CompletionHandle>, future: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + 'static,
    {
        let Some(local) = self.local.borrow().clone() else {
            return Err(EventError::NoAsyncRuntime(label.to_string()));
        };

        let settle = SettleOnDrop(handle.clone());
        let task_label = label.to_string();
        let join = local.spawn_local(async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => TaskOutcome::Completed,
                Ok(Err(e)) => {
                    warn!("Async handler {} failed: {}", task_label, e);
                    TaskOutcome::Failed(e.to_string())
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!("Async handler {} panicked: {}", task_label, message);
                    TaskOutcome::Failed(format!("panicked: {}", message))
                }
            };
            if let Some(handle) = &settle.0 {
                handle.finish(outcome);
            }
        });

        if let Some(handle) = handle {
            handle.bind(join.abort_handle());
        }
        Ok(())
    }
}

impl fmt::Debug for TaskSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpawner")
            .field("attached", &self.is_attached())
            .finish()
    }
}
