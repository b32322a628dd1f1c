//! Delivery contexts.
//!
//! Subscribers are never called from a reader task. Flushed batches are posted
//! to a [`Dispatcher`], which runs every task on one serial context.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Unit of work posted to a delivery context
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A single-consumer execution context
pub trait Dispatcher: Send + Sync {
    fn post(&self, task: Task);
}

/// Runs every task on one tokio task, in posting order
pub struct TaskDispatcher {
    /// Task queue sender
    sender: mpsc::UnboundedSender<Task>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
    /// Drain loop handle
    task: tokio::task::JoinHandle<()>,
}

impl TaskDispatcher {
    /// Spawn the drain loop on the current runtime.
    ///
    /// Panics outside a tokio runtime, like `tokio::spawn`.
    pub fn spawn() -> Self {
        Self::spawn_on(&Handle::current())
    }

    /// Spawn the drain loop on the given runtime
    pub fn spawn_on(handle: &Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();

            handle.spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,

                        next = receiver.recv() => match next {
                            Some(task) => run_task(task),
                            None => break,
                        }
                    }
                }
                debug!("dispatcher stopped");
            })
        };

        Self {
            sender,
            cancel,
            task,
        }
    }

    /// Stop draining; queued tasks that have not run yet are dropped
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Run one task; a panicking subscriber must not take the drain loop down
fn run_task(task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!("delivery task panicked");
    }
}

impl Dispatcher for TaskDispatcher {
    fn post(&self, task: Task) {
        if self.sender.send(task).is_err() {
            warn!("dispatcher is shut down, dropping task");
        }
    }
}

impl Drop for TaskDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs tasks immediately on the posting thread.
///
/// Meant for synchronous hosts and tests where the caller already is the
/// delivery context.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn post(&self, task: Task) {
        task();
    }
}
