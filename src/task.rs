//! Task lifecycle and execution.
//!
//! A `Task<T>` is a handle to a closure dispatched onto the host runtime.
//! Its shared [`TaskState`] lives as long as the DAG node does; the handle
//! itself only has to outlive the caller's interest in the result.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::TaskError;
use crate::region::{AccessMode, Region};
use crate::switches;
use crate::tag::Tag;

/// Where a task currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    Created = 0,
    Inserted = 1,
    Runnable = 2,
    Running = 3,
    Finished = 4,
    Removed = 5,
}

impl TaskStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskStatus::Created,
            1 => TaskStatus::Inserted,
            2 => TaskStatus::Runnable,
            3 => TaskStatus::Running,
            4 => TaskStatus::Finished,
            _ => TaskStatus::Removed,
        }
    }
}

/// Shared state for one task, reachable from its [`crate::dag::Dag`] node,
/// its [`Task`] handle, and the closure body running on the host runtime.
pub(crate) struct TaskState {
    pub(crate) tag: Tag,
    pub(crate) label: String,
    pub(crate) priority: f64,
    pub(crate) data: Vec<Arc<dyn Region>>,
    pub(crate) modes: Vec<AccessMode>,
    status: AtomicU8,
    outcome: parking_lot::Mutex<Option<Result<(), TaskError>>>,
    outcome_ready: Notify,
}

impl TaskState {
    pub(crate) fn new(
        tag: Tag,
        data: Vec<Arc<dyn Region>>,
        modes: Vec<AccessMode>,
        label: String,
        priority: f64,
    ) -> Arc<Self> {
        Arc::new(TaskState {
            tag,
            label,
            priority,
            data,
            modes,
            status: AtomicU8::new(TaskStatus::Created as u8),
            outcome: parking_lot::Mutex::new(None),
            outcome_ready: Notify::new(),
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(
        tag: Tag,
        data: Vec<Arc<dyn Region>>,
        modes: Vec<AccessMode>,
        label: String,
        priority: f64,
    ) -> Arc<Self> {
        Self::new(tag, data, modes, label, priority)
    }

    pub(crate) fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub(crate) fn set_outcome(&self, outcome: Result<(), TaskError>) {
        *self.outcome.lock() = Some(outcome);
        self.set_status(TaskStatus::Finished);
        self.outcome_ready.notify_waiters();
    }

    pub(crate) async fn outcome(&self) -> Result<(), TaskError> {
        loop {
            if let Some(outcome) = self.outcome.lock().clone() {
                return outcome;
            }
            let notified = self.outcome_ready.notified();
            if let Some(outcome) = self.outcome.lock().clone() {
                return outcome;
            }
            notified.await;
        }
    }
}

/// Awaits every predecessor's own outcome directly, in the order they were
/// captured at insertion. If any predecessor failed, `tag`'s task never runs
/// its closure at all: it is poisoned with [`TaskError::PredecessorFailed`]
/// instead.
pub(crate) async fn await_predecessors(tag: Tag, predecessors: &[Arc<TaskState>]) -> Result<(), TaskError> {
    for predecessor in predecessors {
        if predecessor.outcome().await.is_err() {
            return Err(TaskError::PredecessorFailed {
                tag,
                predecessor: predecessor.tag,
            });
        }
    }
    Ok(())
}

/// A handle to a scheduled unit of work.
///
/// `T` is the closure's return type. Dropping a `Task` does not cancel it;
/// the closure runs to completion regardless, fire-and-forget unless the
/// caller calls `fetch`.
pub struct Task<T> {
    pub(crate) tag: Tag,
    pub(crate) state: Arc<TaskState>,
    pub(crate) handle: tokio::task::JoinHandle<Result<T, TaskError>>,
}

impl<T> Task<T> {
    /// The task's identity, stable for its whole lifetime.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The task's human-readable label, if one was given at creation.
    pub fn label(&self) -> &str {
        &self.state.label
    }

    /// Blocks the calling (synchronous) thread until this task's closure
    /// has finished, without consuming the handle or yielding its value.
    /// Unlike [`Task::fetch`], `wait` can be called more than once and
    /// doesn't require giving up ownership of the handle.
    pub fn wait(&self) -> Result<(), TaskError> {
        crate::runtime::handle().block_on(self.state.outcome())
    }

    /// Whether this task's closure has already finished (successfully or
    /// not), without blocking.
    pub fn is_done(&self) -> bool {
        self.state.status() == TaskStatus::Finished
    }

    /// A data-region handle for this task, usable in another [`Task`]'s
    /// data list so that task waits on this one directly — the
    /// nested-dependency case where one task's declared data happens to
    /// include a reference to another task rather than a plain buffer.
    /// [`crate::dependency`] adds the edge unconditionally (as long as this
    /// task is still live in the graph) rather than running it through
    /// [`crate::overlaps`].
    pub fn as_dependency(&self) -> Arc<dyn Region> {
        Arc::new(crate::region::TaskRef(self.tag))
    }

    /// Blocks the calling (synchronous) thread until this task has run
    /// its closure to completion, returning the closure's value or the
    /// [`TaskError`] that prevented it from producing one.
    ///
    /// Unlike [`crate::TaskGraph::wait`], this does not wait for the
    /// task's *successors*, only for the task itself.
    pub fn fetch(self) -> Result<T, TaskError> {
        crate::runtime::handle().block_on(self.handle).unwrap_or_else(|join_err| {
            if join_err.is_cancelled() {
                Err(TaskError::Cancelled { tag: self.tag })
            } else {
                Err(TaskError::Panicked {
                    tag: self.tag,
                    label: join_err.to_string(),
                })
            }
        })
    }
}

/// Runs `body` on a blocking-pool thread, honoring [`switches::debug_mode`]
/// for panic interception, and converts the outcome into a [`TaskError`].
pub(crate) async fn run_closure<T, F>(tag: Tag, label: String, body: F) -> Result<T, TaskError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let debug = switches::is_debug_mode();
    let label_for_panic = label.clone();
    let result = tokio::task::spawn_blocking(move || {
        if debug {
            std::panic::catch_unwind(AssertUnwindSafe(body)).map_err(|payload| {
                log::error!("task {} (\"{}\") panicked: {:?}", tag, label_for_panic, panic_message(&payload));
                payload
            })
        } else {
            Ok(body())
        }
    })
    .await;

    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_payload)) => Err(TaskError::Panicked { tag, label }),
        Err(_join_err) => Err(TaskError::Panicked { tag, label }),
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
