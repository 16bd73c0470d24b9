//! The `TaskGraph` scheduler facade: `spawn`, `wait`, `empty`, `resize`,
//! and the bookkeeping that ties the DAG, dependency inference, and the
//! host runtime together.
//!
//! A task's lifecycle after `spawn` runs almost entirely off the calling
//! thread: the async body (dispatched onto the shared [`crate::runtime`])
//! awaits its predecessors, runs the user's closure on the blocking pool,
//! records its outcome, and reports itself on the *finished channel*. A
//! single dedicated thread drains that channel and is the only thread
//! that ever removes a node from the DAG or wakes a successor — "pinned"
//! the same way the reference implementation pins its cleanup pass to one
//! worker, so `Dag::remove` and its notification side effects never race
//! against each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use parking_lot::Mutex;

use crate::clock;
use crate::critical_path::{self, CriticalPathEntry};
use crate::dag::Dag;
use crate::dependency;
use crate::error::{ConfigError, GraphError};
use crate::log_info::LogInfo;
use crate::region::{AccessMode, Region};
use crate::runtime;
use crate::switches;
use crate::tag::Tag;
use crate::task::{self, run_closure, Task, TaskState, TaskStatus};

enum FinishedMessage {
    Finished(Tag),
    Stop,
}

/// Snapshot of a graph's size, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStats {
    pub num_nodes: usize,
    pub num_edges: usize,
    pub capacity: usize,
}

thread_local! {
    // A stack, not a single cell, so a task body that itself calls
    // `with_taskgraph` for a nested inner graph restores the outer one on
    // exit rather than clobbering it with `None`.
    static ACTIVE_GRAPH: std::cell::RefCell<Vec<Arc<TaskGraph>>> = std::cell::RefCell::new(Vec::new());
}

/// Runs `f` with `graph` installed as the calling thread's active
/// [`TaskGraph`], restoring whatever was active beforehand when `f`
/// returns — or panics, since the restore happens in a drop guard. Graphs
/// nest: calling `with_taskgraph` again from within `f` (e.g. from a task
/// body that spawns an inner graph of its own) pushes a new active graph
/// and pops back to this one afterward.
pub fn with_taskgraph<R>(graph: &Arc<TaskGraph>, f: impl FnOnce() -> R) -> R {
    ACTIVE_GRAPH.with(|stack| stack.borrow_mut().push(Arc::clone(graph)));

    struct PopOnDrop;
    impl Drop for PopOnDrop {
        fn drop(&mut self) {
            ACTIVE_GRAPH.with(|stack| {
                stack.borrow_mut().pop();
            });
        }
    }
    let _restore = PopOnDrop;

    f()
}

/// The calling thread's current active graph, if a [`with_taskgraph`] call
/// is on the stack; `None` on a thread that never entered one.
pub fn active_taskgraph() -> Option<Arc<TaskGraph>> {
    ACTIVE_GRAPH.with(|stack| stack.borrow().last().cloned())
}

/// Clears this thread's active-graph stack. Only meaningful for test
/// isolation; see [`crate::testing::reset_globals`].
pub(crate) fn reset_active_graph() {
    ACTIVE_GRAPH.with(|stack| stack.borrow_mut().clear());
}

/// A dataflow task graph: a scheduler that infers dependencies between
/// tasks from the data regions they declare, and runs them on the host
/// concurrency runtime in an order consistent with those dependencies.
pub struct TaskGraph {
    dag: Arc<Dag>,
    log: Arc<LogInfo>,
    finished_tx: Mutex<mpsc::Sender<FinishedMessage>>,
    cleanup: Mutex<Option<std::thread::JoinHandle<()>>>,
    wedged: Arc<AtomicBool>,
}

impl TaskGraph {
    /// Creates a graph bounded to at most `capacity` live tasks at once.
    /// `spawn` blocks the calling thread once the graph is at capacity,
    /// until a task finishes and is removed.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        let dag = Arc::new(Dag::new(capacity)?);
        let log = Arc::new(LogInfo::new(runtime::worker_count()));
        let wedged = Arc::new(AtomicBool::new(false));
        let (finished_tx, cleanup) = spawn_cleanup_worker(&dag, &wedged);

        Ok(TaskGraph {
            dag,
            log,
            finished_tx: Mutex::new(finished_tx),
            cleanup: Mutex::new(Some(cleanup)),
            wedged,
        })
    }

    /// Schedules `body` as a new task, inferring its predecessors from
    /// `data`/`modes` against every task currently live in the graph.
    ///
    /// If [`crate::switches::force_sequential`] is on, runs `body` on the
    /// calling thread immediately instead, bypassing the DAG entirely.
    pub fn spawn<T, F>(
        &self,
        data: Vec<Arc<dyn Region>>,
        modes: Vec<AccessMode>,
        label: impl Into<String>,
        priority: f64,
        body: F,
    ) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        assert_eq!(
            data.len(),
            modes.len(),
            "a task must declare exactly one access mode per data region"
        );
        let label = label.into();

        if switches::is_force_sequential() {
            return self.spawn_sequential(label, priority, body);
        }

        let log = Arc::clone(&self.log);
        let insertion_start = clock::now_nanos();
        let (state, predecessor_states, gc_time) = self.dag.insert_new(|nodes| {
            let predecessor_tags = dependency::infer_predecessors(nodes, &data, &modes);
            let tag = Tag::next();
            let state = TaskState::new(tag, data, modes, label, priority);
            (state, predecessor_tags)
        });
        state.set_status(TaskStatus::Inserted);
        let predecessor_tags: Vec<Tag> = predecessor_states.iter().map(|p| p.tag).collect();
        log.record_insertion(state.tag, insertion_start, clock::now_nanos(), gc_time);

        let tag = state.tag;
        let task_label = state.label.clone();
        let body_state = Arc::clone(&state);
        let finished_tx = self.finished_tx.lock().clone();
        let dag = Arc::clone(&self.dag);

        let handle = runtime::handle().spawn(async move {
            let result = match task::await_predecessors(tag, &predecessor_states).await {
                Ok(()) => {
                    body_state.set_status(TaskStatus::Runnable);
                    body_state.set_status(TaskStatus::Running);
                    let t_start = clock::now_nanos();

                    let result = run_closure(tag, task_label.clone(), body).await;

                    let t_finish = clock::now_nanos();
                    log.record_task(tag, task_label, predecessor_tags, t_start, t_finish);
                    result
                }
                Err(poisoned) => Err(poisoned),
            };

            body_state.set_outcome(result.as_ref().map(|_| ()).map_err(Clone::clone));
            // The task is done with the DAG's bookkeeping regardless of
            // whether it succeeded; a failed task still unblocks its
            // successors via its own `outcome`, which those successors
            // learn failed and poison themselves with instead of running.
            let _ = finished_tx.send(FinishedMessage::Finished(tag));

            result
        });

        dag.set_abort_handle(tag, handle.abort_handle());
        Task { tag, state, handle }
    }

    fn spawn_sequential<T, F>(&self, label: String, priority: f64, body: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let tag = Tag::next();
        let state = TaskState::new(tag, Vec::new(), Vec::new(), label, priority);
        state.set_status(TaskStatus::Running);
        let value = body();
        state.set_outcome(Ok(()));
        let handle = runtime::handle().spawn(async move { Ok(value) });
        Task { tag, state, handle }
    }

    /// Blocks the calling thread until every task currently live in the
    /// graph has finished and been removed.
    pub fn wait(&self) -> Result<(), GraphError> {
        if self.wedged.load(Ordering::SeqCst) {
            return Err(GraphError::Wedged);
        }
        if self.dag.wait_empty_or_wedged(&self.wedged) {
            Ok(())
        } else {
            Err(GraphError::Wedged)
        }
    }

    /// Emergency reset: stops the cleanup worker,
    /// drains whatever is left of the finished channel, cancels every
    /// pending inner task — errors from that cancellation are swallowed,
    /// since a task that was never going to run anyway has nothing to
    /// report — clears the DAG, and starts a fresh cleanup worker. Intended
    /// as a recovery step after [`TaskGraph::wait`] returns
    /// [`GraphError::Wedged`], or any time the caller wants to discard a
    /// graph's in-flight work outright.
    pub fn empty(&self) {
        {
            let tx = self.finished_tx.lock();
            let _ = tx.send(FinishedMessage::Stop);
        }
        if let Some(handle) = self.cleanup.lock().take() {
            let _ = handle.join();
        }

        self.dag.clear();
        self.wedged.store(false, Ordering::SeqCst);

        let (new_tx, new_cleanup) = spawn_cleanup_worker(&self.dag, &self.wedged);
        *self.finished_tx.lock() = new_tx;
        *self.cleanup.lock() = Some(new_cleanup);
    }

    /// Changes the graph's capacity. Errs without making any change if
    /// `new_capacity` is zero or smaller than the number of tasks
    /// currently live.
    pub fn resize(&self, new_capacity: usize) -> Result<(), ConfigError> {
        self.dag.resize(new_capacity)
    }

    /// The longest weighted chain of dependent tasks recorded in this
    /// graph's log so far. Requires
    /// [`crate::switches::log_enabled`] to have been on while those tasks
    /// ran; otherwise always empty.
    pub fn longest_path(&self) -> Vec<CriticalPathEntry> {
        critical_path::longest_path(&self.log)
    }

    /// The trace log accumulated for this graph so far.
    pub fn log_info(&self) -> &LogInfo {
        &self.log
    }

    /// A snapshot of this graph's current size.
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            num_nodes: self.dag.num_nodes(),
            num_edges: self.dag.num_edges(),
            capacity: self.dag.capacity(),
        }
    }

    /// `(tag, label, predecessor tags)` for every task currently live in
    /// the graph, oldest first.
    pub fn live_tasks(&self) -> Vec<(Tag, String, Vec<Tag>)> {
        self.dag.live_tasks()
    }
}

impl Drop for TaskGraph {
    fn drop(&mut self) {
        let _ = self.finished_tx.lock().send(FinishedMessage::Stop);
        if let Some(handle) = self.cleanup.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Starts a fresh dedicated cleanup-worker thread over `dag`, returning the
/// sender its `spawn` callers should report completions on. Used both by
/// [`TaskGraph::new`] and by [`TaskGraph::empty`], which needs to restart
/// the worker after stopping it.
fn spawn_cleanup_worker(
    dag: &Arc<Dag>,
    wedged: &Arc<AtomicBool>,
) -> (mpsc::Sender<FinishedMessage>, std::thread::JoinHandle<()>) {
    let (finished_tx, finished_rx) = mpsc::channel::<FinishedMessage>();
    let cleanup_dag = Arc::clone(dag);
    let cleanup_wedged = Arc::clone(wedged);
    let handle = std::thread::Builder::new()
        .name("dataflow-tasks-cleanup".to_string())
        .spawn(move || cleanup_worker(&cleanup_dag, finished_rx, &cleanup_wedged))
        .expect("failed to start the dedicated cleanup worker thread");
    (finished_tx, handle)
}

/// Drains the finished channel, removing each reported task from the DAG.
/// Waking a successor is not this worker's job — each task's own body
/// awaits its predecessors' outcomes directly — so this thread's only
/// purpose is bookkeeping: freeing DAG capacity and keeping `num_nodes`
/// accurate. If removal itself panics — a logic bug, not a user error —
/// the graph is marked wedged rather than silently stopping: further
/// `wait` calls fail fast instead of hanging forever waiting on a DAG
/// nothing drains anymore.
fn cleanup_worker(dag: &Arc<Dag>, finished_rx: mpsc::Receiver<FinishedMessage>, wedged: &Arc<AtomicBool>) {
    for message in finished_rx {
        let tag = match message {
            FinishedMessage::Finished(tag) => tag,
            FinishedMessage::Stop => break,
        };

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| dag.remove(tag)));
        if outcome.is_err() {
            log::error!("cleanup worker panicked removing task {}; graph is now wedged", tag);
            wedged.store(true, Ordering::SeqCst);
            dag.notify_wedged();
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::region::{Buffer, Scalar};
    use std::sync::atomic::AtomicU32;

    #[test]
    fn with_taskgraph_installs_and_restores_the_active_graph() {
        reset_active_graph();
        assert!(active_taskgraph().is_none());

        let outer = Arc::new(TaskGraph::new(4).unwrap());
        with_taskgraph(&outer, || {
            assert!(active_taskgraph().is_some());

            let inner = Arc::new(TaskGraph::new(4).unwrap());
            with_taskgraph(&inner, || {
                // The innermost `with_taskgraph` call wins while it's on
                // the stack.
                assert_eq!(active_taskgraph().unwrap().stats().capacity, 4);
            });

            // Popping the inner graph restores the outer one, not `None`.
            assert!(active_taskgraph().is_some());
        });

        assert!(active_taskgraph().is_none());
    }

    #[test]
    fn with_taskgraph_restores_the_active_graph_even_if_f_panics() {
        reset_active_graph();
        let outer = Arc::new(TaskGraph::new(4).unwrap());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            with_taskgraph(&outer, || {
                panic!("boom");
            })
        }));

        assert!(result.is_err());
        assert!(active_taskgraph().is_none());
    }

    #[test]
    fn independent_tasks_all_run() {
        let graph = TaskGraph::new(8).unwrap();
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            let buf = Buffer::new(1);
            graph.spawn(
                vec![Arc::new(buf)],
                vec![AccessMode::Write],
                "independent",
                0.0,
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            );
        }

        graph.wait().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn conflicting_writes_run_in_order() {
        let graph = TaskGraph::new(8).unwrap();
        let buf = Buffer::new(1);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            graph.spawn(
                vec![Arc::new(buf.clone())],
                vec![AccessMode::Write],
                format!("writer-{i}"),
                0.0,
                move || order.lock().push(i),
            );
        }

        graph.wait().unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn scalars_never_serialize_tasks() {
        let graph = TaskGraph::new(8).unwrap();
        let scalar = Scalar(7i32);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            graph.spawn(
                vec![Arc::new(scalar)],
                vec![AccessMode::Read],
                format!("reader-{i}"),
                0.0,
                move || order.lock().push(i),
            );
        }

        graph.wait().unwrap();
        assert_eq!(order.lock().len(), 3);
    }

    #[test]
    fn force_sequential_runs_inline() {
        switches::force_sequential(true);
        let graph = TaskGraph::new(8).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        graph.spawn(Vec::new(), Vec::new(), "inline", 0.0, move || {
            ran2.store(true, Ordering::SeqCst);
        });
        assert!(ran.load(Ordering::SeqCst));
        switches::force_sequential(false);
    }

    #[test]
    fn empty_recovers_from_wedged_state() {
        let graph = TaskGraph::new(8).unwrap();
        graph.wedged.store(true, Ordering::SeqCst);
        assert!(matches!(graph.wait(), Err(GraphError::Wedged)));
        graph.empty();
        assert!(graph.wait().is_ok());
    }

    #[test]
    fn task_wait_blocks_until_done_without_consuming_the_handle() {
        let graph = TaskGraph::new(8).unwrap();
        let task = graph.spawn(Vec::new(), Vec::new(), "slow", 0.0, || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            7
        });

        task.wait().unwrap();
        assert!(task.is_done());
        assert_eq!(task.fetch().unwrap(), 7);
    }

    #[test]
    fn is_done_is_false_before_wait_and_true_after() {
        let graph = TaskGraph::new(8).unwrap();
        let buf = Buffer::new(1);
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let task = graph.spawn(
            vec![Arc::new(buf)],
            vec![AccessMode::Write],
            "gated",
            0.0,
            move || {
                release_rx.recv().unwrap();
            },
        );

        // The task's closure is blocked on the channel, so it can't have
        // finished yet.
        assert!(!task.is_done());
        release_tx.send(()).unwrap();

        task.wait().unwrap();
        assert!(task.is_done());
    }

    #[test]
    fn a_task_reference_in_the_data_list_becomes_a_direct_predecessor() {
        let graph = TaskGraph::new(8).unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let order1 = Arc::clone(&order);
        let first = graph.spawn(Vec::new(), Vec::new(), "first", 0.0, move || {
            order1.lock().push("first")
        });

        let order2 = Arc::clone(&order);
        // `second` declares no ordinary data overlap with `first`, only a
        // reference to it, and must still wait.
        graph.spawn(
            vec![first.as_dependency()],
            vec![AccessMode::Read],
            "second",
            0.0,
            move || order2.lock().push("second"),
        );

        graph.wait().unwrap();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn a_failed_predecessor_poisons_its_successor_instead_of_running_it() {
        let graph = TaskGraph::new(8).unwrap();
        let buf = Buffer::new(1);
        let second_ran = Arc::new(AtomicBool::new(false));

        graph.spawn::<(), _>(
            vec![Arc::new(buf.clone())],
            vec![AccessMode::Write],
            "panics",
            0.0,
            move || panic!("boom"),
        );

        let second_ran2 = Arc::clone(&second_ran);
        let second = graph.spawn(
            vec![Arc::new(buf)],
            vec![AccessMode::Write],
            "should-not-run",
            0.0,
            move || second_ran2.store(true, Ordering::SeqCst),
        );

        graph.wait().unwrap();
        assert!(!second_ran.load(Ordering::SeqCst));
        assert!(matches!(
            second.fetch(),
            Err(TaskError::PredecessorFailed { .. })
        ));
    }
}
