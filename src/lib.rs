//! # Dataflow task graphs for shared-memory multicore CPUs
//!
//! Instead of hand-rolling synchronization between the pieces of a
//! parallel computation, write ordinary-looking sequential code and
//! declare, at each step, which data a task reads and/or writes. A
//! [`TaskGraph`] infers the dependencies between tasks from those
//! declarations and runs everything else concurrently.
//!
//! ## Code example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dataflow_tasks::{AccessMode, Buffer, TaskGraph};
//!
//! let graph = TaskGraph::new(64).unwrap();
//! let a = Buffer::new(1024);
//! let b = Buffer::new(1024);
//!
//! // Two writers to disjoint buffers run concurrently...
//! graph.spawn(vec![Arc::new(a.clone())], vec![AccessMode::Write], "fill a", 0.0, || {});
//! graph.spawn(vec![Arc::new(b.clone())], vec![AccessMode::Write], "fill b", 0.0, || {});
//! // ...but this task, which reads both, waits for them first.
//! graph.spawn(
//!     vec![Arc::new(a), Arc::new(b)],
//!     vec![AccessMode::Read, AccessMode::Read],
//!     "combine",
//!     0.0,
//!     || {},
//! );
//!
//! graph.wait().unwrap();
//! ```
//!
//! ## Data model
//!
//! Every [`Task`] declares the [`Region`]s it touches and, for each, an
//! [`AccessMode`]. Two accesses conflict when their regions
//! [`overlap`][overlaps] and at least one of them is a write;
//! [`TaskGraph::spawn`] scans tasks already in the graph, newest first,
//! and adds an edge to the closest conflicting task for each conflict —
//! closer conflicts make farther ones transitively reachable, so the DAG
//! never grows edges it doesn't need.
//!
//! A task becomes runnable once every predecessor it was given at
//! insertion has finished — it awaits each of their outcomes directly, so
//! a failed predecessor poisons it instead of letting it run. A single
//! cleanup worker thread drains a channel of finished tasks and removes
//! them from the DAG, freeing capacity for new insertions. This crate does
//! not implement its own thread pool: task bodies run on a shared
//! [`tokio`] runtime, with the caller-supplied closure itself dispatched
//! onto the blocking pool so synchronous, CPU-bound work doesn't stall the
//! async scheduler.
//!
//! ## Runtime switches
//!
//! [`switches::force_sequential`], [`switches::force_linear_dag`],
//! [`switches::log_enabled`], and [`switches::debug_mode`] degrade the
//! runtime to simpler, more debuggable forms; see their docs.
//!
//! ## Nested graphs
//!
//! More than one [`TaskGraph`] can be live at once — a task's closure may
//! build and wait on a graph of its own. [`with_taskgraph`] installs a
//! graph as the calling thread's active one for the duration of a call,
//! restoring whatever was active before (including across panics) when it
//! returns; [`active_taskgraph`] reads it back. Cross-graph edges are
//! never inferred — nesting is plain closure capture plus this bookkeeping
//! for code that wants to find "the current graph" without being handed it
//! explicitly — so a task body that spawns an inner graph must still
//! `wait()` on it itself before returning.

mod clock;
mod critical_path;
mod dag;
mod dependency;
mod error;
mod graph;
mod log_info;
mod overlap;
mod region;
mod runtime;
mod tag;
mod task;

pub mod switches;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use critical_path::CriticalPathEntry;
pub use error::{ConfigError, GraphError, TaskError};
pub use graph::{active_taskgraph, with_taskgraph, GraphStats, TaskGraph};
pub use log_info::{InsertionLog, LogInfo, TaskLog};
pub use overlap::{overlaps, register as register_overlap, OverlapRegistry};
pub use region::{AccessMode, Adjoint, AxisRange, Buffer, BufferId, Region, Scalar, Triangular, View};
pub use tag::Tag;
pub use task::Task;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fork_join_waits_for_every_writer_before_the_reader() {
        testing::reset_globals();
        let graph = TaskGraph::new(16).unwrap();
        let buf = Buffer::new(4);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = Arc::clone(&seen);
            graph.spawn(
                vec![Arc::new(buf.clone())],
                vec![AccessMode::Write],
                format!("writer-{i}"),
                0.0,
                move || seen.lock().push(format!("w{i}")),
            );
        }

        let seen2 = Arc::clone(&seen);
        graph.spawn(
            vec![Arc::new(buf)],
            vec![AccessMode::Read],
            "reader",
            0.0,
            move || seen2.lock().push("r".to_string()),
        );

        graph.wait().unwrap();
        let seen = seen.lock();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen.last().unwrap(), "r");
    }

    #[test]
    fn disjoint_views_of_the_same_buffer_do_not_conflict() {
        testing::reset_globals();
        let graph = TaskGraph::new(16).unwrap();
        let buf = Buffer::new(100);
        let left = buf.view(vec![AxisRange::Range(0, 49)]);
        let right = buf.view(vec![AxisRange::Range(50, 99)]);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let order1 = Arc::clone(&order);
        graph.spawn(vec![Arc::new(left)], vec![AccessMode::Write], "left", 0.0, move || {
            order1.lock().push("left")
        });
        let order2 = Arc::clone(&order);
        graph.spawn(vec![Arc::new(right)], vec![AccessMode::Write], "right", 0.0, move || {
            order2.lock().push("right")
        });

        graph.wait().unwrap();
        assert_eq!(order.lock().len(), 2);
    }

    #[test]
    fn resize_accepts_growth_and_rejects_shrink_below_live_count() {
        testing::reset_globals();
        let graph = TaskGraph::new(1).unwrap();
        assert!(graph.resize(8).is_ok());
        let buf = Buffer::new(1);
        graph.spawn(vec![Arc::new(buf)], vec![AccessMode::Write], "t", 0.0, || {
            std::thread::sleep(std::time::Duration::from_millis(10));
        });
        assert!(graph.resize(0).is_err());
        graph.wait().unwrap();
    }
}
