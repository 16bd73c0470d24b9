//! The host concurrency runtime: a single process-wide multi-threaded
//! [`tokio`] runtime that every [`crate::TaskGraph`] dispatches onto. The crate
//! deliberately does not implement its own worker pool; it schedules
//! async task bodies onto this runtime and relies on
//! [`tokio::task::spawn_blocking`] for the arbitrary, possibly
//! CPU-bound, synchronous closures users supply.

use std::sync::OnceLock;

use tokio::runtime::{Handle, Runtime};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .thread_name("dataflow-tasks-worker")
            .enable_time()
            .build()
            .expect("failed to start the dataflow-tasks host runtime")
    })
}

/// A handle to the process-wide runtime, cheap to clone and usable from
/// any thread, including from within the runtime itself.
pub(crate) fn handle() -> Handle {
    runtime().handle().clone()
}

/// Number of worker threads backing the runtime, used to size per-worker
/// log storage.
pub(crate) fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
