//! Per-worker trace logs.
//!
//! Every worker thread gets its own `TaskLog`/`InsertionLog` vector so
//! recording a trace entry never contends with another worker. Tokio
//! doesn't expose its internal worker index, so workers claim one lazily
//! from a global counter the first time they touch the logs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::switches;
use crate::tag::Tag;

thread_local! {
    static WORKER_ID: std::cell::Cell<Option<usize>> = std::cell::Cell::new(None);
}

static NEXT_WORKER_ID: AtomicUsize = AtomicUsize::new(0);

fn worker_id() -> usize {
    WORKER_ID.with(|cell| {
        if let Some(id) = cell.get() {
            return id;
        }
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        cell.set(Some(id));
        id
    })
}

/// One record of a task's execution, attributed to the worker that ran
/// it. Carries the predecessor snapshot taken at insertion time so the
/// dependency graph can be reconstructed post-mortem — by the time a task
/// finishes and this log entry is appended, the cleanup worker may already
/// have removed it (and even its predecessors) from the live DAG.
#[derive(Debug, Clone)]
pub struct TaskLog {
    pub tag: Tag,
    pub label: String,
    pub worker: usize,
    pub predecessors: Vec<Tag>,
    /// Monotonic nanoseconds at which the closure started running.
    pub t_start: u64,
    /// Monotonic nanoseconds at which the closure finished (successfully
    /// or not).
    pub t_finish: u64,
}

/// One record of a task's insertion into the DAG: the wall-clock extent of
/// `TaskGraph::spawn`'s call into `Dag::insert_new`, split out into the
/// portion spent blocked waiting for capacity (`gc_time` — the only thing
/// that frees capacity is the cleanup worker removing a finished node) vs.
/// the rest (dependency inference under the DAG lock).
#[derive(Debug, Clone)]
pub struct InsertionLog {
    pub task_id: Tag,
    pub worker: usize,
    pub t_start: u64,
    pub t_finish: u64,
    pub gc_time: std::time::Duration,
}

struct Shard {
    tasks: Vec<TaskLog>,
    insertions: Vec<InsertionLog>,
}

impl Shard {
    fn new() -> Self {
        Shard {
            tasks: Vec::new(),
            insertions: Vec::new(),
        }
    }
}

/// Collected trace data for one [`crate::TaskGraph`], sharded by worker
/// thread to avoid contention.
pub struct LogInfo {
    shards: Vec<Mutex<Shard>>,
}

impl LogInfo {
    pub(crate) fn new(capacity_hint: usize) -> Self {
        LogInfo {
            shards: (0..capacity_hint.max(1)).map(|_| Mutex::new(Shard::new())).collect(),
        }
    }

    fn shard_for_current_worker(&self) -> &Mutex<Shard> {
        let id = worker_id() % self.shards.len();
        &self.shards[id]
    }

    pub(crate) fn record_task(
        &self,
        tag: Tag,
        label: String,
        predecessors: Vec<Tag>,
        t_start: u64,
        t_finish: u64,
    ) {
        if !switches::is_log_enabled() {
            return;
        }
        let worker = worker_id();
        self.shard_for_current_worker().lock().tasks.push(TaskLog {
            tag,
            label,
            worker,
            predecessors,
            t_start,
            t_finish,
        });
    }

    pub(crate) fn record_insertion(
        &self,
        task_id: Tag,
        t_start: u64,
        t_finish: u64,
        gc_time: std::time::Duration,
    ) {
        if !switches::is_log_enabled() {
            return;
        }
        let worker = worker_id();
        self.shard_for_current_worker().lock().insertions.push(InsertionLog {
            task_id,
            worker,
            t_start,
            t_finish,
            gc_time,
        });
    }

    /// All recorded task-execution entries across every worker, in no
    /// particular cross-worker order.
    pub fn task_logs(&self) -> Vec<TaskLog> {
        self.shards.iter().flat_map(|s| s.lock().tasks.clone()).collect()
    }

    /// All recorded insertion entries across every worker.
    pub fn insertion_logs(&self) -> Vec<InsertionLog> {
        self.shards.iter().flat_map(|s| s.lock().insertions.clone()).collect()
    }

    pub(crate) fn clear(&self) {
        for shard in &self.shards {
            let mut shard = shard.lock();
            shard.tasks.clear();
            shard.insertions.clear();
        }
    }
}

/// Resets the global worker-id counter. Only meaningful for test
/// isolation; see [`crate::testing::reset_globals`]. Existing
/// thread-local assignments on the calling thread are unaffected.
pub(crate) fn reset() {
    NEXT_WORKER_ID.store(0, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_retrievable_when_logging_enabled() {
        switches::log_enabled(true);
        let log = Arc::new(LogInfo::new(4));
        log.record_task(Tag::for_test(0), "a".to_string(), vec![], 0, 10);
        log.record_insertion(Tag::for_test(1), 0, 5, std::time::Duration::ZERO);
        assert_eq!(log.task_logs().len(), 1);
        assert_eq!(log.insertion_logs().len(), 1);
    }

    #[test]
    fn records_are_suppressed_when_logging_disabled() {
        switches::log_enabled(false);
        let log = LogInfo::new(4);
        log.record_task(Tag::for_test(0), "a".to_string(), vec![], 0, 10);
        assert!(log.task_logs().is_empty());
        switches::log_enabled(cfg!(feature = "logging"));
    }
}
