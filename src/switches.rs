//! Global runtime switches.
//!
//! These degrade the runtime to debugging forms: fully sequential
//! execution, a linear dependency graph, disabled tracing, or disabled
//! panic interception. All are plain process-wide booleans — there's no
//! per-graph override.

use std::sync::atomic::{AtomicBool, Ordering};

static FORCE_SEQUENTIAL: AtomicBool = AtomicBool::new(false);
static FORCE_LINEAR_DAG: AtomicBool = AtomicBool::new(false);
static LOG_ENABLED: AtomicBool = AtomicBool::new(cfg!(feature = "logging"));
static DEBUG_MODE: AtomicBool = AtomicBool::new(false);

/// When `true`, [`crate::TaskGraph::spawn`] degenerates to synchronous
/// execution of the closure on the calling thread; no task is created and
/// nothing is inserted into the DAG.
pub fn force_sequential(enabled: bool) {
    FORCE_SEQUENTIAL.store(enabled, Ordering::SeqCst);
}

pub(crate) fn is_force_sequential() -> bool {
    FORCE_SEQUENTIAL.load(Ordering::SeqCst)
}

/// When `true`, the dependency engine skips conflict detection entirely
/// and adds only the edge `(j-1) -> j` for each newly inserted task `j`.
pub fn force_linear_dag(enabled: bool) {
    FORCE_LINEAR_DAG.store(enabled, Ordering::SeqCst);
}

pub(crate) fn is_force_linear_dag() -> bool {
    FORCE_LINEAR_DAG.load(Ordering::SeqCst)
}

/// Toggles whether `TaskLog`/`InsertionLog` entries are appended. A no-op
/// (and always reports `false`) when the crate is built without the
/// `logging` feature, so the instrumentation call sites can be compiled
/// out entirely.
pub fn log_enabled(enabled: bool) {
    if cfg!(feature = "logging") {
        LOG_ENABLED.store(enabled, Ordering::SeqCst);
    }
}

pub(crate) fn is_log_enabled() -> bool {
    cfg!(feature = "logging") && LOG_ENABLED.load(Ordering::SeqCst)
}

/// Toggles closure-panic interception. When `true`, a panicking closure is
/// caught at the task-body boundary with `catch_unwind`, its context (tag,
/// label) is logged, and it's converted into `TaskError::Panicked` instead
/// of unwinding the blocking-pool thread. When `false`, the blocking pool's
/// own panic handling converts the panic into the same error — the switch
/// only controls whether the context gets logged on the way.
pub fn debug_mode(enabled: bool) {
    DEBUG_MODE.store(enabled, Ordering::SeqCst);
}

pub(crate) fn is_debug_mode() -> bool {
    DEBUG_MODE.load(Ordering::SeqCst)
}

pub(crate) fn reset() {
    FORCE_SEQUENTIAL.store(false, Ordering::SeqCst);
    FORCE_LINEAR_DAG.store(false, Ordering::SeqCst);
    LOG_ENABLED.store(cfg!(feature = "logging"), Ordering::SeqCst);
    DEBUG_MODE.store(false, Ordering::SeqCst);
}
