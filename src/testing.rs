//! Test-isolation helpers. Every global this crate keeps — the tag counter, the
//! runtime switches, the worker-id counter, the overlap registry's
//! warned-pairs cache — is process-wide, so tests that run in the same
//! binary (the default for `cargo test`) can bleed state into each other
//! unless they reset it first.

use crate::{graph, log_info, overlap, switches, tag};

/// Resets every process-wide (or, for the active-graph stack,
/// per-thread) global back to its startup state: the tag counter, the
/// runtime switches, the worker-id counter, the overlap-registry's
/// one-shot warning cache, and the calling thread's
/// [`crate::with_taskgraph`] stack. Does not reset any custom
/// `overlap::register` specializations a test installed, since those are
/// additive and harmless across tests.
///
/// Only exposed outside `#[cfg(test)]` builds behind the `testing`
/// feature, for integration tests in `tests/` that can't reach
/// `pub(crate)` items directly.
#[cfg(any(test, feature = "testing"))]
pub fn reset_globals() {
    tag::reset();
    switches::reset();
    log_info::reset();
    overlap::reset_warnings();
    graph::reset_active_graph();
}
