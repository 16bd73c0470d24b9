//! Dependency inference: given a new task's declared data regions and
//! access modes, find the minimal set of already-inserted tasks it must
//! wait on.
//!
//! Scans already-inserted tasks newest-first. A conflicting task becomes
//! a direct predecessor; its own predecessors are then added to a scratch
//! "already covered" set so the scan doesn't also add edges to tasks that
//! are already transitively reachable through that predecessor. This
//! keeps the DAG transitively reduced without a separate reduction pass.

use std::collections::HashSet;

use indexmap::IndexMap;
use itertools::iproduct;

use crate::dag::Node;
use crate::overlap;
use crate::region::{AccessMode, Region, TaskRef};
use crate::switches;
use crate::tag::Tag;
use std::sync::Arc;

/// Two accesses conflict iff their regions overlap and at least one of
/// them is a write. [`TaskRef`] entries are excluded: they never go
/// through [`overlap::overlaps`], since they're handled as unconditional
/// explicit predecessors by [`infer_predecessors`] instead.
fn accesses_conflict(
    a_data: &[Arc<dyn Region>],
    a_modes: &[AccessMode],
    b_data: &[Arc<dyn Region>],
    b_modes: &[AccessMode],
) -> bool {
    iproduct!(a_data.iter().zip(a_modes), b_data.iter().zip(b_modes)).any(
        |((region_a, mode_a), (region_b, mode_b))| {
            if region_a.as_any().is::<TaskRef>() || region_b.as_any().is::<TaskRef>() {
                return false;
            }
            (mode_a.is_write() || mode_b.is_write()) && overlap::overlaps(&**region_a, &**region_b)
        },
    )
}

/// Finds the predecessors a task with the given data/modes must wait on,
/// scanning `nodes` (already-inserted tasks) from most to least recent.
///
/// Any [`TaskRef`] in `data` — the nested-dependency case where this
/// task's declared data includes a reference to another, still-live task
/// — becomes a direct predecessor unconditionally, before the
/// conflict-based scan runs, so its transitive ancestors are covered the
/// same way a conflict-discovered predecessor's would be.
pub(crate) fn infer_predecessors(
    nodes: &IndexMap<Tag, Node>,
    data: &[Arc<dyn Region>],
    modes: &[AccessMode],
) -> Vec<Tag> {
    if switches::is_force_linear_dag() {
        return nodes.keys().next_back().copied().into_iter().collect();
    }

    let mut predecessors = Vec::new();
    let mut covered: HashSet<Tag> = HashSet::new();

    for region in data {
        if let Some(task_ref) = region.as_any().downcast_ref::<TaskRef>() {
            let referenced = task_ref.0;
            if covered.contains(&referenced) {
                continue;
            }
            if let Some(node) = nodes.get(&referenced) {
                predecessors.push(referenced);
                covered.insert(referenced);
                covered.extend(node.inbound.iter().copied());
            }
        }
    }

    for (&tag, node) in nodes.iter().rev() {
        if covered.contains(&tag) {
            covered.extend(node.inbound.iter().copied());
            continue;
        }
        if accesses_conflict(&node.state.data, &node.state.modes, data, modes) {
            predecessors.push(tag);
            covered.extend(node.inbound.iter().copied());
        }
    }

    predecessors
}
