//! The bounded-capacity task DAG.
//!
//! A mapping `tag -> (in-set, out-set)` preserving insertion order so it
//! can be walked in reverse for dependency inference. Acyclicity
//! holds by construction: every edge this module adds goes from a lower
//! tag to a higher tag, and nothing here ever adds an edge the other way.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};

use crate::error::ConfigError;
use crate::tag::Tag;
use crate::task::TaskState;

/// One node's adjacency in the DAG, plus the shared task state dependency
/// inference and the running task body both need.
pub(crate) struct Node {
    pub(crate) state: Arc<TaskState>,
    pub(crate) inbound: HashSet<Tag>,
    pub(crate) outbound: HashSet<Tag>,
    /// Set once the inner host-runtime task has been spawned (it doesn't
    /// exist yet at the point `insert_new` builds this node). Used only by
    /// `TaskGraph::empty()`'s emergency reset to cancel whatever is still
    /// pending.
    pub(crate) abort: Option<tokio::task::AbortHandle>,
}

struct Inner {
    nodes: IndexMap<Tag, Node>,
    capacity: usize,
}

/// Bounded-capacity directed acyclic graph of live tasks.
pub(crate) struct Dag {
    inner: Mutex<Inner>,
    capacity_available: Condvar,
    became_empty: Condvar,
}

impl Dag {
    pub(crate) fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity(capacity));
        }
        Ok(Dag {
            inner: Mutex::new(Inner {
                nodes: IndexMap::new(),
                capacity,
            }),
            capacity_available: Condvar::new(),
            became_empty: Condvar::new(),
        })
    }

    /// Builds and inserts a node while holding the DAG lock, so tag
    /// allocation, dependency inference, and edge insertion are all
    /// atomic with respect to every other insertion. This also guarantees insertion order tracks
    /// tag order exactly, which [`crate::dependency`]'s reverse scan and
    /// [`crate::critical_path`]'s topological walk both depend on.
    ///
    /// `build` receives the current node map and must return the new
    /// task's state (with its tag already assigned from it) plus the
    /// predecessor tags discovered for it. Returns the new state together
    /// with the *states* (not just tags) of those predecessors, still live
    /// in the map at this point, so the caller can await each
    /// predecessor's own outcome directly rather than a count.
    ///
    /// Also returns how long this call spent blocked waiting for capacity
    /// to free up — the `gc_time` recorded on an `InsertionLog`, since the
    /// only thing that frees capacity is the cleanup worker removing a
    /// finished node.
    pub(crate) fn insert_new<F>(&self, build: F) -> (Arc<TaskState>, Vec<Arc<TaskState>>, std::time::Duration)
    where
        F: FnOnce(&IndexMap<Tag, Node>) -> (Arc<TaskState>, Vec<Tag>),
    {
        let wait_start = std::time::Instant::now();
        let mut inner = self.inner.lock();
        while inner.nodes.len() >= inner.capacity {
            self.capacity_available.wait(&mut inner);
        }
        let gc_time = wait_start.elapsed();

        let (state, predecessor_tags) = build(&inner.nodes);
        let tag = state.tag;
        let predecessor_states: Vec<Arc<TaskState>> = predecessor_tags
            .iter()
            .filter_map(|t| inner.nodes.get(t).map(|n| Arc::clone(&n.state)))
            .collect();

        inner.nodes.insert(
            tag,
            Node {
                state: Arc::clone(&state),
                inbound: HashSet::new(),
                outbound: HashSet::new(),
                abort: None,
            },
        );
        for &pred in &predecessor_tags {
            Self::add_edge_locked(&mut inner.nodes, pred, tag);
        }
        (state, predecessor_states, gc_time)
    }

    /// Records the abort handle for `tag`'s inner host-runtime task, once
    /// it has been spawned. A no-op if `tag` was already removed (it can't
    /// have been, in practice, since the task hasn't even started running
    /// yet, but a racing `empty!()` could have cleared the DAG first).
    pub(crate) fn set_abort_handle(&self, tag: Tag, abort: tokio::task::AbortHandle) {
        let mut inner = self.inner.lock();
        if let Some(node) = inner.nodes.get_mut(&tag) {
            node.abort = Some(abort);
        } else {
            abort.abort();
        }
    }

    fn add_edge_locked(nodes: &mut IndexMap<Tag, Node>, i: Tag, j: Tag) {
        debug_assert!(i < j, "DAG edges must go from a lower tag to a higher tag");
        if let Some(node) = nodes.get_mut(&j) {
            node.inbound.insert(i);
        }
        if let Some(node) = nodes.get_mut(&i) {
            node.outbound.insert(j);
        }
    }

    /// Removes `j`, which must have no remaining predecessors. Erases `j`
    /// from every former successor's inbound set (for accurate
    /// `num_edges`/`live_tasks` introspection) and signals capacity and/or
    /// empty as appropriate. Waking a successor whose last predecessor just
    /// finished is not this module's job: the successor's task body awaits
    /// that predecessor's own [`TaskState::outcome`] directly, independent
    /// of when (or whether) this removal runs.
    pub(crate) fn remove(&self, j: Tag) {
        let mut inner = self.inner.lock();
        let was_full = inner.nodes.len() >= inner.capacity;

        let outbound = match inner.nodes.get(&j) {
            Some(node) => {
                if !node.inbound.is_empty() {
                    log::warn!(
                        "removing task {} which still has {} live predecessor(s); \
                         proceeding per reference behavior",
                        j,
                        node.inbound.len()
                    );
                }
                node.outbound.clone()
            }
            None => return,
        };

        inner.nodes.shift_remove(&j);
        for successor in outbound {
            if let Some(node) = inner.nodes.get_mut(&successor) {
                node.inbound.remove(&j);
            }
        }

        if was_full {
            self.capacity_available.notify_one();
        }
        if inner.nodes.is_empty() {
            self.became_empty.notify_all();
        }
    }

    /// Blocks until the DAG holds no live nodes, or `wedged` becomes
    /// `true` — e.g. because the cleanup worker that drives removals died.
    /// Returns `false` in the latter case.
    pub(crate) fn wait_empty_or_wedged(&self, wedged: &std::sync::atomic::AtomicBool) -> bool {
        let mut inner = self.inner.lock();
        while !inner.nodes.is_empty() {
            if wedged.load(std::sync::atomic::Ordering::SeqCst) {
                return false;
            }
            self.became_empty.wait(&mut inner);
        }
        true
    }

    /// Wakes every thread blocked in [`Dag::wait_empty_or_wedged`] so it
    /// can recheck the `wedged` flag even though the node set isn't empty.
    pub(crate) fn notify_wedged(&self) {
        let _inner = self.inner.lock();
        self.became_empty.notify_all();
    }

    pub(crate) fn resize(&self, new_capacity: usize) -> Result<(), ConfigError> {
        if new_capacity == 0 {
            return Err(ConfigError::InvalidCapacity(new_capacity));
        }
        let mut inner = self.inner.lock();
        if new_capacity < inner.nodes.len() {
            return Err(ConfigError::ResizeBelowCurrentSize {
                current: inner.nodes.len(),
                new: new_capacity,
            });
        }
        let grew = new_capacity > inner.capacity;
        inner.capacity = new_capacity;
        drop(inner);
        if grew {
            self.capacity_available.notify_all();
        }
        Ok(())
    }

    pub(crate) fn num_nodes(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub(crate) fn num_edges(&self) -> usize {
        self.inner
            .lock()
            .nodes
            .values()
            .map(|n| n.outbound.len())
            .sum()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Snapshot of every live task as `(tag, label, predecessor tags)`,
    /// for diagnostics and visualization front-ends.
    pub(crate) fn live_tasks(&self) -> Vec<(Tag, String, Vec<Tag>)> {
        self.inner
            .lock()
            .nodes
            .values()
            .map(|n| {
                (
                    n.state.tag,
                    n.state.label.clone(),
                    n.inbound.iter().copied().collect(),
                )
            })
            .collect()
    }

    /// Drains every live node without respecting `in`-set invariants and
    /// aborts whatever inner host-runtime task each one has spawned so far
    /// — tasks not yet started are cancelled outright, running ones are
    /// asked to stop at their next suspension point. For use only by
    /// `TaskGraph::empty!()`'s emergency reset.
    pub(crate) fn clear(&self) -> Vec<Arc<TaskState>> {
        let mut inner = self.inner.lock();
        let drained: Vec<_> = inner
            .nodes
            .drain(..)
            .map(|(_, n)| {
                if let Some(abort) = n.abort {
                    abort.abort();
                }
                n.state
            })
            .collect();
        self.capacity_available.notify_all();
        self.became_empty.notify_all();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::AccessMode;

    fn state(tag: Tag) -> Arc<TaskState> {
        TaskState::new_for_test(tag, Vec::new(), Vec::<AccessMode>::new(), String::new(), 0.0)
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(Dag::new(0).is_err());
    }

    #[test]
    fn insert_and_remove_track_node_count() {
        let dag = Dag::new(10).unwrap();
        let t0 = Tag::for_test(0);
        dag.insert_new(|_| (state(t0), Vec::new()));
        assert_eq!(dag.num_nodes(), 1);
        dag.remove(t0);
        assert_eq!(dag.num_nodes(), 0);
    }

    #[test]
    fn resize_below_current_size_errors() {
        let dag = Dag::new(10).unwrap();
        dag.insert_new(|_| (state(Tag::for_test(0)), Vec::new()));
        assert!(dag.resize(0).is_err());
        assert!(matches!(
            dag.resize(0),
            Err(ConfigError::InvalidCapacity(0))
        ));
    }

    #[test]
    fn edges_only_go_from_lower_to_higher_tag() {
        let dag = Dag::new(10).unwrap();
        let t0 = Tag::for_test(0);
        let t1 = Tag::for_test(1);
        dag.insert_new(|_| (state(t0), Vec::new()));
        dag.insert_new(|_| (state(t1), vec![t0]));
        let live = dag.live_tasks();
        let node1 = live.iter().find(|(tag, _, _)| *tag == t1).unwrap();
        assert_eq!(node1.2, vec![t0]);
    }
}
