//! Critical-path analysis: the longest weighted chain of mutually
//! dependent tasks recorded in a [`LogInfo`], found with a topological
//! dynamic program (tag order is a valid topological order, since every
//! edge runs from a lower tag to a higher one) and a backtrace from the
//! entry with the largest accumulated weight.
//!
//! This operates on the *recorded trace*, not the live DAG: by the time a
//! computation is interesting enough to want a critical path for, the
//! cleanup worker has usually already removed its tasks from the DAG.
//! Each [`crate::log_info::TaskLog`] carries the predecessor snapshot
//! taken at insertion time for exactly this reason.

use std::collections::HashMap;

use crate::log_info::LogInfo;
use crate::tag::Tag;

/// One task's position on the longest dependency chain, in back-traced
/// order: the first entry is the chain's endpoint (the arg-max task), the
/// last is its earliest ancestor.
#[derive(Debug, Clone, PartialEq)]
pub struct CriticalPathEntry {
    pub tag: Tag,
    pub label: String,
    /// This task's own duration, `t_finish - t_start`, in seconds.
    pub weight: f64,
}

/// The longest weighted chain of dependent tasks recorded so far. Empty if
/// nothing has been recorded (e.g. logging was disabled, or nothing has
/// finished yet).
pub(crate) fn longest_path(log: &LogInfo) -> Vec<CriticalPathEntry> {
    let mut entries = log.task_logs();
    entries.sort_by_key(|e| e.tag);
    if entries.is_empty() {
        return Vec::new();
    }

    let mut best: HashMap<Tag, f64> = HashMap::with_capacity(entries.len());
    let mut via: HashMap<Tag, Option<Tag>> = HashMap::with_capacity(entries.len());
    let mut weight_of: HashMap<Tag, f64> = HashMap::with_capacity(entries.len());
    let mut label_of: HashMap<Tag, String> = HashMap::with_capacity(entries.len());

    for entry in &entries {
        let weight = entry.t_finish.saturating_sub(entry.t_start) as f64 / 1_000_000_000.0;
        weight_of.insert(entry.tag, weight);
        label_of.insert(entry.tag, entry.label.clone());

        let best_predecessor = entry
            .predecessors
            .iter()
            .filter_map(|p| best.get(p).map(|b| (*b, *p)))
            .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        match best_predecessor {
            Some((predecessor_best, predecessor)) => {
                best.insert(entry.tag, predecessor_best + weight);
                via.insert(entry.tag, Some(predecessor));
            }
            None => {
                best.insert(entry.tag, weight);
                via.insert(entry.tag, None);
            }
        }
    }

    let end = *best
        .iter()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(tag, _)| tag)
        .expect("best is non-empty since entries is non-empty");

    let mut path = vec![end];
    let mut cur = end;
    while let Some(Some(predecessor)) = via.get(&cur) {
        path.push(*predecessor);
        cur = *predecessor;
    }

    path.into_iter()
        .map(|tag| CriticalPathEntry {
            tag,
            label: label_of.get(&tag).cloned().unwrap_or_default(),
            weight: *weight_of.get(&tag).unwrap_or(&0.0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(log: &LogInfo, tag: Tag, predecessors: Vec<Tag>, t_start: u64, t_finish: u64) {
        log.record_task(tag, String::new(), predecessors, t_start, t_finish);
    }

    #[test]
    fn empty_log_has_no_critical_path() {
        crate::switches::log_enabled(true);
        let log = LogInfo::new(1);
        assert!(longest_path(&log).is_empty());
    }

    #[test]
    fn single_chain_is_its_own_critical_path_ordered_latest_first() {
        crate::switches::log_enabled(true);
        let log = LogInfo::new(1);
        let (t0, t1, t2) = (Tag::for_test(0), Tag::for_test(1), Tag::for_test(2));
        record(&log, t0, vec![], 0, 10);
        record(&log, t1, vec![t0], 10, 20);
        record(&log, t2, vec![t1], 20, 30);

        let path: Vec<Tag> = longest_path(&log).into_iter().map(|e| e.tag).collect();
        assert_eq!(path, vec![t2, t1, t0]);
    }

    #[test]
    fn diamond_picks_the_heavier_branch_by_weighted_duration() {
        crate::switches::log_enabled(true);
        let log = LogInfo::new(1);
        let (t1, t2, t3, t4, t5) = (
            Tag::for_test(1),
            Tag::for_test(2),
            Tag::for_test(3),
            Tag::for_test(4),
            Tag::for_test(5),
        );
        // Five tasks, weights 0.01s each, dependencies 1->2->3->5, 4->5.
        // Equal per-task weights, so the four-hop chain beats the two-hop
        // one.
        let ns = 10_000_000u64; // 0.01s
        record(&log, t1, vec![], 0, ns);
        record(&log, t2, vec![t1], ns, 2 * ns);
        record(&log, t3, vec![t2], 2 * ns, 3 * ns);
        record(&log, t4, vec![], 0, ns);
        record(&log, t5, vec![t3, t4], 3 * ns, 4 * ns);

        let path: Vec<Tag> = longest_path(&log).into_iter().map(|e| e.tag).collect();
        assert_eq!(path, vec![t5, t3, t2, t1]);
    }

    #[test]
    fn unequal_weights_can_make_a_shorter_chain_win() {
        crate::switches::log_enabled(true);
        let log = LogInfo::new(1);
        let (t0, t1, t2, t3) = (
            Tag::for_test(0),
            Tag::for_test(1),
            Tag::for_test(2),
            Tag::for_test(3),
        );
        // t0 -> t2 is a single very slow task; t0 -> t1 -> t3 is two fast
        // tasks whose combined duration is still shorter.
        record(&log, t0, vec![], 0, 1);
        record(&log, t1, vec![t0], 1, 2);
        record(&log, t2, vec![t0], 1, 1_000);
        record(&log, t3, vec![t1], 2, 3);

        let path: Vec<Tag> = longest_path(&log).into_iter().map(|e| e.tag).collect();
        assert_eq!(path, vec![t2, t0]);
    }
}
