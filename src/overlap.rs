//! The memory-overlap registry.
//!
//! `overlaps(a, b)` is a two-argument multimethod: a table keyed by the
//! pair of dynamic types of its operands, with an explicit fallback for
//! any pair nobody registered a specialization for.

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::region::{Adjoint, Buffer, Region, Triangular, View};

// A boxed closure rather than a bare function pointer: `register` takes a
// plain `fn(&A, &B) -> bool` from the caller, but the dispatch table needs
// to pair it with the downcast for the *erased* `(A, B)` pair, which means
// capturing `f` — something a bare fn pointer can't do.
type OverlapFn = Arc<dyn Fn(&dyn Region, &dyn Region) -> bool + Send + Sync>;

/// An extensible, symmetric relation over region types.
pub struct OverlapRegistry {
    table: std::collections::HashMap<(TypeId, TypeId), OverlapFn>,
}

impl OverlapRegistry {
    fn new() -> Self {
        let mut registry = OverlapRegistry {
            table: std::collections::HashMap::new(),
        };
        registry.register::<Buffer, Buffer>(buffer_overlaps_buffer);
        registry.register::<Buffer, View>(buffer_overlaps_view);
        registry.register::<View, View>(view_overlaps_view);
        registry.register::<Buffer, Triangular>(|a, b| {
            let b = downcast::<Triangular>(b);
            overlaps(a, &*b.parent)
        });
        registry.register::<Buffer, Adjoint>(|a, b| {
            let b = downcast::<Adjoint>(b);
            overlaps(a, &*b.parent)
        });
        registry.register::<View, Triangular>(|a, b| {
            let b = downcast::<Triangular>(b);
            overlaps(a, &*b.parent)
        });
        registry.register::<View, Adjoint>(|a, b| {
            let b = downcast::<Adjoint>(b);
            overlaps(a, &*b.parent)
        });
        registry.register::<Triangular, Triangular>(|a, b| {
            let a = downcast::<Triangular>(a);
            let b = downcast::<Triangular>(b);
            overlaps(&*a.parent, &*b.parent)
        });
        registry.register::<Triangular, Adjoint>(|a, b| {
            let a = downcast::<Triangular>(a);
            let b = downcast::<Adjoint>(b);
            overlaps(&*a.parent, &*b.parent)
        });
        registry.register::<Adjoint, Adjoint>(|a, b| {
            let a = downcast::<Adjoint>(a);
            let b = downcast::<Adjoint>(b);
            overlaps(&*a.parent, &*b.parent)
        });
        registry
    }

    /// Registers `overlaps(a: A, b: B)`, and its mirror `overlaps(b: B, a:
    /// A)`, so callers never need to worry about argument order. Re-
    /// registering the same pair replaces the previous specialization.
    pub fn register<A: Region + 'static, B: Region + 'static>(
        &mut self,
        f: fn(&A, &B) -> bool,
    ) {
        let forward: OverlapFn = Arc::new(move |a, b| f(downcast::<A>(a), downcast::<B>(b)));
        let (ta, tb) = (TypeId::of::<A>(), TypeId::of::<B>());
        self.table.insert((ta, tb), forward);
        if ta != tb {
            let backward: OverlapFn = Arc::new(move |a, b| f(downcast::<A>(b), downcast::<B>(a)));
            self.table.insert((tb, ta), backward);
        }
    }

    fn lookup(&self, a: &dyn Region, b: &dyn Region) -> Option<OverlapFn> {
        self.table
            .get(&(a.as_any().type_id(), b.as_any().type_id()))
            .cloned()
    }
}

fn downcast<T: Region + 'static>(r: &dyn Region) -> &T {
    r.as_any()
        .downcast_ref::<T>()
        .expect("overlap registry invariant: TypeId lookup guarantees this downcast succeeds")
}

fn buffer_overlaps_buffer(a: &Buffer, b: &Buffer) -> bool {
    a.base() == b.base()
}

fn buffer_overlaps_view(a: &Buffer, b: &View) -> bool {
    a.base() == b.parent
}

fn view_overlaps_view(a: &View, b: &View) -> bool {
    if a.parent != b.parent {
        return false;
    }
    if a.ranges.len() != b.ranges.len() {
        // Mismatched dimensionality against the same parent is a user
        // error we can't reason about structurally; stay conservative.
        return true;
    }
    itertools::izip!(&a.ranges, &b.ranges).all(|(ra, rb)| ra.intersects(rb))
}

static REGISTRY: OnceLock<RwLock<OverlapRegistry>> = OnceLock::new();
static WARNED_PAIRS: OnceLock<Mutex<HashSet<(TypeId, TypeId)>>> = OnceLock::new();

fn registry() -> &'static RwLock<OverlapRegistry> {
    REGISTRY.get_or_init(|| RwLock::new(OverlapRegistry::new()))
}

/// Registers a custom `overlaps` specialization for a pair of region
/// types, symmetrically.
pub fn register<A: Region + 'static, B: Region + 'static>(f: fn(&A, &B) -> bool) {
    registry().write().register(f);
}

/// Whether two data regions overlap.
///
/// Bitwise-immutable [`crate::region::Scalar`]s never overlap anything.
/// Otherwise dispatches by the dynamic types of `a` and `b`; if no
/// specialization is registered for that (ordered) pair, falls back to a
/// conservative `true` and emits a one-shot `log::warn!` identifying the
/// unspecialized type pair. This is deliberate pessimism: correctness is
/// preserved (an unnecessary dependency edge is cheaper than a missed
/// one) at the cost of extra serialization.
pub fn overlaps(a: &dyn Region, b: &dyn Region) -> bool {
    if a.is_immutable_scalar() || b.is_immutable_scalar() {
        return false;
    }

    let key = (a.as_any().type_id(), b.as_any().type_id());
    if let Some(f) = registry().read().lookup(a, b) {
        return f(a, b);
    }

    let warned = WARNED_PAIRS.get_or_init(|| Mutex::new(HashSet::new()));
    let mut warned = warned.lock();
    if warned.insert(key) {
        log::warn!(
            "overlaps(): no specialization registered for {:?} <-> {:?}; \
             assuming they conflict (register one with dataflow_tasks::overlap::register)",
            key.0,
            key.1
        );
    }
    true
}

/// Clears the one-shot warned-pairs cache, so tests that exercise the
/// unspecialized-pair fallback can assert the warning fires again. Used
/// by [`crate::testing::reset_globals`].
pub(crate) fn reset_warnings() {
    if let Some(warned) = WARNED_PAIRS.get() {
        warned.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{AxisRange, Scalar};

    #[test]
    fn scalars_never_overlap() {
        let a = Scalar(1i32);
        let b = Scalar(2i32);
        assert!(!overlaps(&a, &b));
        let buf = Buffer::new(4);
        assert!(!overlaps(&a, &buf));
    }

    #[test]
    fn buffers_overlap_iff_same_base() {
        let a = Buffer::new(4);
        let b = a.clone();
        let c = Buffer::new(4);
        assert!(overlaps(&a, &b));
        assert!(!overlaps(&a, &c));
    }

    #[test]
    fn views_overlap_iff_axis_ranges_intersect() {
        let a = Buffer::new(1000);
        let v1 = a.view(vec![AxisRange::Range(1, 500)]);
        let v2 = a.view(vec![AxisRange::Range(501, 1000)]);
        let v3 = a.view(vec![AxisRange::Range(400, 600)]);
        assert!(!overlaps(&v1, &v2));
        assert!(overlaps(&v1, &v3));
        assert!(overlaps(&v2, &v3));
    }

    #[test]
    fn view_overlaps_its_own_buffer() {
        let a = Buffer::new(10);
        let v = a.view(vec![AxisRange::Range(0, 9)]);
        assert!(overlaps(&a, &v));
        assert!(overlaps(&v, &a));
    }

    #[test]
    fn triangular_and_adjoint_delegate_to_parent() {
        let a = Buffer::new(10);
        let b = Buffer::new(10);
        let tri_a = Triangular::new(std::sync::Arc::new(a.clone()));
        let adj_b = Adjoint::new(std::sync::Arc::new(b));
        assert!(!overlaps(&tri_a, &adj_b));

        let tri_a2 = Triangular::new(std::sync::Arc::new(a));
        assert!(overlaps(&tri_a, &tri_a2));
    }

    #[test]
    fn unspecialized_pair_falls_back_conservatively() {
        #[derive(Debug)]
        struct Weird;
        impl Region for Weird {
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }
        let a = Weird;
        let b = Weird;
        assert!(overlaps(&a, &b));
    }

    #[test]
    fn custom_registration_is_symmetric() {
        #[derive(Debug)]
        struct Tagged(u32);
        impl Region for Tagged {
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }
        register::<Tagged, Tagged>(|a, b| a.0 == b.0);
        let a = Tagged(1);
        let b = Tagged(1);
        let c = Tagged(2);
        assert!(overlaps(&a, &b));
        assert!(overlaps(&b, &a));
        assert!(!overlaps(&a, &c));
    }
}
