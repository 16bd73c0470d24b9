//! Data regions and access modes.
//!
//! The runtime treats a data region opaquely: it never reads or writes
//! the contents, only the dynamic type and whatever a `Region`
//! implementation chooses to expose through [`overlaps`](crate::overlaps).

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use crate::tag::Tag;

/// How a task touches one of its declared data regions.
///
/// Two accesses to overlapping regions conflict iff at least one is
/// `Write` or `ReadWrite`; two `Read`s never conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    /// `true` for any mode other than `Read`.
    pub fn is_write(self) -> bool {
        !matches!(self, AccessMode::Read)
    }
}

/// A value a [`crate::Task`] reads, writes, or read-writes.
///
/// Implementors are looked up by dynamic type in the [overlap
/// registry](crate::overlap::OverlapRegistry); the trait itself carries no
/// behavior beyond identifying itself for that lookup.
pub trait Region: Any + Send + Sync + Debug {
    /// Upcast for registry dispatch by dynamic type.
    fn as_any(&self) -> &dyn Any;

    /// `true` for bitwise-immutable scalars, which never overlap anything.
    /// Every built-in region type other than [`Scalar`] returns the
    /// default, `false`.
    fn is_immutable_scalar(&self) -> bool {
        false
    }
}

/// A bitwise-immutable scalar. Never overlaps anything, including itself,
/// because mutating it is impossible — there is no conflict to guard
/// against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scalar<T>(pub T);

impl<T: Debug + Send + Sync + 'static> Region for Scalar<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_immutable_scalar(&self) -> bool {
        true
    }
}

/// One axis of a [`View`]'s index set into its parent [`Buffer`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AxisRange {
    /// A single index, e.g. `view(A, i)`.
    Single(usize),
    /// An inclusive range `[start, end]`.
    Range(usize, usize),
}

impl AxisRange {
    /// Whether this axis range shares at least one index with `other`.
    pub fn intersects(&self, other: &AxisRange) -> bool {
        match (self, other) {
            (AxisRange::Single(a), AxisRange::Single(b)) => a == b,
            (AxisRange::Single(a), AxisRange::Range(lo, hi))
            | (AxisRange::Range(lo, hi), AxisRange::Single(a)) => (*lo..=*hi).contains(a),
            (AxisRange::Range(lo1, hi1), AxisRange::Range(lo2, hi2)) => lo1 <= hi2 && lo2 <= hi1,
        }
    }
}

/// A contiguous buffer. Identity — not contents — is what matters for
/// conflict detection: two `Buffer`s overlap iff they share the same base
/// address, which we model as a shared `Arc` allocation id.
#[derive(Debug, Clone)]
pub struct Buffer {
    id: Arc<()>,
    pub len: usize,
}

impl Buffer {
    /// Allocates a fresh buffer identity of the given length.
    pub fn new(len: usize) -> Self {
        Buffer {
            id: Arc::new(()),
            len,
        }
    }

    /// Base-address identity, shared by every clone of this `Buffer` and
    /// by every [`View`] constructed from it.
    pub fn base(&self) -> BufferId {
        BufferId(Arc::as_ptr(&self.id) as usize)
    }

    /// Creates a view over a range of axes of this buffer.
    pub fn view(&self, ranges: Vec<AxisRange>) -> View {
        View {
            parent: self.base(),
            ranges,
        }
    }
}

impl Region for Buffer {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Opaque base-address identity for a [`Buffer`], stable across clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(usize);

/// A sub-range view over a [`Buffer`], carrying the parent's identity plus
/// a per-axis index set.
#[derive(Debug, Clone)]
pub struct View {
    pub parent: BufferId,
    pub ranges: Vec<AxisRange>,
}

impl Region for View {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Wraps a region, presenting only its upper- or lower-triangular part.
/// Conflict detection delegates entirely to the wrapped parent: a
/// `Triangular` overlaps exactly what its parent overlaps.
#[derive(Debug, Clone)]
pub struct Triangular {
    pub parent: Arc<dyn Region>,
}

impl Triangular {
    pub fn new(parent: Arc<dyn Region>) -> Self {
        Triangular { parent }
    }
}

impl Region for Triangular {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Wraps a region, presenting its adjoint (conjugate transpose). Like
/// [`Triangular`], delegates overlap checks to the parent.
#[derive(Debug, Clone)]
pub struct Adjoint {
    pub parent: Arc<dyn Region>,
}

impl Adjoint {
    pub fn new(parent: Arc<dyn Region>) -> Self {
        Adjoint { parent }
    }
}

impl Region for Adjoint {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A reference to another [`crate::Task`], usable as a data-list entry so
/// that task's completion becomes an explicit predecessor edge — the
/// nested-dependency case in which a task's declared data happens to
/// include another, still-live task rather than a plain buffer. Never goes
/// through [`overlaps`](crate::overlaps): [`crate::dependency`] recognizes
/// this type and adds the edge unconditionally (if the referenced task is
/// still live) instead of treating it as a conflict to detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TaskRef(pub(crate) Tag);

impl Region for TaskRef {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_range_single_intersects_range() {
        assert!(AxisRange::Single(5).intersects(&AxisRange::Range(1, 10)));
        assert!(!AxisRange::Single(50).intersects(&AxisRange::Range(1, 10)));
    }

    #[test]
    fn axis_range_ranges_intersect_on_overlap_only() {
        assert!(AxisRange::Range(1, 5).intersects(&AxisRange::Range(5, 10)));
        assert!(!AxisRange::Range(1, 5).intersects(&AxisRange::Range(6, 10)));
    }

    #[test]
    fn buffer_clones_share_identity() {
        let a = Buffer::new(10);
        let b = a.clone();
        assert_eq!(a.base(), b.base());

        let c = Buffer::new(10);
        assert_ne!(a.base(), c.base());
    }

    #[test]
    fn access_mode_is_write() {
        assert!(!AccessMode::Read.is_write());
        assert!(AccessMode::Write.is_write());
        assert!(AccessMode::ReadWrite.is_write());
    }
}
