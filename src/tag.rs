//! Process-wide monotonic task identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TAG: AtomicU64 = AtomicU64::new(0);

/// A strictly monotonic, unique integer assigned to a [`crate::Task`] at
/// construction. Defines the canonical sequential order of the program:
/// `tag(i) < tag(j)` iff `i` was created before `j`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(u64);

impl Tag {
    /// Allocates the next tag from the process-wide counter.
    pub(crate) fn next() -> Self {
        Tag(NEXT_TAG.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw integer value, for diagnostics and serialization.
    pub fn value(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn for_test(n: u64) -> Self {
        Tag(n)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resets the global tag counter to zero. Only meaningful for test
/// isolation; see [`crate::testing::reset_globals`].
pub(crate) fn reset() {
    NEXT_TAG.store(0, Ordering::SeqCst);
}
