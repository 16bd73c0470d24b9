//! A monotonic nanosecond clock for trace timestamps. Readings are relative
//! to an arbitrary process-lifetime epoch, not wall-clock time — fine for
//! the only thing they're used for: computing durations between two
//! readings.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed since this process first called `now_nanos`.
pub(crate) fn now_nanos() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}
