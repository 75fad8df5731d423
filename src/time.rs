//! Monotonic microsecond clock.
//!
//! Every deadline in the server (key TTLs, idle timeouts) is an absolute
//! value on this clock. It starts at zero when first read and never goes
//! backwards, so deadlines compare with plain integer ordering.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Returns the current monotonic time in microseconds since the clock was
/// first read.
#[inline]
pub fn now_us() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// Converts a duration to whole microseconds, saturating at `u64::MAX`.
#[inline]
pub fn duration_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
