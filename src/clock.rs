//! Monotonic time helpers.
//!
//! Everything here is based on a process-wide monotonic anchor, so points
//! are comparable across threads and never move backwards with wall-clock
//! adjustments. Worker pacing computes absolute deadlines from these
//! points instead of chaining relative sleeps, which would accumulate
//! rounding drift.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

const NANOS_PER_SEC: i64 = 1_000_000_000;
const NANOS_PER_MILLI: i64 = 1_000_000;

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// A point on the process monotonic clock.
///
/// Stored as whole seconds plus a nanosecond remainder, kept normalized so
/// the remainder is always in `0..1_000_000_000` regardless of arithmetic
/// direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimePoint {
    secs: i64,
    nanos: u32,
}

/// Current monotonic time, sub-millisecond resolution.
pub fn now() -> TimePoint {
    let elapsed = ANCHOR.get_or_init(Instant::now).elapsed();
    TimePoint {
        secs: elapsed.as_secs() as i64,
        nanos: elapsed.subsec_nanos(),
    }
}

/// True iff `b - a < threshold_ms` milliseconds.
///
/// Deliberately one-directional: when `b` precedes `a` the signed
/// difference is negative and the comparison still holds. Callers use the
/// directionality to ask "has `b` run ahead of `a` by `threshold_ms`
/// yet?", so this must not be replaced with an absolute-value comparison.
pub fn within(a: TimePoint, b: TimePoint, threshold_ms: u64) -> bool {
    b.millis_since(a) < threshold_ms as f64
}

impl TimePoint {
    /// This point advanced by `ms` milliseconds (rewound for negative
    /// `ms`). Sub-second overflow carries into the whole-second component;
    /// the euclidean split keeps the nanosecond remainder non-negative in
    /// both directions.
    pub fn add_millis(self, ms: i64) -> TimePoint {
        let mut secs = self.secs + ms.div_euclid(1000);
        let mut nanos = i64::from(self.nanos) + ms.rem_euclid(1000) * NANOS_PER_MILLI;
        if nanos >= NANOS_PER_SEC {
            secs += 1;
            nanos -= NANOS_PER_SEC;
        }
        TimePoint {
            secs,
            nanos: nanos as u32,
        }
    }

    /// Signed millisecond distance from `earlier` to `self`.
    pub fn millis_since(self, earlier: TimePoint) -> f64 {
        let secs = (self.secs - earlier.secs) as f64;
        let nanos = f64::from(self.nanos) - f64::from(earlier.nanos);
        secs * 1_000.0 + nanos / NANOS_PER_MILLI as f64
    }

    /// Time remaining from `earlier` up to `self`, zero if `self` has
    /// already passed. This is the deadline helper for timed waits.
    pub fn saturating_duration_since(self, earlier: TimePoint) -> Duration {
        if self <= earlier {
            return Duration::ZERO;
        }
        let mut secs = self.secs - earlier.secs;
        let mut nanos = i64::from(self.nanos) - i64::from(earlier.nanos);
        if nanos < 0 {
            secs -= 1;
            nanos += NANOS_PER_SEC;
        }
        Duration::new(secs as u64, nanos as u32)
    }

    /// Seconds since the clock anchor as a fractional value.
    pub fn as_secs_f64(self) -> f64 {
        self.secs as f64 + f64::from(self.nanos) / NANOS_PER_SEC as f64
    }
}
