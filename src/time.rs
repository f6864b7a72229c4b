//! Monotonic timestamps for span measurement.
//!
//! Spans are timed with the monotonic clock so interval arithmetic is immune
//! to wall-clock adjustments; only at serialization time is a timestamp
//! converted to absolute epoch nanoseconds, through a single wall/monotonic
//! anchor captured once per process.

use std::ops::Add;
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

struct Anchor {
    wall: SystemTime,
    instant: Instant,
}

static ANCHOR: OnceLock<Anchor> = OnceLock::new();

fn anchor() -> &'static Anchor {
    ANCHOR.get_or_init(|| Anchor {
        wall: SystemTime::now(),
        instant: Instant::now(),
    })
}

/// A monotonic point in time, measured against the process anchor.
///
/// `Timestamp` is `Copy` and totally ordered; comparisons between timestamps
/// taken in one process are always meaningful.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// The current monotonic time.
    pub fn now() -> Self {
        Timestamp(anchor().instant.elapsed())
    }

    /// Absolute epoch time in nanoseconds, resolved through the process
    /// anchor. Saturates at `u64::MAX` (year 2554).
    pub fn epoch_nanos(self) -> u64 {
        let wall = anchor()
            .wall
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        u64::try_from(wall.as_nanos() + self.0.as_nanos()).unwrap_or(u64::MAX)
    }

}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let a = Timestamp::now();
        let b = Timestamp::now();
        assert!(a <= b);
    }

    #[test]
    fn epoch_conversion_preserves_ordering_and_offsets() {
        let a = Timestamp::now();
        let b = a + Duration::from_millis(5);
        assert_eq!(b.epoch_nanos() - a.epoch_nanos(), 5_000_000);
    }

    #[test]
    fn epoch_nanos_is_plausible_wall_time() {
        // Past 2020-01-01, before 2100-01-01.
        let nanos = Timestamp::now().epoch_nanos();
        assert!(nanos > 1_577_836_800_000_000_000);
        assert!(nanos < 4_102_444_800_000_000_000);
    }
}
