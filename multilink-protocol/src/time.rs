//! Monotonic timestamps
//!
//! Group-time anchors and delivery deadlines are expressed in microseconds
//! against a monotonic clock. This wraps `std::time::Instant` and adds the
//! microsecond conversions the delivery clock works in.

use std::ops::{Add, Sub};
use std::time::{Duration, Instant};

/// Monotonic timestamp with microsecond conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(Instant);

impl Timestamp {
    #[inline]
    pub fn now() -> Self {
        Timestamp(Instant::now())
    }

    #[inline]
    pub fn from_instant(instant: Instant) -> Self {
        Timestamp(instant)
    }

    #[inline]
    pub fn as_instant(&self) -> Instant {
        self.0
    }

    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        self.0.duration_since(earlier.0)
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    /// Microseconds elapsed since `reference`, saturating on overflow.
    pub fn as_micros_since(&self, reference: Timestamp) -> u64 {
        self.0
            .duration_since(reference.0)
            .as_micros()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    /// Offset a reference timestamp by a microsecond count.
    pub fn from_micros_offset(reference: Timestamp, micros: u64) -> Self {
        Timestamp(reference.0 + Duration::from_micros(micros))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, duration: Duration) -> Timestamp {
        Timestamp(self.0 + duration)
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, duration: Duration) -> Timestamp {
        Timestamp(self.0 - duration)
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, other: Timestamp) -> Duration {
        self.0.duration_since(other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn micros_since_reference() {
        let reference = Timestamp::now();
        thread::sleep(Duration::from_millis(5));
        let later = Timestamp::now();
        assert!(later.as_micros_since(reference) >= 5_000);
    }

    #[test]
    fn offset_round_trip() {
        let reference = Timestamp::now();
        let shifted = Timestamp::from_micros_offset(reference, 1_500);
        assert_eq!(shifted.duration_since(reference), Duration::from_micros(1_500));
    }

    #[test]
    fn subtraction_yields_duration() {
        let a = Timestamp::now();
        let b = a + Duration::from_millis(2);
        assert_eq!(b - a, Duration::from_millis(2));
    }
}
