//! Timestamps and the monotonic clock producers stamp buffers with.
//!
//! - [`Timestamp`]: presentation time in microseconds (8 bytes, Copy)
//! - [`MonotonicClock`]: microseconds elapsed since the clock was created

use std::fmt;
use std::ops::{Add, Sub};
use std::time::{Duration, Instant};

// ============================================================================
// Timestamp
// ============================================================================

/// Presentation time in monotonic microseconds.
///
/// Timestamps are only meaningful relative to each other; the epoch is
/// whatever the producing clock started at.
///
/// # Examples
///
/// ```rust
/// use mediagraph::clock::Timestamp;
/// use std::time::Duration;
///
/// let t1 = Timestamp::from_secs(1);
/// let t2 = t1 + Duration::from_millis(500);
///
/// assert_eq!(t2.millis(), 1500);
/// assert_eq!(t2.span_since(t1), Duration::from_millis(500));
/// assert_eq!(format!("{}", t2), "1.500000s");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Maximum representable time.
    pub const MAX: Self = Self(u64::MAX);

    /// Create from microseconds.
    #[inline]
    pub const fn from_micros(us: u64) -> Self {
        Self(us)
    }

    /// Create from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000))
    }

    /// Create from seconds.
    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Self(s.saturating_mul(1_000_000))
    }

    /// Create from a duration since the epoch.
    #[inline]
    pub fn from_duration(d: Duration) -> Self {
        Self(u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
    }

    /// Get as microseconds.
    #[inline]
    pub const fn micros(self) -> u64 {
        self.0
    }

    /// Get as milliseconds (truncated).
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 / 1_000
    }

    /// Get as a duration since the epoch.
    #[inline]
    pub const fn as_duration(self) -> Duration {
        Duration::from_micros(self.0)
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    #[inline]
    pub const fn span_since(self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }

    /// Subtract a duration, clamping at zero.
    #[inline]
    pub fn saturating_sub(self, d: Duration) -> Self {
        Self(self.0.saturating_sub(Self::from_duration(d).0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        Timestamp(self.0.saturating_add(Timestamp::from_duration(rhs).0))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl From<Duration> for Timestamp {
    fn from(d: Duration) -> Self {
        Self::from_duration(d)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}s", self.0 / 1_000_000, self.0 % 1_000_000)
    }
}

// ============================================================================
// MonotonicClock
// ============================================================================

/// Monotonic clock producing [`Timestamp`]s relative to its creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose epoch is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Current time on this clock.
    pub fn now(&self) -> Timestamp {
        Timestamp::from_duration(self.origin.elapsed())
    }

    /// The instant this clock counts from.
    pub fn origin(&self) -> Instant {
        self.origin
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_conversions() {
        assert_eq!(Timestamp::from_secs(2).micros(), 2_000_000);
        assert_eq!(Timestamp::from_millis(1500).millis(), 1500);
        assert_eq!(
            Timestamp::from_micros(2500).as_duration(),
            Duration::from_micros(2500)
        );
    }

    #[test]
    fn test_span_since_saturates() {
        let a = Timestamp::from_secs(1);
        let b = Timestamp::from_secs(3);
        assert_eq!(b.span_since(a), Duration::from_secs(2));
        assert_eq!(a.span_since(b), Duration::ZERO);
    }

    #[test]
    fn test_arithmetic() {
        let t = Timestamp::from_secs(5);
        assert_eq!(t - Duration::from_secs(2), Timestamp::from_secs(3));
        assert_eq!(t - Duration::from_secs(10), Timestamp::ZERO);
        assert_eq!(t + Duration::from_millis(1), Timestamp::from_micros(5_001_000));
    }

    #[test]
    fn test_display() {
        assert_eq!(Timestamp::from_micros(1_000_042).to_string(), "1.000042s");
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        let t2 = clock.now();
        assert!(t2 > t1);
    }
}
