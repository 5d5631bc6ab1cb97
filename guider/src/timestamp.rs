//! Frame timestamps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time as seconds and nanoseconds since an epoch.
///
/// Frames carry the time their exposure completed; the guider measures
/// star staleness and lock-shift elapsed time from these values rather than
/// from the wall clock so replayed or simulated frames behave identically.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Seconds component
    pub seconds: u64,
    /// Nanoseconds component (0-999,999,999)
    pub nanos: u64,
}

impl Timestamp {
    /// Create a new timestamp, carrying nanosecond overflow into seconds
    pub fn new(seconds: u64, nanos: u64) -> Self {
        Self {
            seconds: seconds + nanos / 1_000_000_000,
            nanos: nanos % 1_000_000_000,
        }
    }

    /// Create a timestamp from a duration since the epoch
    pub fn from_duration(duration: Duration) -> Self {
        Self::new(duration.as_secs(), duration.subsec_nanos() as u64)
    }

    /// Create a timestamp from fractional seconds, clamping negatives to zero
    pub fn from_secs_f64(seconds: f64) -> Self {
        Self::from_duration(Duration::from_secs_f64(seconds.max(0.0)))
    }

    /// Current wall-clock time since the Unix epoch
    pub fn now() -> Self {
        Self::from_duration(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
        )
    }

    /// Convert to a duration since the epoch
    pub fn to_duration(&self) -> Duration {
        Duration::new(self.seconds, self.nanos as u32)
    }

    /// Fractional seconds since the epoch
    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + self.nanos as f64 * 1e-9
    }

    /// Signed seconds elapsed from `earlier` to `self`
    pub fn seconds_since(&self, earlier: Timestamp) -> f64 {
        if *self >= earlier {
            (self.to_duration() - earlier.to_duration()).as_secs_f64()
        } else {
            -(earlier.to_duration() - self.to_duration()).as_secs_f64()
        }
    }

    /// Timestamp advanced by `duration`
    pub fn after(&self, duration: Duration) -> Self {
        Self::from_duration(self.to_duration() + duration)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_new_normalizes_nanos() {
        let ts = Timestamp::new(1, 2_500_000_000);
        assert_eq!(ts.seconds, 3);
        assert_eq!(ts.nanos, 500_000_000);
    }

    #[test]
    fn test_seconds_since_is_signed() {
        let a = Timestamp::new(10, 0);
        let b = Timestamp::new(12, 250_000_000);
        assert_relative_eq!(b.seconds_since(a), 2.25, epsilon = 1e-9);
        assert_relative_eq!(a.seconds_since(b), -2.25, epsilon = 1e-9);
    }

    #[test]
    fn test_after_and_display() {
        let ts = Timestamp::new(5, 900_000_000).after(Duration::from_millis(200));
        assert_eq!(ts, Timestamp::new(6, 100_000_000));
        assert_eq!(ts.to_string(), "6.100000000");
    }
}
