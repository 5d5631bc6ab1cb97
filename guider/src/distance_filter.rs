//! Smoothed star-to-lock distance used as the settle and quality metric.

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// Reported in place of the averages when no star has been seen recently.
pub const LARGE_DISTANCE: f64 = 100.0;

/// Seconds without a located star at which the averages become stale.
pub const STALE_STAR_SECONDS: f64 = 20.0;

const SHORT_ALPHA: f64 = 0.3;
const LONG_ALPHA: f64 = 0.045;
/// The long average is a plain running mean until this many samples.
const LONG_WARMUP_SAMPLES: u32 = 10;

/// Exponential moving averages of the guide error.
///
/// Tracks a short (~3 frame) and a long (~15 frame) average of both the full
/// offset magnitude and its RA-only component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DistanceTracker {
    avg: f64,
    avg_long: f64,
    avg_ra: f64,
    avg_long_ra: f64,
    count: u32,
    last_star_seen: Option<Timestamp>,
    reset_pending: bool,
}

impl DistanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample measured at `at`.
    ///
    /// Outside of guiding, on the first sample, and on the first update
    /// after `request_reset`, the averages are re-seeded with the sample
    /// instead of smoothed.
    pub fn update(&mut self, distance: f64, distance_ra: f64, guiding: bool, at: Timestamp) {
        self.last_star_seen = Some(at);

        if !guiding || self.reset_pending || self.count == 0 {
            self.seed(distance, distance_ra);
            self.reset_pending = false;
            return;
        }

        self.avg += SHORT_ALPHA * (distance - self.avg);
        self.avg_ra += SHORT_ALPHA * (distance_ra - self.avg_ra);

        self.count += 1;
        if self.count < LONG_WARMUP_SAMPLES {
            let n = self.count as f64;
            self.avg_long += (distance - self.avg_long) / n;
            self.avg_long_ra += (distance_ra - self.avg_long_ra) / n;
        } else {
            self.avg_long += LONG_ALPHA * (distance - self.avg_long);
            self.avg_long_ra += LONG_ALPHA * (distance_ra - self.avg_long_ra);
        }
    }

    fn seed(&mut self, distance: f64, distance_ra: f64) {
        self.avg = distance;
        self.avg_long = distance;
        self.avg_ra = distance_ra;
        self.avg_long_ra = distance_ra;
        self.count = 1;
    }

    /// Re-seed on the next update.
    pub fn request_reset(&mut self) {
        self.reset_pending = true;
    }

    pub fn reset_pending(&self) -> bool {
        self.reset_pending
    }

    /// Forget everything, including when the star was last seen.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Bump all averages by a known displacement, e.g. right after a dither.
    pub fn add_offset(&mut self, distance: f64, distance_ra: f64) {
        self.avg += distance;
        self.avg_long += distance;
        self.avg_ra += distance_ra;
        self.avg_long_ra += distance_ra;
    }

    fn stale(&self, now: Timestamp) -> bool {
        match self.last_star_seen {
            None => true,
            Some(seen) => now.seconds_since(seen) >= STALE_STAR_SECONDS,
        }
    }

    /// Short average, or `LARGE_DISTANCE` if the star is stale at `now`.
    pub fn current_error(&self, now: Timestamp, ra_only: bool) -> f64 {
        if self.stale(now) {
            LARGE_DISTANCE
        } else if ra_only {
            self.avg_ra
        } else {
            self.avg
        }
    }

    /// Long average, or `LARGE_DISTANCE` if the star is stale at `now`.
    pub fn current_error_smoothed(&self, now: Timestamp, ra_only: bool) -> f64 {
        if self.stale(now) {
            LARGE_DISTANCE
        } else if ra_only {
            self.avg_long_ra
        } else {
            self.avg_long
        }
    }

    pub fn last_star_seen(&self) -> Option<Timestamp> {
        self.last_star_seen
    }
}
