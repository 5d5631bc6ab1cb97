//! Simulated guide star shared by the camera and the mount.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use guider::{Offset, Position, Timestamp};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SkyState {
    star: Position,
    /// Drift in camera pixels per second, e.g. from polar misalignment
    drift: Offset,
    clock: Timestamp,
}

/// Where the guide star currently falls on the sensor.
///
/// The camera advances the clock as it exposes and the mount nudges the
/// star as it pulses; clones share the same sky.
#[derive(Clone)]
pub struct SimulatedSky {
    state: Arc<Mutex<SkyState>>,
}

impl SimulatedSky {
    pub fn new(star: Position) -> Self {
        Self {
            state: Arc::new(Mutex::new(SkyState {
                star,
                drift: Offset::zeros(),
                clock: Timestamp::new(1_000, 0),
            })),
        }
    }

    pub fn with_drift(self, drift: Offset) -> Self {
        lock(&self.state).drift = drift;
        self
    }

    pub fn star(&self) -> Position {
        lock(&self.state).star
    }

    pub fn drift(&self) -> Offset {
        lock(&self.state).drift
    }

    pub fn set_drift(&self, drift: Offset) {
        lock(&self.state).drift = drift;
    }

    pub fn now(&self) -> Timestamp {
        lock(&self.state).clock
    }

    /// Let `elapsed` pass, drifting the star. Returns the new time.
    pub fn advance(&self, elapsed: Duration) -> Timestamp {
        let mut state = lock(&self.state);
        let drift = state.drift;
        state.star += drift * elapsed.as_secs_f64();
        state.clock = state.clock.after(elapsed);
        state.clock
    }

    /// Move the star by `delta` camera pixels
    pub fn nudge(&self, delta: Offset) {
        lock(&self.state).star += delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_drift_accumulates_with_time() {
        let sky = SimulatedSky::new(Position::new(10.0, 20.0)).with_drift(Offset::new(0.5, -0.25));
        let start = sky.now();
        sky.advance(Duration::from_secs(2));
        let now = sky.advance(Duration::from_secs(2));

        assert_relative_eq!(now.seconds_since(start), 4.0);
        assert_relative_eq!(sky.star().x, 12.0);
        assert_relative_eq!(sky.star().y, 19.0);
    }

    #[test]
    fn test_clones_share_the_star() {
        let sky = SimulatedSky::new(Position::new(0.0, 0.0));
        let other = sky.clone();
        other.nudge(Offset::new(3.0, 4.0));
        assert_eq!(sky.star(), Position::new(3.0, 4.0));
    }
}
