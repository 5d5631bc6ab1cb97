//! Camera-space positions, the shifting lock position, and guide offsets.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// A location in camera pixel coordinates.
///
/// A missing measurement is represented as `Option<Position>::None` rather
/// than a sentinel value.
pub type Position = Point2<f64>;

/// A displacement in camera pixels or in mount axes, depending on context.
pub type Offset = Vector2<f64>;

/// Reference position the controller holds the star on.
///
/// Carries an optional drift: once a shift rate is set the position moves
/// linearly from the origin captured at `begin_shift`. Elapsed time is
/// accumulated and the position recomputed from the origin so that
/// splitting an interval into pieces lands on the same point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LockPosition {
    position: Position,
    origin: Position,
    /// Pixels per second in camera axes
    rate: Option<Offset>,
    shift_elapsed: f64,
}

impl LockPosition {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            origin: position,
            rate: None,
            shift_elapsed: 0.0,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Move to `position`, restarting any shift from there.
    pub fn set(&mut self, position: Position) {
        self.position = position;
        self.begin_shift();
    }

    /// Restart the shift from the current position.
    pub fn begin_shift(&mut self) {
        self.origin = self.position;
        self.shift_elapsed = 0.0;
    }

    /// Set the shift rate in camera pixels per second.
    pub fn set_shift_rate(&mut self, rate: Offset) {
        self.begin_shift();
        self.rate = Some(rate);
    }

    pub fn disable_shift(&mut self) {
        self.begin_shift();
        self.rate = None;
    }

    pub fn shift_rate(&self) -> Option<Offset> {
        self.rate
    }

    /// Advance the shift by `elapsed_seconds` and return the new position.
    pub fn apply_shift(&mut self, elapsed_seconds: f64) -> Position {
        if let Some(rate) = self.rate {
            self.shift_elapsed += elapsed_seconds;
            self.position = self.origin + rate * self.shift_elapsed;
        }
        self.position
    }
}

/// Offset of the star from the lock position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuideOffset {
    /// `current - lock` in camera pixels
    pub camera: Offset,
    /// Same vector in mount axes; `None` when the mount has no calibration
    pub mount: Option<Offset>,
}

impl GuideOffset {
    pub fn zero() -> Self {
        Self {
            camera: Offset::zeros(),
            mount: Some(Offset::zeros()),
        }
    }

    pub fn distance(&self) -> f64 {
        self.camera.norm()
    }

    /// Magnitude of the RA component, zero if there is no mount vector.
    pub fn ra_distance(&self) -> f64 {
        self.mount.map(|m| m.x.abs()).unwrap_or(0.0)
    }
}
