//! Star localization interface.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::camera::Frame;
use crate::position::Position;

/// Measured properties of the guide star in one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StarMeasurement {
    pub position: Position,
    /// Integrated background-subtracted flux
    pub mass: f64,
    pub snr: f64,
    /// Half-flux diameter in pixels
    pub hfd: f64,
}

impl StarMeasurement {
    pub fn at(position: Position) -> Self {
        Self {
            position,
            mass: 0.0,
            snr: 0.0,
            hfd: 0.0,
        }
    }
}

/// Reasons a frame yielded no usable star
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LostReason {
    NoStarSelected,
    LowSnr,
    Saturated,
    MassChange,
    TooNearEdge,
    Other(String),
}

impl fmt::Display for LostReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LostReason::NoStarSelected => write!(f, "no star selected"),
            LostReason::LowSnr => write!(f, "star lost - low SNR"),
            LostReason::Saturated => write!(f, "star saturated"),
            LostReason::MassChange => write!(f, "star lost - mass changed"),
            LostReason::TooNearEdge => write!(f, "star too near edge"),
            LostReason::Other(msg) => write!(f, "star lost - {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Located {
    Found(StarMeasurement),
    NotFound(LostReason),
}

/// Finds the guide star in a frame.
///
/// `hint` is the last known position; `None` asks the locator to pick a
/// star on its own.
pub trait StarLocator: Send {
    fn locate(&mut self, frame: &Frame, hint: Option<Position>) -> Located;
}
