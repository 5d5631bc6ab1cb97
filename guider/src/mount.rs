//! Mount collaborator interface.
//!
//! A mount is anything that can move the star on the sensor in response to
//! a guide offset: an equatorial mount driven by pulses, or an adaptive
//! optics unit acting as a secondary mount. The guider owns calibration
//! sequencing but the mount owns the calibration math, the coordinate
//! transforms and the guide algorithms that turn an offset into a pulse.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::cancel::{Cancelled, CancellationToken};
use crate::position::{GuideOffset, Offset, Position};

/// Errors reported by a mount
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MountError {
    #[error("mount not connected")]
    NotConnected,

    #[error("calibration failed: {0}")]
    CalibrationFailed(String),

    #[error("guide pulse failed: {0}")]
    PulseFailed(String),

    #[error("mount move cancelled")]
    Cancelled,
}

impl From<Cancelled> for MountError {
    fn from(_: Cancelled) -> Self {
        MountError::Cancelled
    }
}

/// Sign relationship between a mount axis and the camera axis it moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuideParity {
    Even,
    Odd,
    Unknown,
}

impl GuideParity {
    /// Multiplier applied to a rate on this axis.
    pub fn sign(&self) -> f64 {
        match self {
            GuideParity::Odd => -1.0,
            GuideParity::Even | GuideParity::Unknown => 1.0,
        }
    }
}

/// Why a move is being issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveKind {
    /// Pulse issued by the calibration sequence
    Calibration,
    /// Ordinary correction, filtered by the mount's guide algorithm
    GuideStep,
    /// Zero-offset move so the guide algorithm can dead-reckon
    DeducedMove,
    /// Direct move that bypasses the guide algorithm
    RecoveryMove,
}

/// Which mount a calibration or event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountRole {
    Primary,
    Secondary,
}

impl fmt::Display for MountRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MountRole::Primary => write!(f, "mount"),
            MountRole::Secondary => write!(f, "AO"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuideDirection {
    North,
    South,
    East,
    West,
    None,
}

/// Outcome of a correction on one axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisMove {
    pub duration_ms: u32,
    pub direction: GuideDirection,
    /// True if the move was clipped by the mount's maximum duration
    pub limited: bool,
}

impl AxisMove {
    pub fn none() -> Self {
        Self {
            duration_ms: 0,
            direction: GuideDirection::None,
            limited: false,
        }
    }
}

/// Result of `Mount::issue_correction`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveResult {
    pub ra: AxisMove,
    pub dec: AxisMove,
}

impl MoveResult {
    pub fn none() -> Self {
        Self {
            ra: AxisMove::none(),
            dec: AxisMove::none(),
        }
    }
}

/// Result of a calibration step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationProgress {
    InProgress,
    Complete,
}

pub trait Mount: Send {
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    fn is_calibrated(&self) -> bool;

    /// Start calibrating with the star at `position`.
    fn begin_calibration(&mut self, position: Position) -> Result<(), MountError>;

    /// Feed the star position from the latest frame to the calibration sequence.
    fn update_calibration_state(
        &mut self,
        position: Position,
    ) -> Result<CalibrationProgress, MountError>;

    /// Rescale the calibration for the current pointing before guiding.
    fn adjust_calibration_for_pointing(&mut self) {}

    fn transform_camera_to_mount(&self, camera: Offset) -> Option<Offset>;

    fn transform_mount_to_camera(&self, mount: Offset) -> Option<Offset>;

    fn ra_parity(&self) -> GuideParity;

    fn dec_parity(&self) -> GuideParity;

    /// Current declination in radians, if known
    fn declination(&self) -> Option<f64> {
        None
    }

    /// Execute a correction. Blocks until the pulse completes, polling `cancel`.
    fn issue_correction(
        &mut self,
        offset: &GuideOffset,
        kind: MoveKind,
        cancel: &CancellationToken,
    ) -> Result<MoveResult, MountError>;

    /// The lock position moved by `camera_delta` while guiding.
    fn notify_guiding_dithered(&mut self, _camera_delta: Offset) {}

    /// A recovery move of `mount_offset` bypassed the guide algorithm.
    fn notify_direct_move(&mut self, _mount_offset: Offset) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_sign() {
        assert_eq!(GuideParity::Odd.sign(), -1.0);
        assert_eq!(GuideParity::Even.sign(), 1.0);
        assert_eq!(GuideParity::Unknown.sign(), 1.0);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(MountRole::Primary.to_string(), "mount");
        assert_eq!(MountRole::Secondary.to_string(), "AO");
    }
}
