use thiserror::Error;

use crate::camera::CameraError;
use crate::cancel::Cancelled;
use crate::mount::{MountError, MountRole};
use crate::state::GuiderState;

/// Errors produced by the guider and its state machine.
#[derive(Error, Debug)]
pub enum GuiderError {
    /// A state change request skipped more than one rank.
    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition {
        /// State at the time of the request.
        from: GuiderState,
        /// Requested state.
        to: GuiderState,
    },

    /// Lock position outside the frame or not a finite point.
    #[error("invalid lock position ({x:.2}, {y:.2})")]
    InvalidLockPosition {
        /// Requested X position.
        x: f64,
        /// Requested Y position.
        y: f64,
    },

    /// Operation requires a lock position.
    #[error("no lock position")]
    NoLockPosition,

    /// Offset with a non-finite component.
    #[error("invalid offset ({x}, {y})")]
    InvalidOffset {
        /// X component.
        x: f64,
        /// Y component.
        y: f64,
    },

    /// Operation is only allowed while guiding.
    #[error("guider is not guiding (state {0})")]
    NotGuiding(GuiderState),

    /// Operation requires a current frame.
    #[error("no frame available")]
    NoFrame,

    /// Operation requires a located star.
    #[error("no star found")]
    NoStar,

    /// Operation requires a calibrated mount.
    #[error("mount is not calibrated")]
    MountNotCalibrated,

    /// Mount could not transform between camera and mount axes.
    #[error("{0} coordinate transform failed")]
    TransformFailed(&'static str),

    /// Calibration sequence failed.
    #[error("{role} calibration failed: {reason}")]
    CalibrationFailed {
        /// Mount being calibrated.
        role: MountRole,
        /// Failure detail.
        reason: String,
    },

    /// Lock shift rate could not be expressed in camera axes.
    #[error("lock position shift rate transform failed")]
    LockShiftTransform,

    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Interrupted by a cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Guide loop thread is no longer running.
    #[error("guide loop has stopped")]
    LoopStopped,

    #[error("mount error: {0}")]
    Mount(#[from] MountError),

    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
}

impl From<Cancelled> for GuiderError {
    fn from(_: Cancelled) -> Self {
        GuiderError::Cancelled
    }
}
