//! Guide state machine
//!
//! States, pause levels and the pure transition planner. The planner decides
//! which state a request lands in and which side effects the guider must
//! perform, without touching the mount or any other collaborator; the
//! `Guider` executes the effects and falls back when one of them fails.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::GuiderError;
use crate::mount::MountRole;

/// Guider states, ordered by rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GuiderState {
    /// No star; the next frame with a star selects it
    Uninitialized,
    /// Looking for a star to select
    Selecting,
    /// Star selected and lock position set; looping without corrections
    Selected,
    CalibratingPrimary,
    CalibratingSecondary,
    Calibrated,
    Guiding,
    /// Request only: resolves to a resting state via `stop_target`
    Stop,
}

impl GuiderState {
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// True for the states in which frames are looped without guiding
    pub fn is_looping(&self) -> bool {
        matches!(
            self,
            GuiderState::Uninitialized | GuiderState::Selecting | GuiderState::Selected
        )
    }

    pub fn is_calibrating(&self) -> bool {
        matches!(
            self,
            GuiderState::CalibratingPrimary | GuiderState::CalibratingSecondary
        )
    }

    pub fn is_calibrating_or_guiding(&self) -> bool {
        matches!(
            self,
            GuiderState::CalibratingPrimary
                | GuiderState::CalibratingSecondary
                | GuiderState::Calibrated
                | GuiderState::Guiding
        )
    }

    /// Resting state a stop request resolves to from `self`.
    ///
    /// Calibration has already moved the mount so it restarts from scratch;
    /// guiding keeps the selected star.
    pub fn stop_target(&self) -> GuiderState {
        match self {
            GuiderState::Uninitialized | GuiderState::Selecting | GuiderState::Selected => *self,
            GuiderState::CalibratingPrimary | GuiderState::CalibratingSecondary => {
                GuiderState::Uninitialized
            }
            GuiderState::Calibrated | GuiderState::Guiding => GuiderState::Selected,
            GuiderState::Stop => GuiderState::Stop,
        }
    }
}

impl fmt::Display for GuiderState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            GuiderState::Uninitialized => "Uninitialized",
            GuiderState::Selecting => "Selecting",
            GuiderState::Selected => "Selected",
            GuiderState::CalibratingPrimary => "CalibratingPrimary",
            GuiderState::CalibratingSecondary => "CalibratingSecondary",
            GuiderState::Calibrated => "Calibrated",
            GuiderState::Guiding => "Guiding",
            GuiderState::Stop => "Stop",
        };
        write!(f, "{name}")
    }
}

/// Pause levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseType {
    #[default]
    None,
    /// State frozen and no corrections; frames are still located
    Guiding,
    /// Also suspends distance tracking, which is re-seeded on resume
    Full,
}

/// Coarse state reported to status clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposedState {
    None,
    Selected,
    Calibrating,
    GuidingLocked,
    GuidingLost,
    Paused,
    Looping,
}

impl ExposedState {
    pub fn from_guider(
        state: GuiderState,
        paused: PauseType,
        capture_active: bool,
        star_valid: bool,
        locked: bool,
    ) -> Self {
        if paused != PauseType::None {
            return ExposedState::Paused;
        }
        if !capture_active {
            return ExposedState::None;
        }
        match state {
            GuiderState::Uninitialized | GuiderState::Selecting => {
                if star_valid {
                    ExposedState::Selected
                } else {
                    ExposedState::Looping
                }
            }
            GuiderState::Selected | GuiderState::Calibrated => ExposedState::Selected,
            GuiderState::CalibratingPrimary | GuiderState::CalibratingSecondary => {
                ExposedState::Calibrating
            }
            GuiderState::Guiding if locked => ExposedState::GuidingLocked,
            GuiderState::Guiding => ExposedState::GuidingLost,
            GuiderState::Stop => ExposedState::None,
        }
    }
}

/// What the planner needs to know about the collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionContext {
    pub primary_calibrated: bool,
    /// `Some(calibrated)` when a connected secondary mount is present
    pub secondary_calibrated: Option<bool>,
    pub lock_valid: bool,
    pub sticky_lock: bool,
}

/// Side effects the guider performs when entering the planned state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    InvalidateLockPosition,
    InvalidateCurrentPosition,
    BeginCalibration(MountRole),
    ResetDitherRecenter,
    AdjustCalibrationForPointing,
    LockToCurrentPosition,
    KeepStickyLock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: GuiderState,
    pub state: GuiderState,
    pub effects: Vec<TransitionEffect>,
}

/// Plan a transition from `current` toward `requested`.
///
/// A request may advance at most one rank. `Stop` resolves through
/// `stop_target`. Calibration requests fall through to the first mount
/// that still needs calibrating, or straight to `Calibrated`.
pub fn plan_transition(
    current: GuiderState,
    requested: GuiderState,
    ctx: &TransitionContext,
) -> Result<TransitionPlan, GuiderError> {
    let requested = if requested == GuiderState::Stop {
        current.stop_target()
    } else {
        requested
    };

    if requested.rank() > current.rank() + 1 {
        return Err(GuiderError::IllegalTransition {
            from: current,
            to: requested,
        });
    }

    use TransitionEffect::*;
    let (state, effects) = match requested {
        GuiderState::Uninitialized => (
            GuiderState::Uninitialized,
            vec![InvalidateLockPosition, InvalidateCurrentPosition],
        ),
        GuiderState::CalibratingPrimary if !ctx.primary_calibrated => (
            GuiderState::CalibratingPrimary,
            vec![BeginCalibration(MountRole::Primary)],
        ),
        GuiderState::CalibratingPrimary | GuiderState::CalibratingSecondary => {
            match ctx.secondary_calibrated {
                Some(false) => (
                    GuiderState::CalibratingSecondary,
                    vec![BeginCalibration(MountRole::Secondary)],
                ),
                _ => (GuiderState::Calibrated, Vec::new()),
            }
        }
        GuiderState::Guiding => {
            let lock = if ctx.lock_valid && ctx.sticky_lock {
                KeepStickyLock
            } else {
                LockToCurrentPosition
            };
            (
                GuiderState::Guiding,
                vec![ResetDitherRecenter, AdjustCalibrationForPointing, lock],
            )
        }
        other => (other, Vec::new()),
    };

    Ok(TransitionPlan {
        from: current,
        state,
        effects,
    })
}

/// Handling of a frame in which the star could not be located
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DroppedFrameAction {
    /// Report and keep looping
    ReportLooping,
    /// Drop the selection and report the star lost
    LoseSelection,
    /// Report the star lost and continue calibrating blindly
    BlunderOn,
    /// Report the star lost and let the guide algorithm dead-reckon
    DeadReckon,
    Ignore,
}

pub fn dropped_frame_action(state: GuiderState, ignore_lost_star_looping: bool) -> DroppedFrameAction {
    match state {
        GuiderState::Uninitialized | GuiderState::Selecting => DroppedFrameAction::ReportLooping,
        GuiderState::Selected if ignore_lost_star_looping => DroppedFrameAction::ReportLooping,
        GuiderState::Selected => DroppedFrameAction::LoseSelection,
        GuiderState::CalibratingPrimary | GuiderState::CalibratingSecondary => {
            DroppedFrameAction::BlunderOn
        }
        GuiderState::Guiding => DroppedFrameAction::DeadReckon,
        GuiderState::Calibrated | GuiderState::Stop => DroppedFrameAction::Ignore,
    }
}
