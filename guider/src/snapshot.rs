use serde::{Deserialize, Serialize};

use crate::camera::Subframe;
use crate::locator::StarMeasurement;
use crate::lock_shift::LockShiftParams;
use crate::position::{GuideOffset, Offset, Position};
use crate::state::{ExposedState, GuiderState, PauseType};
use crate::timestamp::Timestamp;

/// Immutable copy of the guider state for status readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuiderSnapshot {
    pub state: GuiderState,
    pub exposed_state: ExposedState,
    pub paused: PauseType,
    pub frame_number: Option<u64>,
    pub timestamp: Option<Timestamp>,
    pub star: Option<StarMeasurement>,
    pub lock_position: Option<Position>,
    pub last_offset: Option<GuideOffset>,
    pub locked: bool,
    pub current_error: f64,
    pub current_error_smoothed: f64,
    pub lock_shift: LockShiftParams,
    /// Lock shift in camera pixels per second
    pub lock_shift_rate: Option<Offset>,
    pub recenter_in_progress: bool,
    pub settling: bool,
    pub bookmarks: Vec<Position>,
    pub subframe: Option<Subframe>,
}

impl GuiderSnapshot {
    pub fn current_position(&self) -> Option<Position> {
        self.star.map(|s| s.position)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
