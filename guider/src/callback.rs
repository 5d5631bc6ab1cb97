use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::locator::{LostReason, StarMeasurement};
use crate::lock_shift::LockShiftParams;
use crate::mount::{MountRole, MoveKind, MoveResult};
use crate::position::{Offset, Position};
use crate::settle::{SettleOutcome, SettlingInfo};
use crate::state::{GuiderState, PauseType};

/// Details of one guide correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideStepInfo {
    pub frame_number: u64,
    /// Seconds since guiding started
    pub time: f64,
    pub camera_offset: Offset,
    pub mount_offset: Option<Offset>,
    pub kind: MoveKind,
    /// `None` if the mount failed to execute the move
    pub result: Option<MoveResult>,
    pub star: StarMeasurement,
    /// Short average guide error after this frame
    pub avg_distance: f64,
}

/// Details of a frame in which the star was not found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDroppedInfo {
    pub frame_number: u64,
    /// Seconds since guiding started, zero when not guiding
    pub time: f64,
    /// Last good measurement, if any
    pub last_star: Option<StarMeasurement>,
    pub reason: LostReason,
    pub avg_distance: f64,
    pub status: String,
    /// Caller should sound an audible alert
    pub beep: bool,
}

/// Events emitted for external callbacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GuiderCallbackEvent {
    StateChanged {
        from: GuiderState,
        to: GuiderState,
    },
    /// Frame processed while looping without guiding
    Looping {
        frame_number: u64,
        star: Option<StarMeasurement>,
    },
    StarSelected {
        position: Position,
    },
    StartCalibration {
        role: MountRole,
        mount: String,
    },
    CalibrationComplete {
        role: MountRole,
        mount: String,
    },
    CalibrationFailed {
        role: MountRole,
        mount: String,
        reason: String,
    },
    StartGuiding,
    GuidingStopped,
    Paused {
        pause: PauseType,
    },
    Resumed,
    GuideStep(GuideStepInfo),
    StarLost(FrameDroppedInfo),
    SettleBegin,
    Settling(SettlingInfo),
    SettleDone(SettleOutcome),
    LockPositionSet {
        position: Position,
    },
    LockPositionLost,
    LockPositionShiftLimitReached,
    /// Lock shift rate could not be applied; shifting was disabled
    LockPositionShiftFailed {
        reason: String,
    },
    LockShiftParamsChanged {
        params: LockShiftParams,
        /// Camera-axis rate in pixels per second, once known
        camera_rate: Option<Offset>,
    },
    /// Human-readable status for a failure the user must see
    Alert {
        message: String,
    },
}

/// Callback ID for registration/deregistration
pub type CallbackId = u64;

/// Callback function type
pub type GuiderCallback = Arc<dyn Fn(&GuiderCallbackEvent) + Send + Sync>;

/// Registered callbacks, shareable across threads.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: Arc<Mutex<HashMap<CallbackId, GuiderCallback>>>,
    next_callback_id: Arc<Mutex<CallbackId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for guider events
    pub fn register<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&GuiderCallbackEvent) + Send + Sync + 'static,
    {
        let mut callbacks = lock(&self.callbacks);
        let mut next_id = lock(&self.next_callback_id);

        let callback_id = *next_id;
        *next_id += 1;

        callbacks.insert(callback_id, Arc::new(callback));
        callback_id
    }

    /// Deregister a callback
    pub fn deregister(&self, callback_id: CallbackId) -> bool {
        lock(&self.callbacks).remove(&callback_id).is_some()
    }

    /// Get the number of registered callbacks
    pub fn count(&self) -> usize {
        lock(&self.callbacks).len()
    }

    /// Emit an event to all registered callbacks
    pub fn emit(&self, event: &GuiderCallbackEvent) {
        // Snapshot so a callback may register or deregister without deadlock
        let callbacks: Vec<GuiderCallback> = lock(&self.callbacks).values().cloned().collect();
        for callback in callbacks {
            callback(event);
        }
    }
}
