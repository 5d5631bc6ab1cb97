//! Autoguider control core
//!
//! The `Guider` processes one camera frame at a time: it locates the guide
//! star, measures its offset from the lock position and asks the mount for
//! a correction. It moves through star selection, calibration and guiding:
//! Uninitialized -> Selecting -> Selected -> Calibrating -> Calibrated -> Guiding

pub mod bookmarks;
pub mod callback;
pub mod camera;
pub mod cancel;
pub mod config;
pub mod control_loop;
pub mod distance_filter;
pub mod dither;
pub mod error;
pub mod image_size;
pub mod locator;
pub mod lock_shift;
pub mod mock;
pub mod mount;
pub mod position;
pub mod settle;
pub mod snapshot;
pub mod state;
pub mod timestamp;

use std::time::Duration;

use log::{debug, error, info, warn};
use rand::Rng;

pub use crate::bookmarks::Bookmarks;
pub use crate::callback::{
    CallbackId, CallbackRegistry, FrameDroppedInfo, GuideStepInfo, GuiderCallback,
    GuiderCallbackEvent,
};
pub use crate::camera::{Camera, CameraError, Frame, Subframe};
pub use crate::cancel::CancellationToken;
pub use crate::config::GuiderConfig;
pub use crate::control_loop::{GuideLoop, GuideLoopHandle, GuideLoopOptions, GuiderCommand};
pub use crate::distance_filter::{DistanceTracker, LARGE_DISTANCE};
pub use crate::dither::{DitherRecenter, DitherResult};
pub use crate::error::GuiderError;
pub use crate::image_size::ImageSize;
pub use crate::locator::{Located, LostReason, StarLocator, StarMeasurement};
pub use crate::lock_shift::{LockShiftParams, ShiftAxes, ShiftUnits};
pub use crate::mount::{
    CalibrationProgress, GuideParity, Mount, MountError, MountRole, MoveKind, MoveResult,
};
pub use crate::position::{GuideOffset, LockPosition, Offset, Position};
pub use crate::settle::{SettleMonitor, SettleOutcome, SettleParams, SettleStatus};
pub use crate::snapshot::GuiderSnapshot;
pub use crate::state::{ExposedState, GuiderState, PauseType};
pub use crate::timestamp::Timestamp;

use crate::state::{
    dropped_frame_action, plan_transition, DroppedFrameAction, TransitionContext,
    TransitionEffect,
};

/// A correction handed to the mount for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct GuideCorrection {
    pub kind: MoveKind,
    pub offset: GuideOffset,
    /// `None` when the mount rejected the move
    pub result: Option<MoveResult>,
}

/// Outcome of processing one frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameDecision {
    /// Guiding was stopped; `state` is where the guider came to rest
    Stopped { state: GuiderState },
    /// Frame skipped because guiding is paused
    Paused,
    /// The frame moved the state machine forward
    AdvanceState { from: GuiderState, to: GuiderState },
    /// Star located, nothing else to do
    Continue,
    Correction(GuideCorrection),
    /// Star not found; selection kept
    FrameDropped { reason: LostReason },
    /// Star not found and the selection was dropped
    StarLost { reason: LostReason },
    /// Calibration failed and the guider fell back to Uninitialized
    CalibrationFailed { role: MountRole, reason: String },
}

/// Guide state machine and the bookkeeping around it.
///
/// All mutation happens through `&mut self`; the guide loop owns the guider
/// on a single thread and publishes `GuiderSnapshot`s for readers.
pub struct Guider {
    config: GuiderConfig,
    mount: Box<dyn Mount>,
    secondary: Option<Box<dyn Mount>>,
    locator: Box<dyn StarLocator>,
    callbacks: CallbackRegistry,

    state: GuiderState,
    paused: PauseType,
    capture_active: bool,

    frame: Option<Frame>,
    frame_size: Option<ImageSize>,
    /// Timestamp of the newest frame seen
    now: Option<Timestamp>,
    star: Option<StarMeasurement>,
    star_lost: bool,
    force_full_frame: bool,

    lock: Option<LockPosition>,
    last_offset: Option<GuideOffset>,
    distance: DistanceTracker,

    shift: LockShiftParams,
    /// Camera-axis shift rate in pixels per second while shifting
    shift_rate: Option<Offset>,
    last_shift_update: Option<Timestamp>,

    recenter: Option<DitherRecenter>,
    settle: Option<SettleMonitor>,
    pending_settle: Option<SettleParams>,
    guiding_started: Option<Timestamp>,

    bookmarks: Bookmarks,
}

impl Guider {
    pub fn new(
        config: GuiderConfig,
        mount: Box<dyn Mount>,
        locator: Box<dyn StarLocator>,
    ) -> Result<Self, GuiderError> {
        config.validate()?;
        Ok(Self {
            config,
            mount,
            secondary: None,
            locator,
            callbacks: CallbackRegistry::new(),
            state: GuiderState::Uninitialized,
            paused: PauseType::None,
            capture_active: false,
            frame: None,
            frame_size: None,
            now: None,
            star: None,
            star_lost: false,
            force_full_frame: true,
            lock: None,
            last_offset: None,
            distance: DistanceTracker::new(),
            shift: LockShiftParams::default(),
            shift_rate: None,
            last_shift_update: None,
            recenter: None,
            settle: None,
            pending_settle: None,
            guiding_started: None,
            bookmarks: Bookmarks::new(),
        })
    }

    /// Attach a secondary (AO) mount that is calibrated after the primary.
    pub fn with_secondary_mount(mut self, mount: Box<dyn Mount>) -> Self {
        self.secondary = Some(mount);
        self
    }

    /// Register a callback for guider events
    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&GuiderCallbackEvent) + Send + Sync + 'static,
    {
        self.callbacks.register(callback)
    }

    /// Deregister a callback
    pub fn deregister_callback(&self, callback_id: CallbackId) -> bool {
        self.callbacks.deregister(callback_id)
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.count()
    }

    /// Shared handle to the callback registry
    pub fn callbacks(&self) -> CallbackRegistry {
        self.callbacks.clone()
    }

    fn emit(&self, event: GuiderCallbackEvent) {
        self.callbacks.emit(&event);
    }

    fn alert(&self, message: String) {
        error!("{message}");
        self.emit(GuiderCallbackEvent::Alert { message });
    }

    pub fn config(&self) -> &GuiderConfig {
        &self.config
    }

    pub fn mount(&self) -> &dyn Mount {
        self.mount.as_ref()
    }

    pub fn state(&self) -> GuiderState {
        self.state
    }

    pub fn pause_type(&self) -> PauseType {
        self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused != PauseType::None
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    pub fn frame_size(&self) -> Option<ImageSize> {
        self.frame_size
    }

    pub fn star(&self) -> Option<StarMeasurement> {
        self.star
    }

    pub fn current_position(&self) -> Option<Position> {
        self.star.map(|s| s.position)
    }

    pub fn lock_position(&self) -> Option<Position> {
        self.lock.as_ref().map(LockPosition::position)
    }

    pub fn last_offset(&self) -> Option<GuideOffset> {
        self.last_offset
    }

    /// True while the star is found and a lock position is set.
    pub fn is_locked(&self) -> bool {
        self.star.is_some() && !self.star_lost && self.lock.is_some()
    }

    pub fn lock_shift_params(&self) -> LockShiftParams {
        self.shift
    }

    /// Current lock shift in camera pixels per second.
    pub fn lock_shift_rate(&self) -> Option<Offset> {
        self.shift_rate
    }

    pub fn is_recentering(&self) -> bool {
        self.recenter.is_some()
    }

    pub fn is_settling(&self) -> bool {
        self.settle.is_some()
    }

    pub fn bookmarks(&self) -> &Bookmarks {
        &self.bookmarks
    }

    /// Short-term average guide error, or `LARGE_DISTANCE` when the star is stale.
    pub fn current_error(&self, ra_only: bool) -> f64 {
        self.distance
            .current_error(self.now.unwrap_or_default(), ra_only)
    }

    /// Long-term average guide error, or `LARGE_DISTANCE` when the star is stale.
    pub fn current_error_smoothed(&self, ra_only: bool) -> f64 {
        self.distance
            .current_error_smoothed(self.now.unwrap_or_default(), ra_only)
    }

    /// Tell the guider whether frames are being captured.
    pub fn set_capture_active(&mut self, active: bool) {
        self.capture_active = active;
    }

    pub fn exposed_state(&self) -> ExposedState {
        ExposedState::from_guider(
            self.state,
            self.paused,
            self.capture_active,
            self.star.is_some(),
            self.is_locked(),
        )
    }

    /// Change the pause mode, returning the previous one.
    pub fn set_paused(&mut self, pause: PauseType) -> PauseType {
        let prev = self.paused;
        if pause == prev {
            return prev;
        }
        self.paused = pause;
        info!("guider pause {:?} => {:?}", prev, pause);
        if prev == PauseType::Full {
            self.distance.request_reset();
        }
        match pause {
            PauseType::None => self.emit(GuiderCallbackEvent::Resumed),
            pause => self.emit(GuiderCallbackEvent::Paused { pause }),
        }
        prev
    }

    fn transition_context(&self) -> TransitionContext {
        TransitionContext {
            primary_calibrated: self.mount.is_calibrated(),
            secondary_calibrated: self
                .secondary
                .as_ref()
                .filter(|m| m.is_connected())
                .map(|m| m.is_calibrated()),
            lock_valid: self.lock.is_some(),
            sticky_lock: self.config.sticky_lock,
        }
    }

    /// Request a state change.
    ///
    /// A request may advance at most one state; any backward move is allowed.
    /// Entering a calibration state starts calibrating the relevant mount,
    /// and a failure to start rolls the guider back to Uninitialized.
    pub fn set_state(&mut self, requested: GuiderState) -> Result<(), GuiderError> {
        let plan = plan_transition(self.state, requested, &self.transition_context())
            .inspect_err(|e| error!("{e}"))?;
        debug!("changing from state {} to {}", self.state, plan.state);

        for effect in plan.effects {
            if let Err(e) = self.apply_effect(effect) {
                if let TransitionEffect::BeginCalibration(role) = effect {
                    let reason = e.to_string();
                    self.calibration_failed(role, &reason);
                    return Err(GuiderError::CalibrationFailed { role, reason });
                }
                return Err(e);
            }
        }

        let from = self.state;
        self.state = plan.state;
        if from != plan.state {
            info!("guider state {} => {}", from, plan.state);
            self.emit(GuiderCallbackEvent::StateChanged {
                from,
                to: plan.state,
            });
            if plan.state == GuiderState::Guiding {
                self.on_guiding_started()?;
            }
        }
        Ok(())
    }

    fn apply_effect(&mut self, effect: TransitionEffect) -> Result<(), GuiderError> {
        match effect {
            TransitionEffect::InvalidateLockPosition => {
                if self.lock.take().is_some() {
                    self.emit(GuiderCallbackEvent::LockPositionLost);
                }
            }
            TransitionEffect::InvalidateCurrentPosition => {
                self.star = None;
                self.star_lost = false;
                self.last_offset = None;
                self.force_full_frame = true;
            }
            TransitionEffect::BeginCalibration(role) => self.begin_calibration(role)?,
            TransitionEffect::ResetDitherRecenter => self.recenter = None,
            TransitionEffect::AdjustCalibrationForPointing => {
                self.mount.adjust_calibration_for_pointing();
                if let Some(secondary) = self.secondary.as_mut() {
                    secondary.adjust_calibration_for_pointing();
                }
            }
            TransitionEffect::LockToCurrentPosition => {
                let position = self.current_position().ok_or(GuiderError::NoStar)?;
                self.set_lock_position(position)?;
            }
            TransitionEffect::KeepStickyLock => debug!("keeping sticky lock position"),
        }
        Ok(())
    }

    fn mount_mut(&mut self, role: MountRole) -> Option<&mut dyn Mount> {
        match role {
            MountRole::Primary => Some(self.mount.as_mut()),
            MountRole::Secondary => match self.secondary.as_mut() {
                Some(mount) => Some(mount.as_mut()),
                None => None,
            },
        }
    }

    fn mount_name(&self, role: MountRole) -> String {
        match role {
            MountRole::Primary => self.mount.name().to_string(),
            MountRole::Secondary => self
                .secondary
                .as_ref()
                .map(|m| m.name().to_string())
                .unwrap_or_default(),
        }
    }

    fn begin_calibration(&mut self, role: MountRole) -> Result<(), GuiderError> {
        let position = self.current_position().ok_or(GuiderError::NoStar)?;
        let mount = self.mount_mut(role).ok_or(MountError::NotConnected)?;
        mount.begin_calibration(position)?;
        info!("{role} calibration started at ({:.2}, {:.2})", position.x, position.y);
        self.emit(GuiderCallbackEvent::StartCalibration {
            role,
            mount: self.mount_name(role),
        });
        Ok(())
    }

    fn calibration_failed(&mut self, role: MountRole, reason: &str) {
        self.emit(GuiderCallbackEvent::CalibrationFailed {
            role,
            mount: self.mount_name(role),
            reason: reason.to_string(),
        });
        self.alert(format!("{role} calibration failed: {reason}"));
        self.pending_settle = None;
        if let Err(e) = self.set_state(GuiderState::Uninitialized) {
            error!("could not reset after calibration failure: {e}");
        }
    }

    fn calibration_complete(&mut self, role: MountRole) {
        info!("{role} calibration complete");
        self.emit(GuiderCallbackEvent::CalibrationComplete {
            role,
            mount: self.mount_name(role),
        });
    }

    fn on_guiding_started(&mut self) -> Result<(), GuiderError> {
        self.guiding_started = self.now;
        self.last_shift_update = self.now;
        self.distance.request_reset();
        info!("guiding started");
        self.emit(GuiderCallbackEvent::StartGuiding);

        if self.shift.enabled {
            self.update_lock_shift_camera_rate()?;
        }
        if let Some(params) = self.pending_settle.take() {
            self.begin_settle(params);
        }
        Ok(())
    }

    /// Set the lock position, which must lie within the current frame.
    pub fn set_lock_position(&mut self, position: Position) -> Result<(), GuiderError> {
        let size = self.frame_size.ok_or(GuiderError::NoFrame)?;
        if !position.x.is_finite() || !position.y.is_finite() || !size.contains(position) {
            return Err(GuiderError::InvalidLockPosition {
                x: position.x,
                y: position.y,
            });
        }

        let previous = self.lock_position();
        debug!("setting lock position to ({:.2}, {:.2})", position.x, position.y);

        match self.lock.as_mut() {
            Some(lock) => lock.set(position),
            None => {
                let mut lock = LockPosition::new(position);
                if let (true, Some(rate)) = (self.shift.enabled, self.shift_rate) {
                    lock.set_shift_rate(rate);
                }
                self.lock = Some(lock);
            }
        }
        self.last_shift_update = self.now;

        if previous != Some(position) {
            if let (GuiderState::Guiding, Some(prev)) = (self.state, previous) {
                self.mount.notify_guiding_dithered(position - prev);
            }
            self.emit(GuiderCallbackEvent::LockPositionSet { position });
        }
        Ok(())
    }

    /// Lock onto the star nearest `hint` in the current frame.
    pub fn set_lock_position_to_star_at(&mut self, hint: Position) -> Result<Position, GuiderError> {
        let frame = self.frame.take().ok_or(GuiderError::NoFrame)?;
        let located = self.locator.locate(&frame, Some(hint));
        self.frame = Some(frame);

        match located {
            Located::Found(star) => {
                self.star = Some(star);
                self.star_lost = false;
                self.set_lock_position(star.position)?;
                Ok(star.position)
            }
            Located::NotFound(reason) => {
                warn!("no star near ({:.1}, {:.1}): {reason}", hint.x, hint.y);
                Err(GuiderError::NoStar)
            }
        }
    }

    /// Move the lock position by a mount-axis delta.
    ///
    /// The delta is reflected if needed to keep the lock position trackable.
    /// With fast recenter enabled a recenter trajectory is planned so the
    /// mount is walked to the new position instead of waiting for normal
    /// corrections to get there.
    pub fn move_lock_position(&mut self, mount_delta: Offset) -> Result<DitherResult, GuiderError> {
        if !mount_delta.x.is_finite() || !mount_delta.y.is_finite() {
            return Err(GuiderError::InvalidOffset {
                x: mount_delta.x,
                y: mount_delta.y,
            });
        }
        if !self.mount.is_calibrated() {
            return Err(GuiderError::MountNotCalibrated);
        }
        let size = self.frame_size.ok_or(GuiderError::NoFrame)?;
        let lock = self.lock_position().ok_or(GuiderError::NoLockPosition)?;

        let result = dither::compute_dither(
            lock,
            mount_delta,
            size,
            self.config.search_region,
            self.mount.as_ref(),
        )?;
        if !result.within_bounds {
            warn!("dither cannot keep the lock position trackable, using the safest variation");
        }

        self.set_lock_position(lock + result.camera_delta)?;

        let distance = result.camera_delta.norm();
        self.distance.add_offset(distance, result.mount_delta.x.abs());
        if self.config.fast_recenter {
            if let Some(plan) = DitherRecenter::plan(result.mount_delta, self.config.search_region) {
                self.recenter = Some(plan);
            }
        }

        info!(
            "lock position moved by ({:.2}, {:.2}) px, mount ({:.2}, {:.2})",
            result.camera_delta.x, result.camera_delta.y, result.mount_delta.x, result.mount_delta.y
        );
        Ok(result)
    }

    /// Dither by a random amount of up to `amount` pixels on each mount axis.
    pub fn dither<R>(
        &mut self,
        amount: f64,
        ra_only: bool,
        settle: Option<SettleParams>,
        rng: &mut R,
    ) -> Result<DitherResult, GuiderError>
    where
        R: Rng + ?Sized,
    {
        if !amount.is_finite() {
            return Err(GuiderError::InvalidOffset { x: amount, y: amount });
        }
        let amount = amount.abs();
        let mut sample = || {
            if amount > 0.0 {
                rng.random_range(-amount..=amount)
            } else {
                0.0
            }
        };
        let dx = sample();
        let dy = if ra_only { 0.0 } else { sample() };
        debug!("dither amount {amount:.2} ra_only={ra_only} => ({dx:.2}, {dy:.2})");
        self.dither_by(Offset::new(dx, dy), settle)
    }

    /// Dither by an explicit mount-axis delta and begin settling.
    pub fn dither_by(
        &mut self,
        mount_delta: Offset,
        settle: Option<SettleParams>,
    ) -> Result<DitherResult, GuiderError> {
        if self.state != GuiderState::Guiding {
            return Err(GuiderError::NotGuiding(self.state));
        }
        let result = self.move_lock_position(mount_delta)?;
        self.begin_settle(settle.unwrap_or(self.config.default_settle));
        Ok(result)
    }

    fn begin_settle(&mut self, params: SettleParams) {
        let now = self.now.unwrap_or_default();
        if let Some(previous) = self.settle.replace(SettleMonitor::begin(params, now)) {
            self.emit(GuiderCallbackEvent::SettleDone(
                previous.fail("settle superseded by a new request"),
            ));
        }
        debug!(
            "settle begin: tolerance {:.2} px, time {:?}, timeout {:?}",
            params.tolerance_px, params.settle_time, params.timeout
        );
        self.emit(GuiderCallbackEvent::SettleBegin);
    }

    fn update_settle(&mut self) {
        let locked = self.is_locked();
        let error = self.current_error(false);
        let now = self.now.unwrap_or_default();
        let Some(monitor) = self.settle.as_mut() else {
            return;
        };
        match monitor.update(locked, error, now) {
            SettleStatus::Settling(info) => self.emit(GuiderCallbackEvent::Settling(info)),
            SettleStatus::Done(outcome) => {
                self.settle = None;
                match &outcome.error {
                    None => info!("settle done after {} frames", outcome.settle_frames),
                    Some(e) => warn!("settle failed: {e}"),
                }
                self.emit(GuiderCallbackEvent::SettleDone(outcome));
            }
        }
    }

    /// Start calibrating (if needed) and guiding.
    ///
    /// When already guiding this only begins a new settle.
    pub fn start_guiding(&mut self, settle: Option<SettleParams>) -> Result<(), GuiderError> {
        let settle = settle.unwrap_or(self.config.default_settle);
        match self.state {
            GuiderState::Guiding => {
                self.begin_settle(settle);
                Ok(())
            }
            state if state.is_calibrating_or_guiding() => {
                self.pending_settle = Some(settle);
                Ok(())
            }
            _ => {
                self.pending_settle = Some(settle);
                let result = self.set_state(GuiderState::CalibratingPrimary);
                if result.is_err() {
                    self.pending_settle = None;
                }
                result
            }
        }
    }

    /// Stop calibrating or guiding, keeping the star selected.
    pub fn stop_guiding(&mut self) -> Result<(), GuiderError> {
        match self.state {
            GuiderState::CalibratingPrimary
            | GuiderState::CalibratingSecondary
            | GuiderState::Calibrated => {
                let role = if self.state == GuiderState::CalibratingSecondary {
                    MountRole::Secondary
                } else {
                    MountRole::Primary
                };
                self.emit(GuiderCallbackEvent::CalibrationFailed {
                    role,
                    mount: self.mount_name(role),
                    reason: "Calibration manually stopped".to_string(),
                });
                self.emit(GuiderCallbackEvent::GuidingStopped);
            }
            GuiderState::Guiding => {
                info!("guiding stopped");
                self.emit(GuiderCallbackEvent::GuidingStopped);
            }
            _ => {}
        }

        self.pending_settle = None;
        if let Some(monitor) = self.settle.take() {
            self.emit(GuiderCallbackEvent::SettleDone(monitor.fail("guiding stopped")));
        }
        self.recenter = None;
        self.guiding_started = None;
        self.shift_rate = None;
        if let Some(lock) = self.lock.as_mut() {
            lock.disable_shift();
        }
        self.set_state(GuiderState::Stop)
    }

    /// Return to Uninitialized, stopping guiding first.
    ///
    /// A full reset also forgets the guide error history.
    pub fn reset(&mut self, full: bool) -> Result<(), GuiderError> {
        if self.state.is_calibrating_or_guiding() {
            self.stop_guiding()?;
        }
        self.set_state(GuiderState::Uninitialized)?;
        if full {
            self.distance.clear();
            self.frame = None;
            self.now = None;
        }
        info!("guider reset (full={full})");
        Ok(())
    }

    pub fn enable_lock_shift(&mut self, enable: bool) -> Result<(), GuiderError> {
        self.set_lock_shift_params(LockShiftParams {
            enabled: enable,
            ..self.shift
        })
    }

    /// Replace the lock shift parameters.
    ///
    /// The camera-axis rate is recomputed once calibrated; a rate that cannot
    /// be transformed disables shifting and stops guiding.
    pub fn set_lock_shift_params(&mut self, params: LockShiftParams) -> Result<(), GuiderError> {
        if !params.rate.x.is_finite() || !params.rate.y.is_finite() {
            return Err(GuiderError::InvalidOffset {
                x: params.rate.x,
                y: params.rate.y,
            });
        }
        let was_enabled = self.shift.enabled;
        self.shift = params;
        debug!("lock shift params {:?}", params);

        if !params.enabled {
            self.shift_rate = None;
            if let Some(lock) = self.lock.as_mut() {
                lock.disable_shift();
            }
            self.emit(GuiderCallbackEvent::LockShiftParamsChanged {
                params,
                camera_rate: None,
            });
            return Ok(());
        }

        if !was_enabled {
            if let Some(lock) = self.lock.as_mut() {
                lock.begin_shift();
            }
            self.last_shift_update = self.now;
        }

        if matches!(self.state, GuiderState::Calibrated | GuiderState::Guiding) {
            self.update_lock_shift_camera_rate()
        } else {
            self.emit(GuiderCallbackEvent::LockShiftParamsChanged {
                params,
                camera_rate: None,
            });
            Ok(())
        }
    }

    fn update_lock_shift_camera_rate(&mut self) -> Result<(), GuiderError> {
        match lock_shift::camera_velocity(&self.shift, self.mount.as_ref(), self.config.pixel_scale)
        {
            Ok(rate) => {
                debug!("lock shift camera rate ({:.4}, {:.4}) px/s", rate.x, rate.y);
                self.shift_rate = Some(rate);
                if let Some(lock) = self.lock.as_mut() {
                    lock.set_shift_rate(rate);
                }
                self.last_shift_update = self.now;
                self.emit(GuiderCallbackEvent::LockShiftParamsChanged {
                    params: self.shift,
                    camera_rate: Some(rate),
                });
                Ok(())
            }
            Err(e) => {
                self.lock_shift_failed(&e);
                Err(e)
            }
        }
    }

    fn lock_shift_failed(&mut self, err: &GuiderError) {
        self.shift.enabled = false;
        self.shift_rate = None;
        if let Some(lock) = self.lock.as_mut() {
            lock.disable_shift();
        }
        self.emit(GuiderCallbackEvent::LockPositionShiftFailed {
            reason: err.to_string(),
        });
        self.alert(format!("Lock position shift disabled: {err}"));
        if self.state.is_calibrating_or_guiding() {
            if let Err(e) = self.stop_guiding() {
                error!("could not stop guiding after lock shift failure: {e}");
            }
        }
    }

    fn shift_lock_position(&mut self) {
        let (Some(now), Some(lock)) = (self.now, self.lock.as_mut()) else {
            return;
        };
        let elapsed = self
            .last_shift_update
            .map_or(0.0, |t| now.seconds_since(t).max(0.0));
        self.last_shift_update = Some(now);

        let position = lock.apply_shift(elapsed);
        let valid = self
            .frame_size
            .is_some_and(|size| size.is_valid_lock_position(position, self.config.search_region));
        debug!(
            "shifted lock position to ({:.2}, {:.2}) valid={valid}",
            position.x, position.y
        );

        if !valid {
            self.emit(GuiderCallbackEvent::LockPositionShiftLimitReached);
            self.alert(
                "Shifted lock position outside allowable area. Lock Position Shift disabled."
                    .to_string(),
            );
            if let Err(e) = self.enable_lock_shift(false) {
                error!("could not disable lock shift: {e}");
            }
        }
    }

    fn accept_frame(&mut self, frame: Frame) {
        self.frame_size = Some(frame.size());
        self.now = Some(self.now.map_or(frame.timestamp, |now| now.max(frame.timestamp)));
        self.frame = Some(frame);
    }

    /// Account for a frame the camera failed to deliver.
    ///
    /// The failure is reported through an alert and counts as a dropped
    /// frame for an active settle. The guider clock moves on by `exposure`
    /// so a dead camera eventually makes the star stale.
    pub fn frame_capture_failed(&mut self, err: &CameraError, exposure: Duration) {
        self.now = self.now.map(|now| now.after(exposure));
        self.alert(format!("camera capture failed: {err}"));
        self.force_full_frame = true;
        if self.star.is_some() {
            self.star_lost = true;
        }
        if self.state == GuiderState::Guiding && self.paused == PauseType::None {
            self.update_settle();
        }
    }

    fn time_since_guiding_started(&self) -> f64 {
        match (self.guiding_started, self.now) {
            (Some(start), Some(now)) => now.seconds_since(start),
            _ => 0.0,
        }
    }

    /// Process one frame.
    ///
    /// `frame` replaces the current frame; `None` reprocesses the last one.
    /// When `stopping` is set, or `cancel` has fired, guiding is stopped
    /// instead and the frame is not examined.
    pub fn update_guide_state(
        &mut self,
        frame: Option<Frame>,
        stopping: bool,
        cancel: &CancellationToken,
    ) -> Result<FrameDecision, GuiderError> {
        if let Some(frame) = frame {
            self.accept_frame(frame);
        }

        if stopping || cancel.is_cancelled() {
            self.stop_guiding()?;
            return Ok(FrameDecision::Stopped { state: self.state });
        }

        let frame = self.frame.take().ok_or(GuiderError::NoFrame)?;
        let result = self.process_frame(&frame, cancel);
        self.frame = Some(frame);
        result
    }

    fn process_frame(
        &mut self,
        frame: &Frame,
        cancel: &CancellationToken,
    ) -> Result<FrameDecision, GuiderError> {
        if self.paused == PauseType::Full {
            debug!("skipping frame {}, guider is fully paused", frame.frame_number);
            return Ok(FrameDecision::Paused);
        }

        let was_guiding = self.state == GuiderState::Guiding;
        if self.shift.enabled && was_guiding {
            self.shift_lock_position();
        }

        let located = self.locator.locate(frame, self.current_position());
        let decision = match located {
            Located::Found(star) => self.handle_star(frame, star, cancel)?,
            Located::NotFound(reason) => self.handle_dropped_frame(frame, reason, cancel)?,
        };

        if was_guiding && self.state == GuiderState::Guiding && self.paused == PauseType::None {
            self.update_settle();
        }
        Ok(decision)
    }

    fn handle_dropped_frame(
        &mut self,
        frame: &Frame,
        reason: LostReason,
        cancel: &CancellationToken,
    ) -> Result<FrameDecision, GuiderError> {
        self.star_lost = true;
        let info = FrameDroppedInfo {
            frame_number: frame.frame_number,
            time: self.time_since_guiding_started(),
            last_star: self.star,
            reason: reason.clone(),
            avg_distance: self.current_error(false),
            status: reason.to_string(),
            beep: false,
        };

        match dropped_frame_action(self.state, self.config.ignore_lost_star_looping) {
            DroppedFrameAction::ReportLooping => {
                self.emit(GuiderCallbackEvent::Looping {
                    frame_number: frame.frame_number,
                    star: None,
                });
                Ok(FrameDecision::FrameDropped { reason })
            }
            DroppedFrameAction::LoseSelection => {
                warn!("star lost while looping: {reason}");
                self.emit(GuiderCallbackEvent::Looping {
                    frame_number: frame.frame_number,
                    star: None,
                });
                self.set_state(GuiderState::Uninitialized)?;
                self.emit(GuiderCallbackEvent::StarLost(info));
                Ok(FrameDecision::StarLost { reason })
            }
            DroppedFrameAction::BlunderOn => {
                warn!("star lost during calibration, continuing: {reason}");
                self.emit(GuiderCallbackEvent::StarLost(info));
                Ok(FrameDecision::FrameDropped { reason })
            }
            DroppedFrameAction::DeadReckon => {
                warn!("frame {} dropped while guiding: {reason}", frame.frame_number);
                self.emit(GuiderCallbackEvent::StarLost(FrameDroppedInfo {
                    beep: self.config.beep_on_lost_star,
                    ..info
                }));
                if self.paused == PauseType::None {
                    self.issue_correction(&GuideOffset::zero(), MoveKind::DeducedMove, cancel)?;
                }
                Ok(FrameDecision::FrameDropped { reason })
            }
            DroppedFrameAction::Ignore => Ok(FrameDecision::FrameDropped { reason }),
        }
    }

    fn handle_star(
        &mut self,
        frame: &Frame,
        star: StarMeasurement,
        cancel: &CancellationToken,
    ) -> Result<FrameDecision, GuiderError> {
        self.star = Some(star);
        self.star_lost = false;
        if self.force_full_frame {
            debug!("star found, subframes allowed again");
            self.force_full_frame = false;
        }

        let offset = self.lock_position().map(|lock| {
            let camera = star.position - lock;
            let mount = if self.mount.is_calibrated() {
                self.mount.transform_camera_to_mount(camera)
            } else {
                None
            };
            GuideOffset { camera, mount }
        });
        if let Some(offset) = offset {
            self.distance.update(
                offset.distance(),
                offset.ra_distance(),
                self.state == GuiderState::Guiding,
                self.now.unwrap_or(frame.timestamp),
            );
        }
        self.last_offset = offset;

        if self.state.is_looping() {
            self.emit(GuiderCallbackEvent::Looping {
                frame_number: frame.frame_number,
                star: Some(star),
            });
        }

        if self.paused != PauseType::None {
            debug!("skipping frame {}, guider is paused", frame.frame_number);
            return Ok(FrameDecision::Paused);
        }

        match self.state {
            GuiderState::Uninitialized | GuiderState::Selecting => {
                let from = self.state;
                if from == GuiderState::Uninitialized {
                    self.set_state(GuiderState::Selecting)?;
                }
                self.set_lock_position(star.position)?;
                info!(
                    "star selected at ({:.2}, {:.2})",
                    star.position.x, star.position.y
                );
                self.emit(GuiderCallbackEvent::StarSelected {
                    position: star.position,
                });
                self.set_state(GuiderState::Selected)?;
                Ok(FrameDecision::AdvanceState {
                    from,
                    to: GuiderState::Selected,
                })
            }
            GuiderState::Selected | GuiderState::Stop => Ok(FrameDecision::Continue),
            GuiderState::CalibratingPrimary
            | GuiderState::CalibratingSecondary
            | GuiderState::Calibrated => self.advance_calibration(star.position),
            GuiderState::Guiding => {
                let offset = offset.ok_or(GuiderError::NoLockPosition)?;
                self.guide(frame.frame_number, star, offset, cancel)
            }
        }
    }

    /// Change state inside frame processing, turning a calibration failure
    /// into a frame decision.
    fn transition_in_frame(
        &mut self,
        to: GuiderState,
    ) -> Result<Option<FrameDecision>, GuiderError> {
        match self.set_state(to) {
            Ok(()) => Ok(None),
            Err(GuiderError::CalibrationFailed { role, reason }) => {
                Ok(Some(FrameDecision::CalibrationFailed { role, reason }))
            }
            Err(e) => Err(e),
        }
    }

    fn calibration_step(&mut self, role: MountRole, position: Position) -> Option<FrameDecision> {
        let progress = match self.mount_mut(role) {
            Some(mount) if mount.is_connected() && !mount.is_calibrated() => {
                mount.update_calibration_state(position)
            }
            _ => return None,
        };
        match progress {
            Ok(CalibrationProgress::InProgress) => Some(FrameDecision::Continue),
            Ok(CalibrationProgress::Complete) => {
                self.calibration_complete(role);
                None
            }
            Err(e) => {
                let reason = e.to_string();
                self.calibration_failed(role, &reason);
                Some(FrameDecision::CalibrationFailed { role, reason })
            }
        }
    }

    /// Feed a star position to the calibrating mount and advance through
    /// the calibration states as each mount completes.
    fn advance_calibration(&mut self, position: Position) -> Result<FrameDecision, GuiderError> {
        let from = self.state;

        if self.state == GuiderState::CalibratingPrimary {
            if let Some(decision) = self.calibration_step(MountRole::Primary, position) {
                return Ok(decision);
            }
            if let Some(decision) = self.transition_in_frame(GuiderState::CalibratingSecondary)? {
                return Ok(decision);
            }
            if self.state == GuiderState::CalibratingSecondary {
                return Ok(FrameDecision::AdvanceState {
                    from,
                    to: self.state,
                });
            }
        }

        if self.state == GuiderState::CalibratingSecondary {
            if let Some(decision) = self.calibration_step(MountRole::Secondary, position) {
                return Ok(decision);
            }
            self.set_state(GuiderState::Calibrated)?;
        }

        self.set_state(GuiderState::Guiding)?;
        Ok(FrameDecision::AdvanceState {
            from,
            to: self.state,
        })
    }

    fn guide(
        &mut self,
        frame_number: u64,
        star: StarMeasurement,
        offset: GuideOffset,
        cancel: &CancellationToken,
    ) -> Result<FrameDecision, GuiderError> {
        let recenter_step = self.recenter.as_mut().map(DitherRecenter::next_step);

        let (kind, correction) = match recenter_step {
            Some(step) => {
                if step.done {
                    debug!("fast recenter complete");
                    self.recenter = None;
                    self.distance.request_reset();
                }
                let camera = self
                    .mount
                    .transform_mount_to_camera(step.mount_offset)
                    .ok_or(GuiderError::TransformFailed("mount to camera"))?;
                let correction = GuideOffset {
                    camera,
                    mount: Some(step.mount_offset),
                };
                (MoveKind::RecoveryMove, correction)
            }
            None => (MoveKind::GuideStep, offset),
        };

        let result = self.issue_correction(&correction, kind, cancel)?;
        if let (MoveKind::RecoveryMove, Some(_), Some(mount_offset)) =
            (kind, result, correction.mount)
        {
            self.mount.notify_direct_move(mount_offset);
        }

        self.emit(GuiderCallbackEvent::GuideStep(GuideStepInfo {
            frame_number,
            time: self.time_since_guiding_started(),
            camera_offset: correction.camera,
            mount_offset: correction.mount,
            kind,
            result,
            star,
            avg_distance: self.current_error(false),
        }));

        Ok(FrameDecision::Correction(GuideCorrection {
            kind,
            offset: correction,
            result,
        }))
    }

    /// Hand a correction to the primary mount.
    ///
    /// Mount failures are reported through an alert and yield `None`;
    /// cancellation is returned as an error.
    fn issue_correction(
        &mut self,
        offset: &GuideOffset,
        kind: MoveKind,
        cancel: &CancellationToken,
    ) -> Result<Option<MoveResult>, GuiderError> {
        match self.mount.issue_correction(offset, kind, cancel) {
            Ok(result) => Ok(Some(result)),
            Err(MountError::Cancelled) => {
                warn!("{kind:?} cancelled");
                Err(GuiderError::Cancelled)
            }
            Err(e) => {
                self.alert(format!("guide correction not issued: {e}"));
                Ok(None)
            }
        }
    }

    pub fn toggle_bookmark(&mut self, position: Position) {
        self.bookmarks.toggle(position);
    }

    /// Bookmark the lock position; false when there is none.
    pub fn bookmark_lock_position(&mut self) -> bool {
        match self.lock_position() {
            Some(position) => {
                self.bookmarks.add(position);
                true
            }
            None => false,
        }
    }

    /// Bookmark the star position; false when no star is found.
    pub fn bookmark_current_position(&mut self) -> bool {
        match self.star.filter(|_| !self.star_lost) {
            Some(star) => {
                self.bookmarks.add(star.position);
                true
            }
            None => false,
        }
    }

    pub fn delete_all_bookmarks(&mut self) {
        self.bookmarks.clear();
    }

    pub fn set_show_bookmarks(&mut self, show: bool) {
        self.bookmarks.visible = show;
    }

    /// Readout region for the next exposure; `None` asks for a full frame.
    pub fn subframe_hint(&self) -> Option<Subframe> {
        if self.force_full_frame || self.star_lost {
            return None;
        }
        let star = self.star?;
        let size = self.frame_size?;
        let half = self.config.search_region.ceil() as usize + self.config.subframe_padding;
        Subframe::centered(star.position, half, size)
    }

    /// Request full frames until the star is found again.
    pub fn force_full_frame(&mut self) {
        self.force_full_frame = true;
    }

    pub fn snapshot(&self) -> GuiderSnapshot {
        GuiderSnapshot {
            state: self.state,
            exposed_state: self.exposed_state(),
            paused: self.paused,
            frame_number: self.frame.as_ref().map(|f| f.frame_number),
            timestamp: self.now,
            star: self.star,
            lock_position: self.lock_position(),
            last_offset: self.last_offset,
            locked: self.is_locked(),
            current_error: self.current_error(false),
            current_error_smoothed: self.current_error_smoothed(false),
            lock_shift: self.shift,
            lock_shift_rate: self.shift_rate,
            recenter_in_progress: self.is_recentering(),
            settling: self.is_settling(),
            bookmarks: self.bookmarks.positions().to_vec(),
            subframe: self.subframe_hint(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCamera, MockMount, ScriptedLocator};
    use approx::assert_relative_eq;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Rig {
        guider: Guider,
        mount: MockMount,
        locator: ScriptedLocator,
        camera: MockCamera,
        events: Arc<Mutex<Vec<GuiderCallbackEvent>>>,
        cancel: CancellationToken,
    }

    impl Rig {
        fn new(mount: MockMount) -> Self {
            let _ = env_logger::builder().is_test(true).try_init();
            let locator = ScriptedLocator::new();
            let guider = Guider::new(
                GuiderConfig::default(),
                Box::new(mount.clone()),
                Box::new(locator.clone()),
            )
            .unwrap();
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = events.clone();
            guider.register_callback(move |e| sink.lock().unwrap().push(e.clone()));
            Self {
                guider,
                mount,
                locator,
                camera: MockCamera::new(ImageSize::from_width_height(200, 200), Duration::from_secs(1)),
                events,
                cancel: CancellationToken::new(),
            }
        }

        fn step_found(&mut self, x: f64, y: f64) -> FrameDecision {
            self.locator.push_found(x, y);
            let frame = self.camera.next_frame();
            self.guider
                .update_guide_state(Some(frame), false, &self.cancel)
                .unwrap()
        }

        fn step_lost(&mut self) -> FrameDecision {
            self.locator.push_lost(LostReason::LowSnr);
            let frame = self.camera.next_frame();
            self.guider
                .update_guide_state(Some(frame), false, &self.cancel)
                .unwrap()
        }

        fn events(&self) -> Vec<GuiderCallbackEvent> {
            self.events.lock().unwrap().clone()
        }

        fn guiding(mount: MockMount) -> Self {
            let mut rig = Self::new(mount);
            rig.step_found(100.0, 100.0);
            rig.guider.start_guiding(None).unwrap();
            rig.step_found(100.0, 100.0);
            assert_eq!(rig.guider.state(), GuiderState::Guiding);
            rig
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = GuiderConfig {
            search_region: 0.0,
            ..GuiderConfig::default()
        };
        let result = Guider::new(
            config,
            Box::new(MockMount::calibrated_identity()),
            Box::new(ScriptedLocator::new()),
        );
        assert!(matches!(result, Err(GuiderError::InvalidConfig(_))));
    }

    #[test]
    fn test_first_star_selects_and_locks() {
        let mut rig = Rig::new(MockMount::calibrated_identity());
        let decision = rig.step_found(50.0, 60.0);
        assert_eq!(
            decision,
            FrameDecision::AdvanceState {
                from: GuiderState::Uninitialized,
                to: GuiderState::Selected
            }
        );
        assert_eq!(rig.guider.lock_position(), Some(Position::new(50.0, 60.0)));
        assert!(rig.guider.is_locked());
        assert!(rig
            .events()
            .contains(&GuiderCallbackEvent::StarSelected {
                position: Position::new(50.0, 60.0)
            }));
    }

    #[test]
    fn test_illegal_skip_rejected() {
        let mut rig = Rig::new(MockMount::calibrated_identity());
        let err = rig.guider.set_state(GuiderState::Guiding).unwrap_err();
        assert!(matches!(err, GuiderError::IllegalTransition { .. }));
        assert_eq!(rig.guider.state(), GuiderState::Uninitialized);
    }

    #[test]
    fn test_calibrated_mount_goes_straight_to_guiding() {
        let mut rig = Rig::new(MockMount::calibrated_identity());
        rig.step_found(100.0, 100.0);
        rig.guider.start_guiding(None).unwrap();
        assert_eq!(rig.guider.state(), GuiderState::Calibrated);

        let decision = rig.step_found(100.5, 100.0);
        assert_eq!(
            decision,
            FrameDecision::AdvanceState {
                from: GuiderState::Calibrated,
                to: GuiderState::Guiding
            }
        );
        assert!(rig.guider.is_settling());
        assert!(rig.events().contains(&GuiderCallbackEvent::StartGuiding));
        assert_eq!(rig.mount.adjust_calls(), 1);
    }

    #[test]
    fn test_guide_step_offset_is_star_minus_lock() {
        let mut rig = Rig::guiding(MockMount::calibrated_identity());
        let decision = rig.step_found(102.0, 99.0);
        let FrameDecision::Correction(correction) = decision else {
            panic!("expected a correction, got {decision:?}");
        };
        assert_eq!(correction.kind, MoveKind::GuideStep);
        assert_relative_eq!(correction.offset.camera.x, 2.0);
        assert_relative_eq!(correction.offset.camera.y, -1.0);
        assert!(correction.result.is_some());
        assert_eq!(rig.mount.corrections().len(), 1);
    }

    #[test]
    fn test_begin_calibration_failure_rolls_back() {
        let mount = MockMount::new("test", 3);
        mount.fail_begin_calibration("no pulse guiding");
        let mut rig = Rig::new(mount);
        rig.step_found(100.0, 100.0);

        let err = rig.guider.start_guiding(None).unwrap_err();
        assert!(matches!(err, GuiderError::CalibrationFailed { .. }));
        assert_eq!(rig.guider.state(), GuiderState::Uninitialized);
        assert!(rig.guider.lock_position().is_none());
        assert!(rig
            .events()
            .iter()
            .any(|e| matches!(e, GuiderCallbackEvent::Alert { .. })));
    }

    #[test]
    fn test_dither_requires_guiding() {
        let mut rig = Rig::new(MockMount::calibrated_identity());
        rig.step_found(100.0, 100.0);
        let err = rig.guider.dither_by(Offset::new(3.0, 0.0), None).unwrap_err();
        assert!(matches!(err, GuiderError::NotGuiding(GuiderState::Selected)));
    }

    #[test]
    fn test_dither_moves_lock_and_plans_recenter() {
        let mut rig = Rig::guiding(MockMount::calibrated_identity());
        let result = rig.guider.dither_by(Offset::new(4.0, -3.0), None).unwrap();
        assert!(result.within_bounds);
        assert_eq!(rig.guider.lock_position(), Some(Position::new(104.0, 97.0)));
        assert!(rig.guider.is_recentering());
        assert_eq!(rig.mount.dithered(), vec![Offset::new(4.0, -3.0)]);

        let decision = rig.step_found(100.0, 100.0);
        let FrameDecision::Correction(correction) = decision else {
            panic!("expected a correction, got {decision:?}");
        };
        assert_eq!(correction.kind, MoveKind::RecoveryMove);
        assert_eq!(rig.mount.direct_moves().len(), 1);
    }

    #[test]
    fn test_zero_dither_keeps_recenter_in_progress() {
        let mut rig = Rig::guiding(MockMount::calibrated_identity());
        rig.guider.dither_by(Offset::new(30.0, 0.0), None).unwrap();
        rig.step_found(100.0, 100.0);
        assert!(rig.guider.is_recentering());

        let result = rig.guider.dither_by(Offset::zeros(), None).unwrap();
        assert_eq!(result.camera_delta, Offset::zeros());
        assert!(rig.guider.is_recentering());
        assert!(rig.guider.is_settling());

        let decision = rig.step_found(110.5, 100.0);
        let FrameDecision::Correction(correction) = decision else {
            panic!("expected a correction, got {decision:?}");
        };
        assert_eq!(correction.kind, MoveKind::RecoveryMove);
    }

    #[test]
    fn test_lost_star_while_guiding_dead_reckons() {
        let mut rig = Rig::guiding(MockMount::calibrated_identity());
        let decision = rig.step_lost();
        assert_eq!(
            decision,
            FrameDecision::FrameDropped {
                reason: LostReason::LowSnr
            }
        );
        assert_eq!(rig.guider.state(), GuiderState::Guiding);
        assert!(!rig.guider.is_locked());
        let (_, kind) = rig.mount.corrections().last().copied().unwrap();
        assert_eq!(kind, MoveKind::DeducedMove);
        assert!(rig.events().iter().any(|e| matches!(
            e,
            GuiderCallbackEvent::StarLost(FrameDroppedInfo { beep: true, .. })
        )));
    }

    #[test]
    fn test_lost_star_while_selected_drops_selection() {
        let mut rig = Rig::new(MockMount::calibrated_identity());
        rig.step_found(100.0, 100.0);
        let decision = rig.step_lost();
        assert_eq!(
            decision,
            FrameDecision::StarLost {
                reason: LostReason::LowSnr
            }
        );
        assert_eq!(rig.guider.state(), GuiderState::Uninitialized);
        assert!(rig.guider.current_position().is_none());
    }

    #[test]
    fn test_guiding_pause_skips_corrections() {
        let mut rig = Rig::guiding(MockMount::calibrated_identity());
        assert_eq!(rig.guider.set_paused(PauseType::Guiding), PauseType::None);
        let before = rig.mount.corrections().len();
        assert_eq!(rig.step_found(101.0, 100.0), FrameDecision::Paused);
        assert_eq!(rig.mount.corrections().len(), before);
        assert_eq!(rig.guider.current_position(), Some(Position::new(101.0, 100.0)));
        assert_eq!(rig.guider.exposed_state(), ExposedState::Paused);
    }

    #[test]
    fn test_full_pause_skips_location() {
        let mut rig = Rig::guiding(MockMount::calibrated_identity());
        rig.guider.set_paused(PauseType::Full);
        let hints = rig.locator.hints().len();
        assert_eq!(rig.step_found(150.0, 150.0), FrameDecision::Paused);
        assert_eq!(rig.locator.hints().len(), hints);
        assert_eq!(rig.guider.current_position(), Some(Position::new(100.0, 100.0)));
    }

    #[test]
    fn test_stop_keeps_selection() {
        let mut rig = Rig::guiding(MockMount::calibrated_identity());
        let decision = rig
            .guider
            .update_guide_state(None, true, &rig.cancel)
            .unwrap();
        assert_eq!(
            decision,
            FrameDecision::Stopped {
                state: GuiderState::Selected
            }
        );
        assert!(rig.events().contains(&GuiderCallbackEvent::GuidingStopped));
        let settle_done = rig
            .events()
            .into_iter()
            .filter(|e| matches!(e, GuiderCallbackEvent::SettleDone(_)))
            .count();
        assert_eq!(settle_done, 1);
    }

    #[test]
    fn test_set_lock_position_outside_frame() {
        let mut rig = Rig::new(MockMount::calibrated_identity());
        rig.step_found(100.0, 100.0);
        let err = rig
            .guider
            .set_lock_position(Position::new(250.0, 10.0))
            .unwrap_err();
        assert!(matches!(err, GuiderError::InvalidLockPosition { .. }));
        assert_eq!(rig.guider.lock_position(), Some(Position::new(100.0, 100.0)));
    }

    #[test]
    fn test_subframe_hint_follows_star() {
        let mut rig = Rig::new(MockMount::calibrated_identity());
        assert!(rig.guider.subframe_hint().is_none());
        rig.step_found(100.0, 100.0);
        let sub = rig.guider.subframe_hint().unwrap();
        assert!(sub.contains(Position::new(100.0, 100.0)));
        rig.guider.force_full_frame();
        assert!(rig.guider.subframe_hint().is_none());
    }

    #[test]
    fn test_bookmarks() {
        let mut rig = Rig::new(MockMount::calibrated_identity());
        assert!(!rig.guider.bookmark_lock_position());
        rig.step_found(100.0, 100.0);
        assert!(rig.guider.bookmark_lock_position());
        assert!(rig.guider.bookmark_current_position());
        assert_eq!(rig.guider.bookmarks().len(), 1);
        rig.guider.toggle_bookmark(Position::new(30.0, 30.0));
        assert_eq!(rig.guider.snapshot().bookmarks.len(), 2);
        rig.guider.delete_all_bookmarks();
        assert!(rig.guider.bookmarks().is_empty());
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let rig = Rig::guiding(MockMount::calibrated_identity());
        let snapshot = rig.guider.snapshot();
        assert_eq!(snapshot.state, GuiderState::Guiding);
        assert_eq!(snapshot.lock_position, Some(Position::new(100.0, 100.0)));
        assert!(snapshot.locked);
        assert!(snapshot.to_json().is_ok());
    }

    #[test]
    fn test_reset_returns_to_uninitialized() {
        let mut rig = Rig::guiding(MockMount::calibrated_identity());
        rig.guider.reset(true).unwrap();
        assert_eq!(rig.guider.state(), GuiderState::Uninitialized);
        assert!(rig.guider.lock_position().is_none());
        assert!(rig.guider.current_position().is_none());
        assert_eq!(rig.guider.current_error(false), LARGE_DISTANCE);
    }
}
