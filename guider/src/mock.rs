//! Mock collaborators for testing
//!
//! Each mock keeps its state behind `Arc<Mutex<..>>` so a test can keep a
//! clone for inspection after handing the mock to a `Guider`.

use nalgebra::{Matrix2, Rotation2};
use ndarray::Array2;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::camera::{Camera, CameraError, Frame, Subframe};
use crate::cancel::CancellationToken;
use crate::image_size::ImageSize;
use crate::locator::{Located, LostReason, StarLocator, StarMeasurement};
use crate::mount::{
    AxisMove, CalibrationProgress, GuideDirection, GuideParity, Mount, MountError, MoveKind,
    MoveResult,
};
use crate::position::{GuideOffset, Offset, Position};
use crate::timestamp::Timestamp;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Milliseconds of pulse per unit of mount offset
const MOCK_GUIDE_RATE_MS: f64 = 100.0;

struct MockMountState {
    connected: bool,
    calibrated: bool,
    calibration_steps_required: usize,
    calibration_steps: usize,
    calibration_failure: Option<String>,
    begin_calibration_failure: Option<String>,
    /// camera = mount_to_camera * mount
    mount_to_camera: Matrix2<f64>,
    ra_parity: GuideParity,
    dec_parity: GuideParity,
    declination: Option<f64>,
    pulse_duration: Duration,
    pulse_failure: Option<String>,
    pulse_in_flight: bool,
    corrections: Vec<(GuideOffset, MoveKind)>,
    dithered: Vec<Offset>,
    direct_moves: Vec<Offset>,
    adjust_calls: usize,
}

/// Mount double that calibrates after a fixed number of steps
#[derive(Clone)]
pub struct MockMount {
    name: String,
    state: Arc<Mutex<MockMountState>>,
}

impl MockMount {
    /// Uncalibrated mount completing calibration on step `calibration_steps`
    pub fn new(name: &str, calibration_steps: usize) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MockMountState {
                connected: true,
                calibrated: false,
                calibration_steps_required: calibration_steps,
                calibration_steps: 0,
                calibration_failure: None,
                begin_calibration_failure: None,
                mount_to_camera: Matrix2::identity(),
                ra_parity: GuideParity::Even,
                dec_parity: GuideParity::Even,
                declination: None,
                pulse_duration: Duration::ZERO,
                pulse_failure: None,
                pulse_in_flight: false,
                corrections: Vec::new(),
                dithered: Vec::new(),
                direct_moves: Vec::new(),
                adjust_calls: 0,
            })),
        }
    }

    /// Calibrated mount whose axes coincide with the camera axes
    pub fn calibrated_identity() -> Self {
        let mount = Self::new("mock mount", 0);
        lock(&mount.state).calibrated = true;
        mount
    }

    /// Calibrated mount with axes rotated by `angle` radians and scaled
    pub fn calibrated_scaled(scale: f64, angle: f64) -> Self {
        let mount = Self::calibrated_identity();
        mount.set_transform(Rotation2::new(angle).into_inner() * scale);
        mount
    }

    pub fn set_transform(&self, mount_to_camera: Matrix2<f64>) {
        lock(&self.state).mount_to_camera = mount_to_camera;
    }

    pub fn set_parity(&mut self, ra: GuideParity, dec: GuideParity) {
        let mut state = lock(&self.state);
        state.ra_parity = ra;
        state.dec_parity = dec;
    }

    pub fn set_declination(&mut self, declination: Option<f64>) {
        lock(&self.state).declination = declination;
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    pub fn set_calibrated(&self, calibrated: bool) {
        lock(&self.state).calibrated = calibrated;
    }

    /// Make the next calibration step fail with `reason`
    pub fn fail_calibration(&self, reason: &str) {
        lock(&self.state).calibration_failure = Some(reason.to_string());
    }

    /// Make `begin_calibration` fail with `reason`
    pub fn fail_begin_calibration(&self, reason: &str) {
        lock(&self.state).begin_calibration_failure = Some(reason.to_string());
    }

    pub fn set_pulse_duration(&self, duration: Duration) {
        lock(&self.state).pulse_duration = duration;
    }

    pub fn fail_pulses(&self, reason: Option<&str>) {
        lock(&self.state).pulse_failure = reason.map(str::to_string);
    }

    /// True while `issue_correction` is pulsing
    pub fn pulse_in_flight(&self) -> bool {
        lock(&self.state).pulse_in_flight
    }

    pub fn corrections(&self) -> Vec<(GuideOffset, MoveKind)> {
        lock(&self.state).corrections.clone()
    }

    pub fn dithered(&self) -> Vec<Offset> {
        lock(&self.state).dithered.clone()
    }

    pub fn direct_moves(&self) -> Vec<Offset> {
        lock(&self.state).direct_moves.clone()
    }

    pub fn calibration_steps(&self) -> usize {
        lock(&self.state).calibration_steps
    }

    pub fn adjust_calls(&self) -> usize {
        lock(&self.state).adjust_calls
    }
}

fn axis_move(amount: f64, positive: GuideDirection, negative: GuideDirection) -> AxisMove {
    if amount == 0.0 {
        return AxisMove::none();
    }
    AxisMove {
        duration_ms: (amount.abs() * MOCK_GUIDE_RATE_MS).round() as u32,
        direction: if amount > 0.0 { positive } else { negative },
        limited: false,
    }
}

impl Mount for MockMount {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn is_calibrated(&self) -> bool {
        lock(&self.state).calibrated
    }

    fn begin_calibration(&mut self, _position: Position) -> Result<(), MountError> {
        let mut state = lock(&self.state);
        if let Some(reason) = state.begin_calibration_failure.take() {
            return Err(MountError::CalibrationFailed(reason));
        }
        state.calibration_steps = 0;
        Ok(())
    }

    fn update_calibration_state(
        &mut self,
        _position: Position,
    ) -> Result<CalibrationProgress, MountError> {
        let mut state = lock(&self.state);
        state.calibration_steps += 1;
        if let Some(reason) = state.calibration_failure.take() {
            return Err(MountError::CalibrationFailed(reason));
        }
        if state.calibration_steps >= state.calibration_steps_required {
            state.calibrated = true;
            Ok(CalibrationProgress::Complete)
        } else {
            Ok(CalibrationProgress::InProgress)
        }
    }

    fn adjust_calibration_for_pointing(&mut self) {
        lock(&self.state).adjust_calls += 1;
    }

    fn transform_camera_to_mount(&self, camera: Offset) -> Option<Offset> {
        let state = lock(&self.state);
        if !state.calibrated {
            return None;
        }
        state.mount_to_camera.try_inverse().map(|inv| inv * camera)
    }

    fn transform_mount_to_camera(&self, mount: Offset) -> Option<Offset> {
        let state = lock(&self.state);
        state.calibrated.then(|| state.mount_to_camera * mount)
    }

    fn ra_parity(&self) -> GuideParity {
        lock(&self.state).ra_parity
    }

    fn dec_parity(&self) -> GuideParity {
        lock(&self.state).dec_parity
    }

    fn declination(&self) -> Option<f64> {
        lock(&self.state).declination
    }

    fn issue_correction(
        &mut self,
        offset: &GuideOffset,
        kind: MoveKind,
        cancel: &CancellationToken,
    ) -> Result<MoveResult, MountError> {
        let (duration, failure) = {
            let state = lock(&self.state);
            (state.pulse_duration, state.pulse_failure.clone())
        };
        lock(&self.state).pulse_in_flight = true;
        let pulsed = cancel.sleep(duration);
        lock(&self.state).pulse_in_flight = false;
        pulsed?;
        if let Some(reason) = failure {
            return Err(MountError::PulseFailed(reason));
        }

        lock(&self.state).corrections.push((*offset, kind));

        // Corrections move against the offset
        let mount = offset.mount.unwrap_or_else(Offset::zeros);
        Ok(MoveResult {
            ra: axis_move(-mount.x, GuideDirection::East, GuideDirection::West),
            dec: axis_move(-mount.y, GuideDirection::North, GuideDirection::South),
        })
    }

    fn notify_guiding_dithered(&mut self, camera_delta: Offset) {
        lock(&self.state).dithered.push(camera_delta);
    }

    fn notify_direct_move(&mut self, mount_offset: Offset) {
        lock(&self.state).direct_moves.push(mount_offset);
    }
}

struct ScriptState {
    script: VecDeque<Located>,
    last: Option<Located>,
    hints: Vec<Option<Position>>,
}

/// Locator returning a scripted sequence of results.
///
/// Once the script runs out the last result is repeated.
#[derive(Clone)]
pub struct ScriptedLocator {
    state: Arc<Mutex<ScriptState>>,
}

impl Default for ScriptedLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLocator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                script: VecDeque::new(),
                last: None,
                hints: Vec::new(),
            })),
        }
    }

    pub fn push(&self, located: Located) {
        lock(&self.state).script.push_back(located);
    }

    pub fn push_found(&self, x: f64, y: f64) {
        self.push(Located::Found(StarMeasurement {
            position: Position::new(x, y),
            mass: 10_000.0,
            snr: 40.0,
            hfd: 2.5,
        }));
    }

    pub fn push_lost(&self, reason: LostReason) {
        self.push(Located::NotFound(reason));
    }

    /// Hints passed to `locate`, oldest first
    pub fn hints(&self) -> Vec<Option<Position>> {
        lock(&self.state).hints.clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.state).script.len()
    }
}

impl StarLocator for ScriptedLocator {
    fn locate(&mut self, _frame: &Frame, hint: Option<Position>) -> Located {
        let mut state = lock(&self.state);
        state.hints.push(hint);
        let next = match state.script.pop_front() {
            Some(located) => located,
            None => state
                .last
                .clone()
                .unwrap_or(Located::NotFound(LostReason::NoStarSelected)),
        };
        state.last = Some(next.clone());
        next
    }
}

struct MockCameraState {
    next_frame: u64,
    clock: Timestamp,
    failures: usize,
    subframes: Vec<Option<Subframe>>,
}

/// Camera producing blank frames with advancing timestamps
#[derive(Clone)]
pub struct MockCamera {
    size: ImageSize,
    interval: Duration,
    capture_delay: Duration,
    state: Arc<Mutex<MockCameraState>>,
}

impl MockCamera {
    /// Frames of `size`, each stamped `interval` after the previous one
    pub fn new(size: ImageSize, interval: Duration) -> Self {
        Self {
            size,
            interval,
            capture_delay: Duration::ZERO,
            state: Arc::new(Mutex::new(MockCameraState {
                next_frame: 1,
                clock: Timestamp::new(1_000, 0),
                failures: 0,
                subframes: Vec::new(),
            })),
        }
    }

    /// Real time spent in each capture
    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    /// Fail the next `count` captures
    pub fn fail_next(&self, count: usize) {
        lock(&self.state).failures = count;
    }

    /// Subframe hints passed to `capture_frame`, oldest first
    pub fn subframes(&self) -> Vec<Option<Subframe>> {
        lock(&self.state).subframes.clone()
    }

    /// Build the next frame directly, for tests driving the guider by hand
    pub fn next_frame(&self) -> Frame {
        let mut state = lock(&self.state);
        state.clock = state.clock.after(self.interval);
        let frame = Frame::new(
            Array2::zeros((self.size.height, self.size.width)),
            state.next_frame,
            state.clock,
        );
        state.next_frame += 1;
        frame
    }
}

impl Camera for MockCamera {
    fn capture_frame(
        &mut self,
        exposure: Duration,
        subframe: Option<Subframe>,
        cancel: &CancellationToken,
    ) -> Result<Frame, CameraError> {
        lock(&self.state).subframes.push(subframe);
        cancel.sleep(self.capture_delay)?;
        {
            let mut state = lock(&self.state);
            if state.failures > 0 {
                state.failures -= 1;
                return Err(CameraError::CaptureFailed("mock failure".to_string()));
            }
        }
        let mut frame = self.next_frame();
        frame.exposure = exposure;
        frame.subframe = subframe;
        Ok(frame)
    }
}
