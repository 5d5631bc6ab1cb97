//! Mount that moves the simulated guide star.
//!
//! The mount's axes are rotated and scaled relative to the camera axes.
//! Calibration measures that relationship the way a real mount does: it
//! pulses each axis, watches where the star goes and returns it to the
//! starting point before guiding begins.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use guider::mount::{AxisMove, GuideDirection};
use guider::{
    CalibrationProgress, CancellationToken, GuideOffset, GuideParity, Mount, MountError,
    MoveKind, MoveResult, Offset, Position,
};
use log::{debug, info};
use nalgebra::{Matrix2, Rotation2};

use crate::sky::{lock, SimulatedSky};

/// Physical and guiding properties of the simulated mount
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedMountConfig {
    /// Angle of the RA axis on the sensor in radians
    pub angle: f64,
    /// Camera pixels moved per mount unit
    pub scale: f64,
    /// Pulse milliseconds per mount unit
    pub guide_rate_ms: f64,
    pub max_pulse_ms: u32,
    /// Fraction of each guide step applied
    pub aggressiveness: f64,
    /// Mount units pulsed on each axis during calibration
    pub calibration_distance: f64,
    /// Smallest star movement in pixels accepted as a calibration measurement
    pub min_calibration_move: f64,
    /// Real seconds spent per second of pulse
    pub pulse_time_scale: f64,
}

impl Default for SimulatedMountConfig {
    fn default() -> Self {
        Self {
            angle: 0.0,
            scale: 1.0,
            guide_rate_ms: 100.0,
            max_pulse_ms: 2500,
            aggressiveness: 0.7,
            calibration_distance: 8.0,
            min_calibration_move: 3.0,
            pulse_time_scale: 0.0,
        }
    }
}

enum CalibrationPhase {
    Ra,
    Dec { ra: Offset },
    /// Star is on its way back to the start
    Return { measured: Matrix2<f64> },
}

struct CalibrationRun {
    start: Position,
    phase: CalibrationPhase,
}

struct MountState {
    connected: bool,
    calibration: Option<Matrix2<f64>>,
    run: Option<CalibrationRun>,
    pulses: usize,
}

/// Simulated mount sharing a sky with a `SimulatedCamera`
#[derive(Clone)]
pub struct SimulatedMount {
    name: String,
    sky: SimulatedSky,
    config: SimulatedMountConfig,
    /// camera displacement = actual * mount units
    actual: Matrix2<f64>,
    state: Arc<Mutex<MountState>>,
}

impl SimulatedMount {
    pub fn new(name: &str, sky: SimulatedSky, config: SimulatedMountConfig) -> Self {
        let actual = Rotation2::new(config.angle).into_inner() * config.scale;
        Self {
            name: name.to_string(),
            sky,
            config,
            actual,
            state: Arc::new(Mutex::new(MountState {
                connected: true,
                calibration: None,
                run: None,
                pulses: 0,
            })),
        }
    }

    /// Mount that already knows its exact axes
    pub fn calibrated(name: &str, sky: SimulatedSky, config: SimulatedMountConfig) -> Self {
        let mount = Self::new(name, sky, config);
        lock(&mount.state).calibration = Some(mount.actual);
        mount
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    /// Measured camera pixels per mount unit, one column per axis
    pub fn calibration(&self) -> Option<Matrix2<f64>> {
        lock(&self.state).calibration
    }

    pub fn actual_transform(&self) -> Matrix2<f64> {
        self.actual
    }

    /// Guide pulses issued so far
    pub fn pulses(&self) -> usize {
        lock(&self.state).pulses
    }

    fn pulse(&self, mount: Offset) {
        self.sky.nudge(self.actual * mount);
    }

    fn measure(&self, axis: &str, run: &CalibrationRun, position: Position) -> Result<Offset, MountError> {
        let moved = position - run.start;
        if moved.norm() < self.config.min_calibration_move {
            return Err(MountError::CalibrationFailed(format!(
                "{axis} calibration: star moved only {:.1} px",
                moved.norm()
            )));
        }
        Ok(moved / self.config.calibration_distance)
    }

    /// Clip a move on one axis to the longest allowed pulse
    fn axis_move(
        &self,
        amount: f64,
        positive: GuideDirection,
        negative: GuideDirection,
    ) -> (AxisMove, f64) {
        if amount == 0.0 {
            return (AxisMove::none(), 0.0);
        }
        let wanted_ms = amount.abs() * self.config.guide_rate_ms;
        let max_ms = self.config.max_pulse_ms as f64;
        let limited = wanted_ms > max_ms;
        let ms = wanted_ms.min(max_ms);
        let applied = amount.signum() * ms / self.config.guide_rate_ms;
        let direction = if amount > 0.0 { positive } else { negative };
        (
            AxisMove {
                duration_ms: ms.round() as u32,
                direction,
                limited,
            },
            applied,
        )
    }
}

impl Mount for SimulatedMount {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn is_calibrated(&self) -> bool {
        lock(&self.state).calibration.is_some()
    }

    fn begin_calibration(&mut self, position: Position) -> Result<(), MountError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(MountError::NotConnected);
        }
        state.calibration = None;
        state.run = Some(CalibrationRun {
            start: position,
            phase: CalibrationPhase::Ra,
        });
        drop(state);

        self.pulse(Offset::new(self.config.calibration_distance, 0.0));
        Ok(())
    }

    fn update_calibration_state(
        &mut self,
        position: Position,
    ) -> Result<CalibrationProgress, MountError> {
        let mut state = lock(&self.state);
        let run = state
            .run
            .take()
            .ok_or_else(|| MountError::CalibrationFailed("calibration not started".to_string()))?;
        let distance = self.config.calibration_distance;

        let phase = match run.phase {
            CalibrationPhase::Ra => {
                let ra = self.measure("RA", &run, position)?;
                self.pulse(Offset::new(-distance, distance));
                CalibrationPhase::Dec { ra }
            }
            CalibrationPhase::Dec { ra } => {
                let dec = self.measure("Dec", &run, position)?;
                let cos = ra.dot(&dec) / (ra.norm() * dec.norm());
                if cos.abs() > 0.5 {
                    return Err(MountError::CalibrationFailed(format!(
                        "RA and Dec axes are {:.0} degrees apart",
                        cos.acos().to_degrees()
                    )));
                }
                self.pulse(Offset::new(0.0, -distance));
                CalibrationPhase::Return {
                    measured: Matrix2::from_columns(&[ra, dec]),
                }
            }
            CalibrationPhase::Return { measured } => {
                info!(
                    "{} calibrated: RA ({:.3}, {:.3}) Dec ({:.3}, {:.3}) px/unit",
                    self.name,
                    measured[(0, 0)],
                    measured[(1, 0)],
                    measured[(0, 1)],
                    measured[(1, 1)]
                );
                state.calibration = Some(measured);
                return Ok(CalibrationProgress::Complete);
            }
        };
        state.run = Some(CalibrationRun {
            start: run.start,
            phase,
        });
        Ok(CalibrationProgress::InProgress)
    }

    fn transform_camera_to_mount(&self, camera: Offset) -> Option<Offset> {
        let calibration = lock(&self.state).calibration?;
        calibration.try_inverse().map(|inverse| inverse * camera)
    }

    fn transform_mount_to_camera(&self, mount: Offset) -> Option<Offset> {
        lock(&self.state).calibration.map(|m| m * mount)
    }

    fn ra_parity(&self) -> GuideParity {
        match lock(&self.state).calibration {
            Some(_) => GuideParity::Even,
            None => GuideParity::Unknown,
        }
    }

    fn dec_parity(&self) -> GuideParity {
        match lock(&self.state).calibration {
            Some(m) if m.determinant() < 0.0 => GuideParity::Odd,
            Some(_) => GuideParity::Even,
            None => GuideParity::Unknown,
        }
    }

    fn issue_correction(
        &mut self,
        offset: &GuideOffset,
        kind: MoveKind,
        cancel: &CancellationToken,
    ) -> Result<MoveResult, MountError> {
        if !self.is_connected() {
            return Err(MountError::NotConnected);
        }
        let gain = match kind {
            MoveKind::GuideStep | MoveKind::DeducedMove => self.config.aggressiveness,
            MoveKind::Calibration | MoveKind::RecoveryMove => 1.0,
        };
        // Corrections push the star back against the offset
        let wanted = -offset.mount.unwrap_or_else(Offset::zeros) * gain;
        let (ra, ra_applied) = self.axis_move(wanted.x, GuideDirection::West, GuideDirection::East);
        let (dec, dec_applied) =
            self.axis_move(wanted.y, GuideDirection::North, GuideDirection::South);

        let longest = ra.duration_ms.max(dec.duration_ms) as f64 / 1000.0;
        cancel.sleep(Duration::from_secs_f64(longest * self.config.pulse_time_scale))?;

        self.pulse(Offset::new(ra_applied, dec_applied));
        lock(&self.state).pulses += 1;
        debug!(
            "{:?} pulse: RA {} ms {:?}, Dec {} ms {:?}",
            kind, ra.duration_ms, ra.direction, dec.duration_ms, dec.direction
        );
        Ok(MoveResult { ra, dec })
    }

    fn notify_guiding_dithered(&mut self, camera_delta: Offset) {
        debug!(
            "{}: lock moved by ({:.2}, {:.2})",
            self.name, camera_delta.x, camera_delta.y
        );
    }

    fn notify_direct_move(&mut self, mount_offset: Offset) {
        debug!(
            "{}: direct move of ({:.2}, {:.2})",
            self.name, mount_offset.x, mount_offset.y
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_4;

    fn guide_offset(mount: Offset) -> GuideOffset {
        GuideOffset {
            camera: Offset::zeros(),
            mount: Some(mount),
        }
    }

    #[test]
    fn test_calibration_measures_rotation_and_returns_star() {
        let sky = SimulatedSky::new(Position::new(100.0, 100.0));
        let config = SimulatedMountConfig {
            angle: FRAC_PI_4,
            scale: 1.5,
            ..SimulatedMountConfig::default()
        };
        let mut mount = SimulatedMount::new("sim", sky.clone(), config);

        mount.begin_calibration(sky.star()).unwrap();
        let mut steps = 0;
        while mount.update_calibration_state(sky.star()).unwrap() == CalibrationProgress::InProgress {
            steps += 1;
            assert!(steps < 5);
        }
        assert_eq!(steps, 2);
        assert_relative_eq!(sky.star().x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(sky.star().y, 100.0, epsilon = 1e-9);

        let measured = mount.calibration().unwrap();
        assert_relative_eq!(measured, mount.actual_transform(), epsilon = 1e-9);
        let back = mount
            .transform_camera_to_mount(mount.actual_transform() * Offset::new(2.0, -1.0))
            .unwrap();
        assert_relative_eq!(back.x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(back.y, -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_calibration_fails_when_star_does_not_move() {
        let sky = SimulatedSky::new(Position::new(100.0, 100.0));
        let mut mount = SimulatedMount::new("sim", sky, SimulatedMountConfig::default());
        let start = Position::new(100.0, 100.0);
        mount.begin_calibration(start).unwrap();
        let err = mount.update_calibration_state(start).unwrap_err();
        assert!(matches!(err, MountError::CalibrationFailed(_)));
        assert!(!mount.is_calibrated());
    }

    #[test]
    fn test_correction_moves_star_against_offset() {
        let sky = SimulatedSky::new(Position::new(50.0, 50.0));
        let config = SimulatedMountConfig {
            aggressiveness: 1.0,
            ..SimulatedMountConfig::default()
        };
        let mut mount = SimulatedMount::calibrated("sim", sky.clone(), config);

        let result = mount
            .issue_correction(
                &guide_offset(Offset::new(2.0, -1.0)),
                MoveKind::GuideStep,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(result.ra.duration_ms, 200);
        assert_eq!(result.dec.duration_ms, 100);
        assert_eq!(sky.star(), Position::new(48.0, 51.0));
        assert_eq!(mount.pulses(), 1);
    }

    #[test]
    fn test_long_pulse_is_limited() {
        let sky = SimulatedSky::new(Position::new(50.0, 50.0));
        let config = SimulatedMountConfig {
            max_pulse_ms: 500,
            ..SimulatedMountConfig::default()
        };
        let mut mount = SimulatedMount::calibrated("sim", sky.clone(), config);

        let result = mount
            .issue_correction(
                &guide_offset(Offset::new(20.0, 0.0)),
                MoveKind::RecoveryMove,
                &CancellationToken::new(),
            )
            .unwrap();
        assert!(result.ra.limited);
        assert_eq!(result.ra.duration_ms, 500);
        assert_relative_eq!(sky.star().x, 45.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cancelled_pulse_leaves_star() {
        let sky = SimulatedSky::new(Position::new(50.0, 50.0));
        let config = SimulatedMountConfig {
            pulse_time_scale: 1.0,
            ..SimulatedMountConfig::default()
        };
        let mut mount = SimulatedMount::calibrated("sim", sky.clone(), config);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = mount
            .issue_correction(&guide_offset(Offset::new(5.0, 0.0)), MoveKind::GuideStep, &cancel)
            .unwrap_err();
        assert_eq!(err, MountError::Cancelled);
        assert_eq!(sky.star(), Position::new(50.0, 50.0));
    }
}
