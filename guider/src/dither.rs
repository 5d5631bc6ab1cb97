//! Dither placement and fast recentering.
//!
//! A dither moves the lock position by a requested mount-axis offset. When
//! the star sits near a frame edge the request is reflected about the mount
//! axes until the new lock position is trackable. After the lock moves, an
//! optional fast-recenter trajectory walks the mount toward it in large
//! direct steps instead of waiting for the guide algorithm.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::GuiderError;
use crate::image_size::ImageSize;
use crate::mount::Mount;
use crate::position::{Offset, Position};

/// Each recenter step covers this fraction of the search region.
const RECENTER_STEP_FRACTION: f64 = 0.7;
/// Trajectory completes once both axes have less than this remaining.
const RECENTER_DONE_PX: f64 = 0.5;

/// Reflections tried in order: (+,+), (-,+), (+,-), (-,-)
const REFLECTIONS: [(f64, f64); 4] = [(1.0, 1.0), (-1.0, 1.0), (1.0, -1.0), (-1.0, -1.0)];

/// The delta a dither actually applies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DitherResult {
    pub camera_delta: Offset,
    pub mount_delta: Offset,
    /// False when no reflection was trackable and the farthest-from-edge
    /// candidate was used instead
    pub within_bounds: bool,
}

/// Choose the reflection of `requested_mount_delta` to apply to `lock`.
///
/// The first reflection whose resulting lock position passes the validity
/// test wins. If none does, the candidate farthest from the nearest frame
/// edge is chosen; ties keep the earlier reflection.
pub fn compute_dither(
    lock: Position,
    requested_mount_delta: Offset,
    frame: ImageSize,
    search_region: f64,
    mount: &dyn Mount,
) -> Result<DitherResult, GuiderError> {
    let mut best: Option<(f64, Offset, Offset)> = None;

    for (sx, sy) in REFLECTIONS {
        let mount_delta = Offset::new(requested_mount_delta.x * sx, requested_mount_delta.y * sy);
        let camera_delta = mount
            .transform_mount_to_camera(mount_delta)
            .ok_or(GuiderError::TransformFailed("mount to camera"))?;
        let candidate = lock + camera_delta;

        if frame.is_valid_lock_position(candidate, search_region) {
            return Ok(DitherResult {
                camera_delta,
                mount_delta,
                within_bounds: true,
            });
        }

        debug!("dither produces an invalid lock position, trying a variation");
        let d = frame.edge_distance(candidate);
        if best.map_or(true, |(best_d, _, _)| d > best_d) {
            best = Some((d, camera_delta, mount_delta));
        }
    }

    // REFLECTIONS is non-empty, so a candidate was recorded
    let (_, camera_delta, mount_delta) = best.ok_or(GuiderError::TransformFailed("mount to camera"))?;
    Ok(DitherResult {
        camera_delta,
        mount_delta,
        within_bounds: false,
    })
}

/// Fast-recenter trajectory state.
///
/// `remaining` and `step` are per-axis magnitudes in mount axes; `sign` is
/// the sign of the dither's mount delta on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DitherRecenter {
    pub remaining: Offset,
    pub step: Offset,
    pub sign: Offset,
}

/// One step of a recenter trajectory
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecenterStep {
    /// Mount move to issue, pointing from the star toward the new lock
    pub mount_offset: Offset,
    /// True when the trajectory finished with this step
    pub done: bool,
}

impl DitherRecenter {
    /// Plan a trajectory for `mount_delta`, or `None` for a zero-length dither.
    pub fn plan(mount_delta: Offset, max_move_pixels: f64) -> Option<Self> {
        let remaining = mount_delta.abs();
        let length = remaining.norm();
        if length == 0.0 {
            return None;
        }
        let sign = Offset::new(
            if mount_delta.x < 0.0 { -1.0 } else { 1.0 },
            if mount_delta.y < 0.0 { -1.0 } else { 1.0 },
        );
        let f = max_move_pixels * RECENTER_STEP_FRACTION / length;
        Some(Self {
            remaining,
            step: remaining * f,
            sign,
        })
    }

    /// Consume the next step.
    ///
    /// The star trails the new lock position by the dither delta, so the
    /// returned move is opposite to `sign`, matching the guide offset
    /// convention of star minus lock.
    pub fn next_step(&mut self) -> RecenterStep {
        let step = self.remaining.inf(&self.step);
        self.remaining -= step;
        let done = self.remaining.x < RECENTER_DONE_PX && self.remaining.y < RECENTER_DONE_PX;
        debug!(
            "dither recenter: step=({:.1},{:.1}) remaining=({:.1},{:.1})",
            step.x * self.sign.x,
            step.y * self.sign.y,
            self.remaining.x * self.sign.x,
            self.remaining.y * self.sign.y
        );
        RecenterStep {
            mount_offset: -step.component_mul(&self.sign),
            done,
        }
    }

    /// Upper bound on the number of steps to complete.
    pub fn max_steps(&self) -> usize {
        let length = self.remaining.norm();
        let step = self.step.norm();
        if step == 0.0 {
            0
        } else {
            (length / step).ceil() as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockMount;
    use approx::assert_relative_eq;

    fn frame() -> ImageSize {
        ImageSize::from_width_height(640, 480)
    }

    #[test]
    fn test_first_reflection_used_when_valid() {
        let mount = MockMount::calibrated_identity();
        let result = compute_dither(
            Position::new(100.0, 100.0),
            Offset::new(30.0, 0.0),
            frame(),
            10.0,
            &mount,
        )
        .unwrap();
        assert_eq!(result.camera_delta, Offset::new(30.0, 0.0));
        assert_eq!(result.mount_delta, Offset::new(30.0, 0.0));
        assert!(result.within_bounds);
    }

    #[test]
    fn test_reflects_away_from_right_edge() {
        let mount = MockMount::calibrated_identity();
        let result = compute_dither(
            Position::new(620.0, 100.0),
            Offset::new(15.0, 5.0),
            frame(),
            10.0,
            &mount,
        )
        .unwrap();
        assert_eq!(result.mount_delta, Offset::new(-15.0, 5.0));
        assert!(result.within_bounds);
    }

    #[test]
    fn test_reflects_both_axes_in_corner() {
        let mount = MockMount::calibrated_identity();
        let result = compute_dither(
            Position::new(625.0, 470.0),
            Offset::new(8.0, 8.0),
            frame(),
            10.0,
            &mount,
        )
        .unwrap();
        assert_eq!(result.mount_delta, Offset::new(-8.0, -8.0));
    }

    #[test]
    fn test_falls_back_to_farthest_from_edge() {
        let mount = MockMount::calibrated_identity();
        // Too large to be valid in any direction on a small frame
        let small = ImageSize::from_width_height(60, 60);
        let result = compute_dither(
            Position::new(20.0, 30.0),
            Offset::new(35.0, 2.0),
            small,
            10.0,
            &mount,
        )
        .unwrap();
        assert!(!result.within_bounds);
        // (+,+) lands at (55,32), 5 px from the edge; (-,+) lands off-frame
        assert_eq!(result.mount_delta, Offset::new(35.0, 2.0));
    }

    #[test]
    fn test_fallback_tie_keeps_earlier_reflection() {
        let mount = MockMount::calibrated_identity();
        let small = ImageSize::from_width_height(40, 40);
        // (+,+) -> (30,30) and (-,-) -> (10,10) are equidistant from edges
        let result = compute_dither(
            Position::new(20.0, 20.0),
            Offset::new(10.0, 10.0),
            small,
            10.0,
            &mount,
        )
        .unwrap();
        assert!(!result.within_bounds);
        assert_eq!(result.mount_delta, Offset::new(10.0, 10.0));
    }

    #[test]
    fn test_dither_is_deterministic() {
        let mount = MockMount::calibrated_scaled(1.5, 0.3);
        let run = || {
            compute_dither(
                Position::new(600.0, 30.0),
                Offset::new(12.0, -7.0),
                frame(),
                15.0,
                &mount,
            )
            .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_uncalibrated_mount_cannot_dither() {
        let mount = MockMount::new("scope", 3);
        let err = compute_dither(
            Position::new(100.0, 100.0),
            Offset::new(5.0, 5.0),
            frame(),
            10.0,
            &mount,
        );
        assert!(matches!(err, Err(GuiderError::TransformFailed(_))));
    }

    #[test]
    fn test_zero_length_plans_no_trajectory() {
        assert!(DitherRecenter::plan(Offset::zeros(), 15.0).is_none());
    }

    #[test]
    fn test_plan_step_covers_seventy_percent_of_search_region() {
        let plan = DitherRecenter::plan(Offset::new(-30.0, 40.0), 10.0).unwrap();
        assert_eq!(plan.remaining, Offset::new(30.0, 40.0));
        assert_eq!(plan.sign, Offset::new(-1.0, 1.0));
        assert_relative_eq!(plan.step.norm(), 7.0, epsilon = 1e-12);
        assert_relative_eq!(plan.step.x, 4.2, epsilon = 1e-12);
        assert_relative_eq!(plan.step.y, 5.6, epsilon = 1e-12);
    }

    #[test]
    fn test_steps_oppose_dither_direction() {
        let mut plan = DitherRecenter::plan(Offset::new(-30.0, 40.0), 10.0).unwrap();
        let step = plan.next_step();
        assert_relative_eq!(step.mount_offset.x, 4.2, epsilon = 1e-12);
        assert_relative_eq!(step.mount_offset.y, -5.6, epsilon = 1e-12);
        assert!(!step.done);
    }

    #[test]
    fn test_trajectory_converges_within_bound() {
        for delta in [
            Offset::new(30.0, 40.0),
            Offset::new(-3.0, 0.2),
            Offset::new(0.0, -17.5),
            Offset::new(120.0, -0.01),
        ] {
            let mut plan = DitherRecenter::plan(delta, 12.0).unwrap();
            let bound = plan.max_steps();
            let mut total = Offset::zeros();
            let mut steps = 0;
            loop {
                let step = plan.next_step();
                total += step.mount_offset;
                steps += 1;
                if step.done {
                    break;
                }
                assert!(steps <= bound, "no convergence for {delta:?}");
            }
            assert!(steps <= bound);
            assert!(plan.remaining.x < 0.5 && plan.remaining.y < 0.5);
            assert_relative_eq!(total.x, -delta.x, epsilon = 0.5);
            assert_relative_eq!(total.y, -delta.y, epsilon = 0.5);
        }
    }
}
