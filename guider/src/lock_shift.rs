//! Lock-position shift rates.
//!
//! Converts a drift rate configured for a moving target (a comet, or a
//! deliberate slow walk of the star across the sensor) into the camera-axis
//! pixels-per-second velocity applied to the lock position every frame.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::GuiderError;
use crate::mount::Mount;
use crate::position::Offset;

const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftUnits {
    ArcsecPerHour,
    PixelsPerHour,
}

/// Axes the rate is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftAxes {
    /// Mount RA/Dec axes
    Sky,
    /// Camera X/Y axes
    Camera,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LockShiftParams {
    pub enabled: bool,
    pub rate: Offset,
    pub units: ShiftUnits,
    pub axes: ShiftAxes,
}

impl Default for LockShiftParams {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: Offset::zeros(),
            units: ShiftUnits::ArcsecPerHour,
            axes: ShiftAxes::Sky,
        }
    }
}

/// Lock shift velocity in camera pixels per second.
///
/// Sky-axis rates in arc-seconds are treated as ephemeris rates: each axis
/// is flipped when the mount reports odd parity and the RA rate is scaled by
/// `cos(declination)` when the declination is known, before transforming to
/// camera axes. Arc-second rates are then divided by `pixel_scale`
/// (arc-seconds per pixel).
pub fn camera_velocity(
    params: &LockShiftParams,
    mount: &dyn Mount,
    pixel_scale: f64,
) -> Result<Offset, GuiderError> {
    let mut rate = params.rate;

    if params.axes == ShiftAxes::Sky {
        if params.units == ShiftUnits::ArcsecPerHour {
            rate.x *= mount.ra_parity().sign();
            rate.y *= mount.dec_parity().sign();
            if let Some(dec) = mount.declination() {
                rate.x *= dec.cos();
            }
        }
        debug!("lock shift sky rate {:.2},{:.2} before transform", rate.x, rate.y);
        rate = mount
            .transform_mount_to_camera(rate)
            .ok_or(GuiderError::LockShiftTransform)?;
    }

    if params.units == ShiftUnits::ArcsecPerHour {
        if pixel_scale.is_nan() || pixel_scale <= 0.0 {
            return Err(GuiderError::InvalidConfig(format!(
                "pixel scale must be positive, got {pixel_scale}"
            )));
        }
        rate /= pixel_scale;
    }

    Ok(rate / SECONDS_PER_HOUR)
}
