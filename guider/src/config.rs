use serde::{Deserialize, Serialize};

use crate::error::GuiderError;
use crate::settle::SettleParams;

/// Configuration for the guider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuiderConfig {
    /// Half-size of the star search box in pixels; also the largest
    /// per-frame move the star can make without being lost
    pub search_region: f64,
    /// Walk the mount toward a new dither position with direct moves
    pub fast_recenter: bool,
    /// Keep an existing lock position when guiding starts
    pub sticky_lock: bool,
    /// Keep the selection when the star is lost while looping
    pub ignore_lost_star_looping: bool,
    /// Request an audible alert when the star is lost while guiding
    pub beep_on_lost_star: bool,
    /// Arc-seconds per pixel
    pub pixel_scale: f64,
    /// Extra pixels around the search region in the subframe hint
    pub subframe_padding: usize,
    /// Settle parameters used when a command does not supply its own
    pub default_settle: SettleParams,
}

impl Default for GuiderConfig {
    fn default() -> Self {
        Self {
            search_region: 15.0,
            fast_recenter: true,
            sticky_lock: false,
            ignore_lost_star_looping: false,
            beep_on_lost_star: true,
            pixel_scale: 1.0,
            subframe_padding: 10,
            default_settle: SettleParams::default(),
        }
    }
}

impl GuiderConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), GuiderError> {
        if !self.search_region.is_finite() || self.search_region <= 0.0 {
            return Err(GuiderError::InvalidConfig(format!(
                "search_region must be positive, got {}",
                self.search_region
            )));
        }
        if !self.pixel_scale.is_finite() || self.pixel_scale <= 0.0 {
            return Err(GuiderError::InvalidConfig(format!(
                "pixel_scale must be positive, got {}",
                self.pixel_scale
            )));
        }
        if !self.default_settle.tolerance_px.is_finite() || self.default_settle.tolerance_px < 0.0 {
            return Err(GuiderError::InvalidConfig(format!(
                "settle tolerance must be non-negative, got {}",
                self.default_settle.tolerance_px
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(GuiderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_search_region() {
        let config = GuiderConfig {
            search_region: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GuiderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_nan_pixel_scale() {
        let config = GuiderConfig {
            pixel_scale: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_preserves_settle() {
        let config = GuiderConfig {
            sticky_lock: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: GuiderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
