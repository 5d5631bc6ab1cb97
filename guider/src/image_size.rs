//! Frame dimensions and lock-position validity

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::position::Position;

/// Image dimensions structure
///
/// Represents the width and height of a guide camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
}

impl ImageSize {
    /// Create a new ImageSize
    pub fn from_width_height(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Get total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// True if `pos` lies inside `[0, width) x [0, height)`
    pub fn contains(&self, pos: Position) -> bool {
        pos.x >= 0.0 && pos.x < self.width as f64 && pos.y >= 0.0 && pos.y < self.height as f64
    }

    /// True if a star at `pos` can be tracked with a search box of
    /// `search_region` pixels without the box leaving the frame.
    pub fn is_valid_lock_position(&self, pos: Position, search_region: f64) -> bool {
        let margin = 1.0 + search_region;
        pos.x >= margin
            && pos.x + margin < self.width as f64
            && pos.y >= margin
            && pos.y + margin < self.height as f64
    }

    /// Distance from `pos` to the nearest frame edge
    pub fn edge_distance(&self, pos: Position) -> f64 {
        let w = self.width as f64;
        let h = self.height as f64;
        pos.x.min(w - pos.x).min(pos.y).min(h - pos.y)
    }
}

impl From<(usize, usize)> for ImageSize {
    fn from(dimensions: (usize, usize)) -> Self {
        Self::from_width_height(dimensions.0, dimensions.1)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_validity_margin() {
        let size = ImageSize::from_width_height(640, 480);
        assert!(size.is_valid_lock_position(Position::new(11.0, 11.0), 10.0));
        assert!(!size.is_valid_lock_position(Position::new(10.9, 100.0), 10.0));
        assert!(size.is_valid_lock_position(Position::new(628.9, 100.0), 10.0));
        assert!(!size.is_valid_lock_position(Position::new(629.0, 100.0), 10.0));
        assert!(!size.is_valid_lock_position(Position::new(100.0, 469.0), 10.0));
    }

    #[test]
    fn test_edge_distance() {
        let size = ImageSize::from_width_height(640, 480);
        assert_eq!(size.edge_distance(Position::new(5.0, 200.0)), 5.0);
        assert_eq!(size.edge_distance(Position::new(320.0, 470.0)), 10.0);
        assert!(size.edge_distance(Position::new(-3.0, 200.0)) < 0.0);
    }

    #[test]
    fn test_contains_and_display() {
        let size: ImageSize = (64, 32).into();
        assert!(size.contains(Position::new(0.0, 0.0)));
        assert!(!size.contains(Position::new(64.0, 0.0)));
        assert_eq!(size.to_string(), "64x32");
        assert_eq!(size.pixel_count(), 2048);
    }
}
