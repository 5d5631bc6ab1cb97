//! Camera collaborator interface.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::cancel::{Cancelled, CancellationToken};
use crate::image_size::ImageSize;
use crate::position::Position;
use crate::timestamp::Timestamp;

/// Errors reported by a camera
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("camera not connected")]
    NotConnected,

    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error("capture timed out after {0:?}")]
    Timeout(Duration),

    #[error("capture cancelled")]
    Cancelled,
}

impl From<Cancelled> for CameraError {
    fn from(_: Cancelled) -> Self {
        CameraError::Cancelled
    }
}

/// Rectangular readout region in full-frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subframe {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Subframe {
    /// Square region of half-size `half` centered on `center`, clipped to `size`.
    pub fn centered(center: Position, half: usize, size: ImageSize) -> Option<Self> {
        if size.width == 0 || size.height == 0 {
            return None;
        }
        let clamp = |v: f64, max: usize| v.round().clamp(0.0, max as f64) as usize;
        let x0 = clamp(center.x - half as f64, size.width - 1);
        let y0 = clamp(center.y - half as f64, size.height - 1);
        let x1 = clamp(center.x + half as f64 + 1.0, size.width);
        let y1 = clamp(center.y + half as f64 + 1.0, size.height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    pub fn contains(&self, pos: Position) -> bool {
        pos.x >= self.x as f64
            && pos.x < (self.x + self.width) as f64
            && pos.y >= self.y as f64
            && pos.y < (self.y + self.height) as f64
    }
}

/// A captured guide frame.
///
/// `data` always has the full sensor shape `(height, width)`; when a
/// subframe was read out, pixels outside it are zero.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Array2<u16>,
    pub frame_number: u64,
    /// Time the exposure completed
    pub timestamp: Timestamp,
    pub exposure: Duration,
    pub subframe: Option<Subframe>,
}

impl Frame {
    pub fn new(data: Array2<u16>, frame_number: u64, timestamp: Timestamp) -> Self {
        Self {
            data,
            frame_number,
            timestamp,
            exposure: Duration::ZERO,
            subframe: None,
        }
    }

    pub fn size(&self) -> ImageSize {
        let (height, width) = self.data.dim();
        ImageSize::from_width_height(width, height)
    }
}

/// Source of guide frames.
///
/// Implementations must poll `cancel` while exposing and return
/// `CameraError::Cancelled` promptly once it fires.
pub trait Camera: Send {
    fn capture_frame(
        &mut self,
        exposure: Duration,
        subframe: Option<Subframe>,
        cancel: &CancellationToken,
    ) -> Result<Frame, CameraError>;
}
