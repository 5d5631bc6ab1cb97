//! Camera that renders the simulated guide star.

use std::time::Duration;

use guider::{Camera, CameraError, CancellationToken, Frame, ImageSize, Subframe};
use log::trace;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::sky::SimulatedSky;

/// Star and detector properties used when rendering frames
#[derive(Debug, Clone, PartialEq)]
pub struct StarFieldConfig {
    /// Peak star signal above background in ADU
    pub amplitude: f64,
    /// PSF full width at half maximum in pixels
    pub fwhm: f64,
    /// Background level in ADU
    pub background: f64,
    /// Half-width of the uniform per-pixel noise in ADU
    pub noise: f64,
    /// Standard deviation of the per-frame star jitter in pixels
    pub seeing: f64,
}

impl Default for StarFieldConfig {
    fn default() -> Self {
        Self {
            amplitude: 1000.0,
            fwhm: 3.0,
            background: 100.0,
            noise: 10.0,
            seeing: 0.0,
        }
    }
}

/// Renders a Gaussian PSF at the sky's star position.
///
/// Each capture advances the sky clock by the exposure time. With a
/// non-zero `realtime_scale` the capture also blocks for that fraction of
/// the exposure, polling the cancellation token.
pub struct SimulatedCamera {
    size: ImageSize,
    sky: SimulatedSky,
    config: StarFieldConfig,
    rng: ChaCha8Rng,
    frame_number: u64,
    realtime_scale: f64,
}

impl SimulatedCamera {
    pub fn new(size: ImageSize, sky: SimulatedSky, config: StarFieldConfig, seed: u64) -> Self {
        Self {
            size,
            sky,
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            frame_number: 0,
            realtime_scale: 0.0,
        }
    }

    pub fn with_realtime_scale(mut self, scale: f64) -> Self {
        self.realtime_scale = scale.max(0.0);
        self
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    fn uniform(&mut self, half_width: f64) -> f64 {
        if half_width > 0.0 {
            self.rng.random_range(-half_width..half_width)
        } else {
            0.0
        }
    }

    fn jitter(&mut self) -> f64 {
        if self.config.seeing <= 0.0 {
            return 0.0;
        }
        // Sum of uniforms, close enough to Gaussian for seeing
        let spread = self.config.seeing * 3.0_f64.sqrt();
        (0..4).map(|_| self.uniform(spread)).sum::<f64>() / 2.0
    }

    fn render(&mut self, subframe: Option<Subframe>) -> Array2<u16> {
        let region = subframe.unwrap_or(Subframe {
            x: 0,
            y: 0,
            width: self.size.width,
            height: self.size.height,
        });
        let x_end = (region.x + region.width).min(self.size.width);
        let y_end = (region.y + region.height).min(self.size.height);

        let star = self.sky.star();
        let (star_x, star_y) = (star.x + self.jitter(), star.y + self.jitter());
        let sigma = self.config.fwhm / 2.355;
        let two_sigma2 = 2.0 * sigma * sigma;
        let radius = (5.0 * sigma).ceil();

        let mut data = Array2::<u16>::zeros((self.size.height, self.size.width));
        for y in region.y..y_end {
            for x in region.x..x_end {
                let mut value = self.config.background + self.uniform(self.config.noise);
                let dx = x as f64 - star_x;
                let dy = y as f64 - star_y;
                if dx.abs() <= radius && dy.abs() <= radius {
                    value += self.config.amplitude * (-(dx * dx + dy * dy) / two_sigma2).exp();
                }
                data[[y, x]] = value.round().clamp(0.0, u16::MAX as f64) as u16;
            }
        }
        data
    }
}

impl Camera for SimulatedCamera {
    fn capture_frame(
        &mut self,
        exposure: Duration,
        subframe: Option<Subframe>,
        cancel: &CancellationToken,
    ) -> Result<Frame, CameraError> {
        if self.realtime_scale > 0.0 {
            cancel.sleep(exposure.mul_f64(self.realtime_scale))?;
        } else {
            cancel.check()?;
        }
        let timestamp = self.sky.advance(exposure);
        let data = self.render(subframe);
        self.frame_number += 1;
        trace!("rendered frame {} at {timestamp:?}", self.frame_number);

        let mut frame = Frame::new(data, self.frame_number, timestamp);
        frame.exposure = exposure;
        frame.subframe = subframe;
        Ok(frame)
    }
}
