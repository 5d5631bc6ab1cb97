//! Center-of-mass star locator.

use guider::{Frame, Located, LostReason, Position, StarLocator, StarMeasurement, Subframe};
use log::trace;

/// Finds the brightest star near the hint and measures its centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct CentroidLocator {
    /// Half-size of the search box around the hint in pixels
    pub search_region: usize,
    /// Radius of the centroid aperture around the peak pixel
    pub aperture: f64,
    pub min_snr: f64,
    pub saturation: u16,
    /// Peaks closer than this to the sensor edge are rejected
    pub edge_margin: usize,
}

impl Default for CentroidLocator {
    fn default() -> Self {
        Self {
            search_region: 15,
            aperture: 5.0,
            min_snr: 10.0,
            saturation: 60_000,
            edge_margin: 5,
        }
    }
}

impl CentroidLocator {
    pub fn new(search_region: usize) -> Self {
        Self {
            search_region,
            ..Self::default()
        }
    }

    /// Pixel box to search, clipped to the sensor and any subframe readout
    fn search_box(&self, frame: &Frame, hint: Option<Position>) -> Option<Subframe> {
        let (height, width) = frame.data.dim();
        let readout = frame.subframe.unwrap_or(Subframe {
            x: 0,
            y: 0,
            width,
            height,
        });
        let (mut x0, mut y0) = (readout.x, readout.y);
        let (mut x1, mut y1) = (
            (readout.x + readout.width).min(width),
            (readout.y + readout.height).min(height),
        );
        if let Some(hint) = hint {
            let half = self.search_region as f64;
            let clamp = |v: f64, max: usize| v.round().clamp(0.0, max as f64) as usize;
            x0 = x0.max(clamp(hint.x - half, width));
            y0 = y0.max(clamp(hint.y - half, height));
            x1 = x1.min(clamp(hint.x + half + 1.0, width));
            y1 = y1.min(clamp(hint.y + half + 1.0, height));
        }
        (x1 > x0 && y1 > y0).then_some(Subframe {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    values[values.len() / 2]
}

impl StarLocator for CentroidLocator {
    fn locate(&mut self, frame: &Frame, hint: Option<Position>) -> Located {
        let Some(region) = self.search_box(frame, hint) else {
            return Located::NotFound(LostReason::TooNearEdge);
        };
        let (height, width) = frame.data.dim();

        let mut values = Vec::with_capacity(region.width * region.height);
        let mut peak = (region.x, region.y, 0u16);
        for y in region.y..region.y + region.height {
            for x in region.x..region.x + region.width {
                let v = frame.data[[y, x]];
                values.push(v as f64);
                if v > peak.2 {
                    peak = (x, y, v);
                }
            }
        }

        let background = median(&mut values);
        let mut deviations: Vec<f64> = values.iter().map(|v| (v - background).abs()).collect();
        let noise = (1.4826 * median(&mut deviations)).max(1.0);
        let (peak_x, peak_y, peak_value) = peak;
        let snr = (peak_value as f64 - background) / noise;
        trace!("peak {peak_value} at ({peak_x}, {peak_y}), background {background:.1}, snr {snr:.1}");

        if snr < self.min_snr {
            return Located::NotFound(LostReason::LowSnr);
        }
        if peak_value >= self.saturation {
            return Located::NotFound(LostReason::Saturated);
        }
        let margin = self.edge_margin;
        if peak_x < margin
            || peak_y < margin
            || peak_x + margin >= width
            || peak_y + margin >= height
        {
            return Located::NotFound(LostReason::TooNearEdge);
        }

        let r = self.aperture.ceil() as usize;
        let (mut mass, mut sum_x, mut sum_y) = (0.0, 0.0, 0.0);
        for y in peak_y.saturating_sub(r)..(peak_y + r + 1).min(height) {
            for x in peak_x.saturating_sub(r)..(peak_x + r + 1).min(width) {
                let dx = x as f64 - peak_x as f64;
                let dy = y as f64 - peak_y as f64;
                if dx * dx + dy * dy > self.aperture * self.aperture {
                    continue;
                }
                let w = (frame.data[[y, x]] as f64 - background).max(0.0);
                mass += w;
                sum_x += w * x as f64;
                sum_y += w * y as f64;
            }
        }
        if mass <= 0.0 {
            return Located::NotFound(LostReason::LowSnr);
        }
        let position = Position::new(sum_x / mass, sum_y / mass);

        let mut radius_sum = 0.0;
        for y in peak_y.saturating_sub(r)..(peak_y + r + 1).min(height) {
            for x in peak_x.saturating_sub(r)..(peak_x + r + 1).min(width) {
                let d = ((x as f64 - position.x).powi(2) + (y as f64 - position.y).powi(2)).sqrt();
                if d <= self.aperture {
                    radius_sum += (frame.data[[y, x]] as f64 - background).max(0.0) * d;
                }
            }
        }

        Located::Found(StarMeasurement {
            position,
            mass,
            snr,
            hfd: 2.0 * radius_sum / mass,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_camera::{SimulatedCamera, StarFieldConfig};
    use crate::sky::SimulatedSky;
    use guider::{Camera, CancellationToken, ImageSize};
    use std::time::Duration;

    fn frame_with_star(star: Position, amplitude: f64, noise: f64) -> Frame {
        let sky = SimulatedSky::new(star);
        let config = StarFieldConfig {
            amplitude,
            noise,
            ..StarFieldConfig::default()
        };
        let mut camera =
            SimulatedCamera::new(ImageSize::from_width_height(100, 80), sky, config, 3);
        camera
            .capture_frame(Duration::from_secs(1), None, &CancellationToken::new())
            .unwrap()
    }

    fn found(located: Located) -> StarMeasurement {
        match located {
            Located::Found(star) => star,
            other => panic!("expected a star, got {other:?}"),
        }
    }

    #[test]
    fn test_centroid_of_clean_star() {
        let frame = frame_with_star(Position::new(50.3, 40.7), 1000.0, 0.0);
        let star = found(CentroidLocator::default().locate(&frame, None));
        assert!((star.position.x - 50.3).abs() < 0.05);
        assert!((star.position.y - 40.7).abs() < 0.05);
        assert!(star.hfd > 1.0 && star.hfd < 5.0);
    }

    #[test]
    fn test_noisy_star_near_hint() {
        let frame = frame_with_star(Position::new(30.0, 30.0), 1000.0, 10.0);
        let star = found(CentroidLocator::new(10).locate(&frame, Some(Position::new(33.0, 28.0))));
        assert!((star.position.x - 30.0).abs() < 0.2);
        assert!((star.position.y - 30.0).abs() < 0.2);
        assert!(star.snr > 50.0);
    }

    #[test]
    fn test_star_outside_search_box_is_lost() {
        let frame = frame_with_star(Position::new(20.0, 20.0), 1000.0, 0.0);
        let located = CentroidLocator::new(8).locate(&frame, Some(Position::new(70.0, 60.0)));
        assert_eq!(located, Located::NotFound(LostReason::LowSnr));
    }

    #[test]
    fn test_saturated_star() {
        let frame = frame_with_star(Position::new(50.0, 40.0), 65_000.0, 0.0);
        let located = CentroidLocator::default().locate(&frame, None);
        assert_eq!(located, Located::NotFound(LostReason::Saturated));
    }

    #[test]
    fn test_star_at_edge() {
        let frame = frame_with_star(Position::new(2.0, 40.0), 1000.0, 0.0);
        let located = CentroidLocator::default().locate(&frame, None);
        assert_eq!(located, Located::NotFound(LostReason::TooNearEdge));
    }
}
