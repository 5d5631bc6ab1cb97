//! Guider harness for testing and simulation
//!
//! A simulated camera and mount share one `SimulatedSky`, so pulses issued
//! by the guider move the star the camera renders. Together with the
//! centroiding locator this closes the guide loop without hardware.

pub mod centroid;
pub mod sim_camera;
pub mod sim_mount;
pub mod sky;

pub use centroid::CentroidLocator;
pub use sim_camera::{SimulatedCamera, StarFieldConfig};
pub use sim_mount::{SimulatedMount, SimulatedMountConfig};
pub use sky::SimulatedSky;

use guider::{Guider, GuiderConfig, GuiderError, ImageSize, Offset, Position};

/// Everything needed for one simulated guiding session
pub struct SimulatedRig {
    pub sky: SimulatedSky,
    pub camera: SimulatedCamera,
    pub mount: SimulatedMount,
    pub guider: Guider,
}

/// Options for `build_rig`
#[derive(Debug, Clone)]
pub struct RigOptions {
    pub size: ImageSize,
    pub drift: Offset,
    pub star_field: StarFieldConfig,
    pub mount: SimulatedMountConfig,
    pub guider: GuiderConfig,
    /// Start with a mount that already knows its axes
    pub calibrated_mount: bool,
    pub seed: u64,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            size: ImageSize::from_width_height(320, 240),
            drift: Offset::zeros(),
            star_field: StarFieldConfig::default(),
            mount: SimulatedMountConfig::default(),
            guider: GuiderConfig::default(),
            calibrated_mount: false,
            seed: 42,
        }
    }
}

/// Wire a guider to a simulated mount and camera with the star centered.
pub fn build_rig(options: RigOptions) -> Result<SimulatedRig, GuiderError> {
    let center = Position::new(
        options.size.width as f64 / 2.0,
        options.size.height as f64 / 2.0,
    );
    let sky = SimulatedSky::new(center).with_drift(options.drift);
    let camera = SimulatedCamera::new(options.size, sky.clone(), options.star_field, options.seed);
    let mount = if options.calibrated_mount {
        SimulatedMount::calibrated("simulated mount", sky.clone(), options.mount)
    } else {
        SimulatedMount::new("simulated mount", sky.clone(), options.mount)
    };
    let locator = CentroidLocator::new(options.guider.search_region.ceil() as usize);
    let guider = Guider::new(options.guider, Box::new(mount.clone()), Box::new(locator))?;
    Ok(SimulatedRig {
        sky,
        camera,
        mount,
        guider,
    })
}
