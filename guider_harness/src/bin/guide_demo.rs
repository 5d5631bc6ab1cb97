use clap::Parser;
use guider::{
    GuideLoop, GuideLoopOptions, GuiderCallbackEvent, GuiderConfig, GuiderSnapshot, GuiderState,
    ImageSize, LockShiftParams, Offset, SettleParams, ShiftAxes, ShiftUnits,
};
use guider_harness::{build_rig, RigOptions, SimulatedMountConfig, StarFieldConfig};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Command line arguments for the guiding demo
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Closed-loop guiding against a simulated mount and camera",
    long_about = "Runs the guide loop against a simulated sky.\n\n\
        A single star drifts across a synthetic sensor while the guider selects it, \
        calibrates the simulated mount and guides. Partway through, the lock position \
        is dithered and the guider waits for the star to settle. Status is printed \
        periodically from the published guider snapshot."
)]
struct Args {
    #[arg(
        short = 't',
        long,
        default_value_t = 120.0,
        help = "Simulated guiding duration in seconds"
    )]
    duration: f64,

    #[arg(long, default_value_t = 1000, help = "Exposure time in milliseconds")]
    exposure_ms: u64,

    #[arg(
        long,
        default_value_t = 0.05,
        help = "Real seconds per simulated second",
        long_help = "Fraction of each exposure spent waiting in real time. 1.0 runs at \
            the speed of a real camera; small values run the simulation quickly."
    )]
    realtime_scale: f64,

    #[arg(long, default_value_t = 0.3, help = "Star drift along x in pixels per second")]
    drift_x: f64,

    #[arg(
        long,
        default_value_t = -0.2,
        allow_hyphen_values = true,
        help = "Star drift along y in pixels per second"
    )]
    drift_y: f64,

    #[arg(
        long,
        default_value_t = 20.0,
        help = "Mount axis rotation relative to the sensor in degrees"
    )]
    mount_angle: f64,

    #[arg(long, default_value_t = 0.5, help = "Per-frame star jitter in pixels")]
    seeing: f64,

    #[arg(long, default_value_t = 3.0, help = "Dither amplitude in pixels")]
    dither: f64,

    #[arg(long, help = "Dither along RA only")]
    ra_only: bool,

    #[arg(
        long,
        default_value_t = 0.0,
        allow_hyphen_values = true,
        help = "Lock position shift along x in pixels per hour",
        long_help = "Move the lock position along the camera x axis at this rate while \
            guiding, as when following a slowly moving target. Zero disables lock shift."
    )]
    shift_x: f64,

    #[arg(
        long,
        default_value_t = 0.0,
        allow_hyphen_values = true,
        help = "Lock position shift along y in pixels per hour"
    )]
    shift_y: f64,

    #[arg(long, default_value_t = 15.0, help = "Star search region half-size in pixels")]
    search_region: f64,

    #[arg(long, default_value_t = 42, help = "Random seed for image noise")]
    seed: u64,

    #[arg(long, help = "Print snapshots as JSON")]
    json: bool,

    #[arg(short, long, help = "Print every guider event")]
    verbose: bool,
}

fn print_snapshot(elapsed: f64, snapshot: &GuiderSnapshot, json: bool) {
    if json {
        match snapshot.to_json() {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("snapshot not serializable: {e}"),
        }
        return;
    }
    let star = snapshot
        .current_position()
        .map(|p| format!("({:7.2}, {:7.2})", p.x, p.y))
        .unwrap_or_else(|| "(  none  )".to_string());
    let lock = snapshot
        .lock_position
        .map(|p| format!("({:7.2}, {:7.2})", p.x, p.y))
        .unwrap_or_else(|| "(  none  )".to_string());
    println!(
        "{elapsed:6.1}s  {:<20} star {star}  lock {lock}  error {:6.3} px (smoothed {:6.3}){}",
        snapshot.state.to_string(),
        snapshot.current_error,
        snapshot.current_error_smoothed,
        if snapshot.settling { "  settling" } else { "" }
    );
}

fn wait_for(
    handle: &guider::GuideLoopHandle,
    timeout: Duration,
    pred: impl Fn(&GuiderSnapshot) -> bool,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if pred(&handle.snapshot()) {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    println!("Guider Demo");
    println!("===========");
    println!("Duration: {} s", args.duration);
    println!("Exposure: {} ms", args.exposure_ms);
    println!("Drift: ({}, {}) px/s", args.drift_x, args.drift_y);

    let exposure = Duration::from_millis(args.exposure_ms.max(1));
    let rig = build_rig(RigOptions {
        size: ImageSize::from_width_height(320, 240),
        drift: Offset::new(args.drift_x, args.drift_y),
        star_field: StarFieldConfig {
            seeing: args.seeing,
            ..StarFieldConfig::default()
        },
        mount: SimulatedMountConfig {
            angle: args.mount_angle.to_radians(),
            pulse_time_scale: args.realtime_scale,
            ..SimulatedMountConfig::default()
        },
        guider: GuiderConfig {
            search_region: args.search_region,
            ..GuiderConfig::default()
        },
        calibrated_mount: false,
        seed: args.seed,
    })?;

    let settles = Arc::new(Mutex::new(Vec::new()));
    let sink = settles.clone();
    let verbose = args.verbose;
    rig.guider.register_callback(move |event| {
        if verbose {
            println!("  event: {event:?}");
        }
        match event {
            GuiderCallbackEvent::SettleDone(outcome) => {
                if let Ok(mut sink) = sink.lock() {
                    sink.push(outcome.clone());
                }
            }
            GuiderCallbackEvent::Alert { message } => println!("  ALERT: {message}"),
            _ => {}
        }
    });

    let camera = rig.camera.with_realtime_scale(args.realtime_scale);
    let handle = GuideLoop::spawn(
        rig.guider,
        camera,
        GuideLoopOptions {
            exposure,
            ..GuideLoopOptions::default()
        },
    );
    let wall_timeout =
        exposure.mul_f64(args.realtime_scale.max(0.001) * 50.0) + Duration::from_secs(5);

    if !wait_for(&handle, wall_timeout, |s| s.state == GuiderState::Selected) {
        return Err("no guide star selected".into());
    }
    handle.start_guiding(None)?;
    if !wait_for(&handle, wall_timeout, |s| s.state == GuiderState::Guiding) {
        return Err(format!("guiding did not start: {}", handle.snapshot().state).into());
    }
    let start = handle.snapshot().timestamp;
    println!("Guiding started");

    if args.shift_x != 0.0 || args.shift_y != 0.0 {
        handle.set_lock_shift(LockShiftParams {
            enabled: true,
            rate: Offset::new(args.shift_x, args.shift_y),
            units: ShiftUnits::PixelsPerHour,
            axes: ShiftAxes::Camera,
        })?;
        println!("Lock shift: ({}, {}) px/hour", args.shift_x, args.shift_y);
    }

    let sim_elapsed = |s: &GuiderSnapshot| match (s.timestamp, start) {
        (Some(now), Some(start)) => now.seconds_since(start),
        _ => 0.0,
    };
    let report_every = (args.duration / 20.0).max(exposure.as_secs_f64());
    let mut next_report = 0.0;
    let mut dithered = false;
    loop {
        let snapshot = handle.snapshot();
        let elapsed = sim_elapsed(&snapshot);
        if elapsed >= args.duration || !handle.is_running() {
            break;
        }
        if elapsed >= next_report {
            print_snapshot(elapsed, &snapshot, args.json);
            next_report += report_every;
        }
        if !dithered && elapsed >= args.duration / 2.0 && !snapshot.settling {
            let settle = SettleParams {
                settle_time: Duration::from_secs(5),
                ..SettleParams::default()
            };
            let result = handle.dither(args.dither, args.ra_only, Some(settle))?;
            println!(
                "Dithered by ({:.2}, {:.2}) px",
                result.camera_delta.x, result.camera_delta.y
            );
            dithered = true;
        }
        thread::sleep(Duration::from_millis(10));
    }

    let guider = handle.shutdown()?;
    println!("Stopped in state {}", guider.state());
    if let Ok(settles) = settles.lock() {
        for outcome in settles.iter() {
            match &outcome.error {
                None => println!("Settled after {} frames", outcome.settle_frames),
                Some(e) => println!("Settle failed after {} frames: {e}", outcome.settle_frames),
            }
        }
    }
    Ok(())
}
