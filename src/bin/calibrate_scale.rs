use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use gear_vision::{
    config::Config,
    detection::{default_detector, ContourDetector},
    scale::ScaleCalibration,
    selection::{is_circular, largest_contour},
};

/// Derives `reference_pixels_per_mm` from an image of a part with a known diameter.
#[derive(Debug, Parser)]
#[command(about)]
struct Args {
    image_path: PathBuf,

    /// Diameter of the reference part, in millimeters.
    #[arg(long)]
    diameter_mm: f64,

    /// Distance from the camera to the part, in meters.
    #[arg(long, default_value_t = 0.25)]
    distance_m: f64,

    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        Config::default()
    };
    let detector = default_detector(config.edge_low, config.edge_high, config.blur_sigma);

    let image = image::open(&args.image_path)
        .with_context(|| format!("Failed to read {}", args.image_path.display()))?
        .to_rgb8();

    let contours = detector.find_external_contours(&image);
    let (idx, area) = match largest_contour(&contours, &detector) {
        Some(found) => found,
        None => bail!("no contours in {}", args.image_path.display()),
    };
    let circle = match detector.min_enclosing_circle(&contours[idx]) {
        Some(circle) => circle,
        None => bail!("largest contour has no extent"),
    };

    let circularity = area / circle.area();
    if !is_circular(circularity) {
        eprintln!(
            "warning: largest contour is not very circular ({:.3}), result may be off",
            circularity
        );
    }

    let calibration = match ScaleCalibration::from_measurement(
        args.diameter_mm,
        circle.radius,
        args.distance_m,
    ) {
        Some(calibration) => calibration,
        None => bail!("diameter, radius and distance must all be positive"),
    };

    println!("radius: {:.2} px", circle.radius);
    println!(
        "reference_pixels_per_mm: {:.4}",
        calibration.reference_pixels_per_mm
    );
    println!("reference_distance_m: {}", calibration.reference_distance_m);

    Ok(())
}
