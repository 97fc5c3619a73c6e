use std::{fs, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gear_vision::{
    artifact::CsvArtifact, config::Config, detection::default_detector, pipeline::analyze_frame,
    types::Frame,
};

/// Runs gear detection over still images taken at a known distance.
#[derive(Debug, Parser)]
#[command(about)]
struct Args {
    #[arg(required = true)]
    image_paths: Vec<PathBuf>,

    /// Distance from the camera to the part, in meters.
    #[arg(long, default_value_t = 0.25)]
    depth: f32,

    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Where to write one CSV per accepted image.
    #[arg(long, default_value = "contours")]
    out_dir: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        Config::default()
    };
    let detector = default_detector(config.edge_low, config.edge_high, config.blur_sigma);
    let selection = config.selection();

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    for (sequence, path) in args.image_paths.iter().enumerate() {
        let color = image::open(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
            .to_rgb8();
        let frame = Frame::with_uniform_depth(sequence as u64, color, args.depth);

        match analyze_frame(&frame, &detector, &selection, config.start_point_mode) {
            Ok(detection) => {
                let stem = path
                    .file_stem()
                    .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
                let artifact = CsvArtifact::new(
                    args.out_dir.join(format!("{}.csv", stem.to_string_lossy())),
                );
                artifact.write(&detection.contour)?;

                println!(
                    "{}: {:.1} mm across, circularity {:.3}, {} points -> {}",
                    path.display(),
                    detection.candidate.diameter_mm,
                    detection.candidate.circularity,
                    detection.contour.len(),
                    artifact.path().display()
                );
            }
            Err(rejection) => println!("{}: {}", path.display(), rejection),
        }
    }

    Ok(())
}
