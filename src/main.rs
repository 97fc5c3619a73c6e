use std::{io::BufRead, path::PathBuf, thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gear_vision::{
    acquisition::AcquisitionLoop,
    artifact::CsvArtifact,
    clock::SystemClock,
    config::Config,
    detection::default_detector,
    handoff::{Handoff, VariableController},
    pipeline::VisionPipeline,
    sensor::SimulatedSensor,
    udp::UdpTransport,
};

#[derive(Debug, Parser)]
#[command(about = "Finds a gear on the table and hands its contour to the machine controller")]
struct Args {
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Stop after this many completed sessions.
    #[arg(long)]
    sessions: Option<usize>,

    /// Controller address, overriding the config file.
    #[arg(long)]
    controller: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = if args.config.exists() {
        Config::load(&args.config)
            .with_context(|| format!("Failed to load {}", args.config.display()))?
    } else {
        warn!(path = %args.config.display(), "config file not found, using defaults");
        Config::default()
    };
    if let Some(address) = args.controller {
        config.controller.address = address;
    }

    let clock = SystemClock::new();
    let sensor = SimulatedSensor::new(config.simulation.clone(), clock);
    let detector = default_detector(config.edge_low, config.edge_high, config.blur_sigma);
    let pipeline = VisionPipeline::new(
        sensor,
        detector,
        config.selection(),
        config.start_point_mode,
        config.frame_timeout(),
    );

    // Blocks until the controller's hostname resolves.
    let transport = UdpTransport::connect_blocking(
        config.controller.local_port,
        &config.controller.address,
        Duration::from_millis(config.controller.response_timeout_ms),
        Duration::from_secs(3),
    );
    info!(address = %config.controller.address, "controller connected");

    let controller = VariableController::new(transport, config.controller.variables.clone());
    let artifact = config.artifact_path.clone().map(CsvArtifact::new);
    let handoff = Handoff::new(controller, artifact);

    let mut acquisition =
        AcquisitionLoop::new(pipeline, handoff, clock, config.acquisition_settings());

    let stop = acquisition.stop_handle();
    thread::spawn(move || {
        let quit = std::io::stdin()
            .lock()
            .lines()
            .map_while(Result::ok)
            .any(|line| line.trim().eq_ignore_ascii_case("q"));

        if quit {
            info!("stop requested");
            stop.stop();
        }
    });

    println!("Acquisition running. Enter q to stop.");
    let summary = acquisition
        .run(args.sessions)
        .context("Failed to start the sensor")?;

    println!(
        "{} sessions: {} succeeded, {} timed out, {} restarted",
        summary.sessions, summary.succeeded, summary.timed_out, summary.restarted
    );

    Ok(())
}
