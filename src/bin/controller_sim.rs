use std::{
    io::ErrorKind,
    net::{SocketAddr, UdpSocket},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use gear_vision::{
    error::HandoffError,
    handoff::{ControllerVariables, Value, VariableTable},
    udp::{serve_one, Request},
};

/// Stands in for the machine controller: answers variable reads and writes and
/// raises the start signal on a timer.
#[derive(Debug, Parser)]
#[command(about)]
struct Args {
    #[arg(long, default_value_t = 4826)]
    port: u16,

    /// Seconds between start pulses; no pulses when absent.
    #[arg(long)]
    pulse_every: Option<f64>,

    /// Random extra delay added to each pulse, in seconds.
    #[arg(long, default_value_t = 0.)]
    jitter: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let variables = ControllerVariables::default();

    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], args.port)))
        .with_context(|| format!("Failed to bind port {}", args.port))?;
    socket.set_read_timeout(Some(Duration::from_millis(100)))?;
    info!(port = args.port, "controller simulator listening");

    let mut table = VariableTable::new();
    table.set(&variables.start_signal, Value::Bool(false));

    let mut rng = rand::thread_rng();
    let next_pulse_in = |rng: &mut rand::rngs::ThreadRng| {
        args.pulse_every.map(|every| {
            let extra = if args.jitter > 0. {
                rng.gen_range(0. ..args.jitter)
            } else {
                0.
            };
            Instant::now() + Duration::from_secs_f64(every + extra)
        })
    };
    let mut next_pulse = next_pulse_in(&mut rng);

    let mut buf = vec![0; 65_507];
    loop {
        if let Some(at) = next_pulse {
            if Instant::now() >= at {
                info!("start pulse");
                table.set(&variables.start_signal, Value::Bool(true));
                next_pulse = next_pulse_in(&mut rng);
            }
        }

        match serve_one(&socket, &mut table, &mut buf) {
            Ok(Request::Write { name, value }) if name == variables.status => {
                info!(status = ?value, "status");
            }
            Ok(Request::WriteArray { name, values, .. }) => {
                debug!(%name, count = values.len(), "coordinates received");
            }
            Ok(_) => {}
            Err(HandoffError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) => warn!(%err, "bad request"),
        }
    }
}
