//! A simulated bench on TCP. Point `benchlink tcp` at it.

// Example:
// RUST_LOG=info cargo run --bin bench-sim -- --bind 127.0.0.1:50007 --period-ms 10 --noise 0.2

use benchlink::dummy_device::DummyDevice;
use clap::Parser;
use log::error;
use std::{io, process::ExitCode, time::Duration};

#[derive(Debug, Parser)]
#[clap(version, about)]
/// Simulated test bench speaking the bench protocol over TCP
struct SimArgs {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:50007")]
    bind: String,

    /// Time between two telemetry samples, in milliseconds
    #[arg(short, long = "period-ms", default_value_t = 10)]
    period_ms: u64,

    /// Amplitude of the noise on the second signal
    #[arg(short, long, default_value_t = 0.1)]
    noise: f64,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = SimArgs::parse();

    let device = DummyDevice::builder()
        .bind(args.bind)
        .period(Duration::from_millis(args.period_ms.max(1)))
        .noise(args.noise.abs())
        .build();
    let mut device = match device {
        Ok(device) => device,
        Err(e) => {
            error!("could not start the simulated bench: {}", e);
            eprintln!("bench-sim: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("bench-sim listening on {}, press Enter to stop", device.local_addr());
    let mut line = String::new();
    if let Err(e) = io::stdin().read_line(&mut line) {
        error!("reading stdin: {}", e);
    }

    device.stop();
    ExitCode::SUCCESS
}
