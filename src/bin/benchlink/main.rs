//! Front end for the test bench. Connects, selects an experiment and either
//! opens the live monitor or, with `--duration`, runs headless and logs.

// Example:
// cargo run --bin benchlink -- tcp --port 50007 --experiments experiments.ron --experiment Ramp
// cargo run --bin benchlink -- serial --baud 115200 --duration 10

use benchlink::{
    args::{BenchArgs, LinkCommand},
    config::BenchConfig,
    connection::{BaudRate, Connection, LinkConfig},
    experiment_file::{ExperimentDefinition, ExperimentSet},
    experiment_interactor::ExperimentInteractor,
    experiment_module::{ExperimentModule, ModuleRegistry},
    gui,
    session::Session,
    test_module::TestModule,
};
use clap::Parser;
use log::{error, info};
use serial2::SerialPort;
use std::{
    error::Error,
    process::ExitCode,
    thread::sleep,
    time::{Duration, Instant},
};

fn main() -> ExitCode {
    env_logger::init();
    let args = BenchArgs::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("benchlink: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: BenchArgs) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => BenchConfig::from_path(path)?,
        None => BenchConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let Some(link) = pick_link(&args.link)? else {
        info!("no port selected");
        return Ok(());
    };

    let experiments = match &args.experiments {
        Some(path) => ExperimentSet::from_path(path)?,
        None => ExperimentSet::default(),
    };
    let definition = match &args.experiment {
        Some(name) => experiments
            .find(name)
            .cloned()
            .ok_or_else(|| format!("no experiment named {:?}", name))?,
        None => experiments.first().cloned().unwrap_or_else(|| {
            ExperimentDefinition::new("Test").with_module("Test", TestModule.public_settings())
        }),
    };

    let mut interactor =
        ExperimentInteractor::new(ModuleRegistry::with_builtin(), config.interpolation_points);
    interactor.set_experiment(&definition)?;

    let connection = Connection::with_options(link, config.connection_options());
    let mut session = Session::new(connection, interactor);
    session.connect()?;

    match args.duration {
        Some(secs) if secs.is_finite() && secs >= 0.0 => {
            headless(&mut session, Duration::from_secs_f64(secs), config.refresh())?
        }
        Some(secs) => return Err(format!("invalid duration {}", secs).into()),
        None => gui::monitor(&mut session, config.refresh())?,
    }

    session.disconnect();
    Ok(())
}

/// The link from the command line, asking for a serial port when none was
/// given.
fn pick_link(command: &LinkCommand) -> Result<Option<LinkConfig>, Box<dyn Error>> {
    if let Some(link) = command.link_config() {
        return Ok(Some(link));
    }

    let baud = match command {
        LinkCommand::Serial(serial) => serial.baud,
        LinkCommand::Tcp(_) => BaudRate::default(),
    };
    let available_ports = SerialPort::available_ports()?;
    let port = gui::device_selector(available_ports)?;

    Ok(port.map(|port| LinkConfig::Serial {
        port: port.to_string_lossy().into_owned(),
        baud,
    }))
}

/// Sends the parameters, runs for `duration` logging the newest sample of
/// every data point each tick, then stops.
fn headless(session: &mut Session, duration: Duration, tick: Duration) -> Result<(), Box<dyn Error>> {
    let interactor = session.interactor_mut();
    interactor.send_parameter_experiment()?;
    interactor.run_experiment()?;

    let start = Instant::now();
    while start.elapsed() < duration && session.is_connected() {
        sleep(tick);
        for buffer in session.interactor().buffers() {
            if let Some(sample) = buffer.latest() {
                info!("{} @ {:.3}s = {}", buffer.name(), sample.time, sample.value);
            }
        }
    }

    session.interactor_mut().stop_experiment()?;
    if let Some(measurement) = session.interactor().measurements().last() {
        for (name, samples) in measurement.data.iter() {
            info!("{}: {} samples recorded", name, samples.len());
        }
    }
    Ok(())
}
