// Commandline argument parser using clap for benchlink

use crate::config::BenchConfig;
use crate::connection::{BaudRate, LinkConfig};

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
/// Front end for the laboratory test bench
pub struct BenchArgs {
    #[command(subcommand, long_about)]
    /// How to reach the bench
    pub link: LinkCommand,

    /// Experiment file (RON) to choose the experiment from
    #[arg(short = 'e', long = "experiments", global = true)]
    pub experiments: Option<PathBuf>,

    /// Name of the experiment to select, defaults to the first in the file
    #[arg(short = 'x', long = "experiment", global = true)]
    pub experiment: Option<String>,

    /// Config file (RON) with front end settings
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Samples kept per data point, overrides the config file
    #[arg(short = 'i', long = "interpolation-points", global = true)]
    pub interpolation_points: Option<usize>,

    /// Render tick in milliseconds, overrides the config file
    #[arg(short = 'r', long = "refresh-ms", global = true)]
    pub refresh_ms: Option<u64>,

    /// Run headless for this many seconds, logging the latest values,
    /// instead of opening the monitor
    #[arg(short = 'd', long = "duration", global = true)]
    pub duration: Option<f64>,
}

/// Link selection
#[derive(Debug, Subcommand, Clone)]
pub enum LinkCommand {
    /// Connect over a serial port
    #[command(about)]
    Serial(SerialCommand),

    /// Connect over TCP, e.g. to bench-sim
    #[command(about)]
    Tcp(TcpCommand),
}

/// Serial link options
#[derive(Debug, Args, Clone)]
pub struct SerialCommand {
    /// Serial device, a picker is shown when omitted
    #[arg(short, long)]
    pub port: Option<String>,

    /// Line speed
    #[arg(short, long, default_value_t = BaudRate::default())]
    pub baud: BaudRate,
}

/// TCP link options
#[derive(Debug, Args, Clone)]
pub struct TcpCommand {
    /// Host name or address of the bench
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// TCP port of the bench
    #[arg(short, long, default_value_t = 50007)]
    pub port: u16,
}

impl BenchArgs {
    /// Applies the command line overrides to `config`.
    pub fn apply(&self, config: &mut BenchConfig) {
        if let Some(points) = self.interpolation_points {
            config.interpolation_points = points;
        }
        if let Some(refresh) = self.refresh_ms {
            config.refresh_ms = refresh;
        }
    }
}

impl LinkCommand {
    /// The link to open. `None` for a serial link without a port, which
    /// the caller has to pick first.
    pub fn link_config(&self) -> Option<LinkConfig> {
        match self {
            LinkCommand::Serial(SerialCommand { port, baud }) => port.as_ref().map(|port| LinkConfig::Serial {
                port: port.clone(),
                baud: *baud,
            }),
            LinkCommand::Tcp(TcpCommand { host, port }) => Some(LinkConfig::Tcp {
                host: host.clone(),
                port: *port,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_with_overrides() {
        let args = BenchArgs::parse_from([
            "benchlink",
            "tcp",
            "--port",
            "6000",
            "--interpolation-points",
            "300",
            "-x",
            "Ramp",
        ]);
        assert_eq!(
            args.link.link_config(),
            Some(LinkConfig::Tcp {
                host: "127.0.0.1".into(),
                port: 6000
            })
        );
        assert_eq!(args.experiment.as_deref(), Some("Ramp"));

        let mut config = BenchConfig::default();
        args.apply(&mut config);
        assert_eq!(config.interpolation_points, 300);
        assert_eq!(config.refresh_ms, 100);
    }

    #[test]
    fn serial_needs_a_supported_baud_rate() {
        let args = BenchArgs::parse_from(["benchlink", "serial", "-p", "/dev/ttyACM0", "-b", "9600"]);
        assert_eq!(
            args.link.link_config(),
            Some(LinkConfig::Serial {
                port: "/dev/ttyACM0".into(),
                baud: BaudRate::try_from(9600).unwrap()
            })
        );

        assert!(BenchArgs::try_parse_from(["benchlink", "serial", "-b", "1234"]).is_err());

        let no_port = BenchArgs::parse_from(["benchlink", "serial"]);
        assert_eq!(no_port.link.link_config(), None);
    }
}
