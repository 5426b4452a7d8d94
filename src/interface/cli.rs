//! Command line definition

use crate::config::{self, Overrides};
use clap::{ArgAction, Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

/// SIP NAT relay between a mobile client (Fon) and a fixed call-control box
#[derive(Parser, Debug)]
#[command(name = "fonbox-proxy")]
#[command(version)]
pub struct Cli {
    /// Box address as ADDRESS[:SIP_PORT]
    #[arg(value_name = "BOX_ADDRESS")]
    pub box_address: Option<String>,

    /// Listening port for both TCP and UDP
    #[arg(short, long, value_parser = parse_port)]
    pub port: Option<u16>,

    /// Listening TCP port
    #[arg(short, long, value_parser = parse_port)]
    pub tcp_port: Option<u16>,

    /// Listening UDP port
    #[arg(short, long, value_parser = parse_port)]
    pub udp_port: Option<u16>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log file, or `-` for stdout
    #[arg(short, long, value_name = "FILE")]
    pub logfile: Option<String>,

    /// Dump messages to and from one side
    #[arg(short = 'D', long, value_enum, ignore_case = true)]
    pub dump: Vec<DumpSide>,

    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(long, value_name = "ADDR:PORT")]
    pub metrics: Option<SocketAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DumpSide {
    Fon,
    Box,
}

fn parse_port(text: &str) -> Result<u16, String> {
    config::parse_port(text).map_err(|e| e.to_string())
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            config_file: self.config.clone(),
            box_address: self.box_address.clone(),
            tcp_port: self.tcp_port.or(self.port),
            udp_port: self.udp_port.or(self.port),
            verbosity: (self.verbose > 0).then_some(self.verbose),
            log_file: self.logfile.clone(),
            dump_fon: self.dump.contains(&DumpSide::Fon),
            dump_box: self.dump.contains(&DumpSide::Box),
            metrics: self.metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ports() {
        let cli = Cli::try_parse_from(["fonbox-proxy", "-p", "5070", "-u", "5080", "10.0.0.1"]).unwrap();
        let overrides = cli.overrides();

        assert_eq!(overrides.box_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(overrides.tcp_port, Some(5070));
        assert_eq!(overrides.udp_port, Some(5080));
        assert!(Cli::try_parse_from(["fonbox-proxy", "-p", "0", "10.0.0.1"]).is_err());
    }

    #[test]
    fn test_verbosity_and_dumps() {
        let cli = Cli::try_parse_from([
            "fonbox-proxy",
            "-vvv",
            "-D",
            "fon",
            "--dump",
            "BOX",
            "-l",
            "-",
            "10.0.0.1:5060",
        ])
        .unwrap();
        let overrides = cli.overrides();

        assert_eq!(overrides.verbosity, Some(3));
        assert!(overrides.dump_fon && overrides.dump_box);
        assert_eq!(overrides.log_file.as_deref(), Some("-"));
        assert!(Cli::try_parse_from(["fonbox-proxy", "-D", "rtp"]).is_err());
    }

    #[test]
    fn test_defaults_leave_lower_layers() {
        let overrides = Cli::try_parse_from(["fonbox-proxy"]).unwrap().overrides();

        assert!(overrides.box_address.is_none());
        assert!(overrides.verbosity.is_none());
        assert!(!overrides.dump_fon);
    }
}
