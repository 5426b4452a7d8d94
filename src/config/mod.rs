//! Configuration management
//!
//! Settings are layered from built-in defaults, an optional TOML file,
//! `FONBOX_*` environment variables and finally the command line.

use crate::domain::shared::literal;
use crate::domain::{ProxyError, Result};
use ::config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;

/// Port used for the box and both listeners unless configured
pub const DEFAULT_SIP_PORT: u16 = 5060;

const ENV_PREFIX: &str = "FONBOX";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub box_addr: SocketAddrV4,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub listen_address: Ipv4Addr,
    pub log: LogConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Verbosity, 0 = errors only ... 3 = every message
    pub level: u8,
    /// Log file, `-` for stdout; stderr when unset
    pub file: Option<String>,
    pub dump_fon: bool,
    pub dump_box: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus exporter address; disabled when unset
    pub listen: Option<SocketAddr>,
}

/// Values given on the command line; `None` leaves lower layers in effect.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_file: Option<PathBuf>,
    pub box_address: Option<String>,
    pub tcp_port: Option<u16>,
    pub udp_port: Option<u16>,
    pub verbosity: Option<u8>,
    pub log_file: Option<String>,
    pub dump_fon: bool,
    pub dump_box: bool,
    pub metrics: Option<SocketAddr>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    box_address: Option<String>,
    tcp_port: u16,
    udp_port: u16,
    listen_address: String,
    #[serde(default)]
    log: LogConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

impl Config {
    /// Load and validate the layered configuration.
    pub fn load(overrides: &Overrides) -> Result<Self> {
        let raw = layered(overrides).map_err(ProxyError::configuration)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let box_address = raw
            .box_address
            .ok_or_else(|| ProxyError::configuration("box address is required"))?;
        let box_addr = parse_box_address(&box_address)?;

        for (name, port) in [("TCP", raw.tcp_port), ("UDP", raw.udp_port)] {
            if port == 0 {
                return Err(ProxyError::configuration(format!(
                    "invalid {} port 0",
                    name
                )));
            }
        }

        Ok(Self {
            box_addr,
            tcp_port: raw.tcp_port,
            udp_port: raw.udp_port,
            listen_address: parse_address(&raw.listen_address)?,
            log: raw.log,
            metrics: raw.metrics,
        })
    }

    pub fn tcp_listen(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.listen_address, self.tcp_port)
    }

    pub fn udp_listen(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.listen_address, self.udp_port)
    }
}

fn layered(overrides: &Overrides) -> std::result::Result<RawConfig, ConfigError> {
    let mut builder = ::config::Config::builder()
        .set_default("tcp_port", i64::from(DEFAULT_SIP_PORT))?
        .set_default("udp_port", i64::from(DEFAULT_SIP_PORT))?
        .set_default("listen_address", Ipv4Addr::UNSPECIFIED.to_string())?;

    if let Some(path) = &overrides.config_file {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("box_address", overrides.box_address.clone())?
        .set_override_option("tcp_port", overrides.tcp_port.map(i64::from))?
        .set_override_option("udp_port", overrides.udp_port.map(i64::from))?
        .set_override_option("log.level", overrides.verbosity.map(i64::from))?
        .set_override_option("log.file", overrides.log_file.clone())?
        .set_override_option("log.dump_fon", overrides.dump_fon.then_some(true))?
        .set_override_option("log.dump_box", overrides.dump_box.then_some(true))?
        .set_override_option("metrics.listen", overrides.metrics.map(|a| a.to_string()))?
        .build()?
        .try_deserialize()
}

/// Parse a whole dotted-quad literal.
pub fn parse_address(text: &str) -> Result<Ipv4Addr> {
    let invalid = || ProxyError::configuration(format!("invalid address '{}'", text));

    match literal::address_len(text.as_bytes()) {
        Some(len) if len == text.len() => text.parse().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// Parse a whole port literal.
pub fn parse_port(text: &str) -> Result<u16> {
    let invalid = || ProxyError::configuration(format!("invalid port '{}'", text));

    match literal::port_len(text.as_bytes()) {
        Some(len) if len == text.len() => text.parse().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// Parse `ADDRESS[:PORT]`, defaulting to the SIP port.
pub fn parse_box_address(text: &str) -> Result<SocketAddrV4> {
    let (address, port) = match text.split_once(':') {
        Some((address, port)) => (address, parse_port(port)?),
        None => (text, DEFAULT_SIP_PORT),
    };

    Ok(SocketAddrV4::new(parse_address(address)?, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn overrides(box_address: &str) -> Overrides {
        Overrides {
            box_address: Some(box_address.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_box_address() {
        assert_eq!(
            parse_box_address("192.168.178.1").unwrap(),
            "192.168.178.1:5060".parse().unwrap()
        );
        assert_eq!(
            parse_box_address("10.0.0.1:5070").unwrap(),
            "10.0.0.1:5070".parse().unwrap()
        );

        for bad in ["", "fritz.box", "10.0.0.1:", "10.0.0.1:0", "10.0.0.1:70000", "10.0.0.256"] {
            assert!(parse_box_address(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("5060").unwrap(), 5060);
        assert_eq!(parse_port("65535").unwrap(), 65535);
        assert!(parse_port("05060").is_err());
        assert!(parse_port("5060x").is_err());
        assert!(parse_port("-1").is_err());
    }

    #[test]
    fn test_load_defaults() {
        let config = Config::load(&overrides("192.168.178.1")).unwrap();

        assert_eq!(config.box_addr, "192.168.178.1:5060".parse().unwrap());
        assert_eq!(config.tcp_listen(), "0.0.0.0:5060".parse().unwrap());
        assert_eq!(config.udp_port, DEFAULT_SIP_PORT);
        assert_eq!(config.metrics.listen, None);
        assert!(!config.log.dump_fon);
    }

    #[test]
    fn test_load_requires_box_address() {
        let err = Config::load(&Overrides::default()).unwrap_err();
        assert!(matches!(err, ProxyError::Configuration(_)));
    }

    #[test]
    fn test_command_line_overrides_file() {
        let path = std::env::temp_dir().join(format!("fonbox-proxy-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "box_address = \"10.0.0.1\"\ntcp_port = 6000\nudp_port = 6001\n\n[log]\nlevel = 1\ndump_box = true"
        )
        .unwrap();

        let config = Config::load(&Overrides {
            config_file: Some(path.clone()),
            udp_port: Some(7000),
            dump_fon: true,
            ..Default::default()
        })
        .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.box_addr, "10.0.0.1:5060".parse().unwrap());
        assert_eq!(config.tcp_port, 6000);
        assert_eq!(config.udp_port, 7000);
        assert_eq!(config.log.level, 1);
        assert!(config.log.dump_fon);
        assert!(config.log.dump_box);
    }

    #[test]
    fn test_invalid_listen_address_rejected() {
        let raw = RawConfig {
            box_address: Some("10.0.0.1".to_string()),
            tcp_port: 5060,
            udp_port: 5060,
            listen_address: "localhost".to_string(),
            log: LogConfig::default(),
            metrics: MetricsConfig::default(),
        };
        assert!(Config::from_raw(raw).is_err());
    }
}
