use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;

/// Runtime configuration, resolved once at startup from the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    pub address: String,
    pub width: u32,
    pub height: u32,
    pub save_interval: Duration,
    pub save_location: PathBuf,
    pub max_connections: usize,
    pub max_connections_per_ip: usize,
    pub ping_interval: Duration,
    /// Strike-job period and silence window: `ceil(ping_interval / 5)`.
    pub strike_interval: Duration,
    pub strikes_limit: u8,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            address: cli.address.clone(),
            width: cli.width,
            height: cli.height,
            save_interval: Duration::from_secs(cli.save_interval.max(1)),
            save_location: cli.save_location.clone(),
            max_connections: cli.connections,
            max_connections_per_ip: cli.connections_per_ip,
            ping_interval: Duration::from_secs(cli.ping_interval.max(1)),
            strike_interval: Duration::from_secs(cli.ping_interval.div_ceil(5).max(1)),
            strikes_limit: cli.strikes_limit,
        }
    }

    /// Bind address, accepting the `:80` port-only shorthand.
    pub fn listen_addr(&self) -> String {
        if self.address.starts_with(':') {
            format!("0.0.0.0{}", self.address)
        } else {
            self.address.clone()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: ":80".to_string(),
            width: 1000,
            height: 1000,
            save_interval: Duration::from_secs(120),
            save_location: PathBuf::from("place.png"),
            max_connections: 500_000,
            max_connections_per_ip: 3,
            ping_interval: Duration::from_secs(30),
            strike_interval: Duration::from_secs(6),
            strikes_limit: 3,
        }
    }
}
