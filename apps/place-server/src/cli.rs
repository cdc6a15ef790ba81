use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "place-server")]
#[command(about = "Shared pixel-canvas broadcast server")]
pub struct Cli {
    /// Address to listen on
    #[arg(long, default_value = ":80")]
    pub address: String,

    /// Width of the canvas
    #[arg(long, default_value_t = 1000)]
    pub width: u32,

    /// Height of the canvas
    #[arg(long, default_value_t = 1000)]
    pub height: u32,

    /// Interval to save the canvas (in seconds)
    #[arg(long = "save-interval", default_value_t = 120)]
    pub save_interval: u64,

    /// File to save the canvas to
    #[arg(long = "save-location", default_value = "place.png")]
    pub save_location: PathBuf,

    /// Maximum number of live connections
    #[arg(long, default_value_t = 500_000)]
    pub connections: usize,

    /// Maximum number of connections per IP
    #[arg(long = "connections-per-ip", default_value_t = 3)]
    pub connections_per_ip: usize,

    /// Interval to ping clients (in seconds)
    #[arg(long = "ping-interval", default_value_t = 30)]
    pub ping_interval: u64,

    /// Number of strikes before disconnecting a client
    #[arg(long = "strikes-limit", default_value_t = 3)]
    pub strikes_limit: u8,
}
