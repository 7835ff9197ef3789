//! Server configuration from the command line.

use clap::Parser;

use delve_shared::{DEFAULT_PORT, SERVER_TICK_RATE};

/// Authoritative dungeon-crawler simulation server
#[derive(Parser, Debug, Clone)]
#[command(name = "delve-server", version)]
pub struct Config {
    /// UDP port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Simulation tick rate in Hz
    #[arg(long, default_value_t = SERVER_TICK_RATE)]
    pub tick_rate: u32,
}

impl Config {
    pub fn tick_rate_checked(&self) -> u32 {
        self.tick_rate.clamp(1, 120)
    }
}
