use clap::{ArgAction, Parser};
use shared::DEFAULT_PORT;
use std::time::Duration;

/// Runtime settings for the host. Parsed from the command line by the binary,
/// built with `Default` by tests and embedding code.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Authoritative host for the tag game")]
pub struct ServerConfig {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Simulation ticks per second
    #[arg(short, long, default_value_t = 60)]
    pub tick_rate: u32,

    /// Seconds of silence before a peer is dropped (0 disables)
    #[arg(long, default_value_t = 10)]
    pub idle_timeout: u64,

    /// Seed for pickup placement and tagger selection
    #[arg(long)]
    pub seed: Option<u64>,

    /// Run without a local player; all identities go to peers
    #[arg(long = "no-host-player", action = ArgAction::SetFalse)]
    pub host_player: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            tick_rate: 60,
            idle_timeout: 10,
            seed: None,
            host_player: true,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }
}
