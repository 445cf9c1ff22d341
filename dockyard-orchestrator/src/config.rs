//! Server configuration
//!
//! HTTP-facing options. Engine options are read separately through
//! `EngineConfig::from_env`.

use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "dockyard")]
#[command(about = "Dockyard build-and-deploy server", long_about = None)]
pub struct Config {
    /// Address the HTTP server listens on
    #[arg(long, env = "DOCKYARD_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Origin allowed to call the API from a browser
    #[arg(
        long,
        env = "DOCKYARD_CORS_ORIGIN",
        default_value = "http://localhost:5173"
    )]
    pub cors_origin: String,

    /// Seconds a finished build's log stays available to new subscribers
    #[arg(long, env = "DOCKYARD_LOG_RETENTION", default_value_t = 600)]
    pub log_retention: u64,

    /// Seconds between sweeps of finished build logs
    #[arg(long, env = "DOCKYARD_PRUNE_INTERVAL", default_value_t = 60)]
    pub prune_interval: u64,
}

impl Config {
    pub fn log_retention(&self) -> Duration {
        Duration::from_secs(self.log_retention)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval.max(1))
    }
}
