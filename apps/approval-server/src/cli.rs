//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "approval-server",
    about = "Multi-stage approval orchestration server",
    version,
    long_about = "Routes ERP documents through staged approval workflows with \
                  tiered routing, delegation, voting and SLA escalation."
)]
pub struct Args {
    /// Path to configuration file (environment variables prefixed APP__ override it)
    #[arg(short, long, env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// HTTP server port, overrides server.port from configuration
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Args {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(path) = &self.config {
            if !path.exists() {
                anyhow::bail!("Configuration file {} does not exist", path.display());
            }
        }
        if self.port == Some(0) {
            anyhow::bail!("Port must be non-zero");
        }
        Ok(())
    }
}
