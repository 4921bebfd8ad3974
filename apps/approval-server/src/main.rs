mod app;
mod cli;
mod server;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use crate::app::App;
use crate::cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    telemetry::init_logging(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args
            .config
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "environment".to_string()),
        "Starting approval orchestration server"
    );

    let app = match App::build(args).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to build approval engine: {:#}", e);
            return Err(e);
        }
    };

    let summary = app.summary();
    info!(
        listen = %summary.listen,
        tiers = summary.tiers,
        sweep_interval_secs = summary.sweep_interval_secs,
        max_save_retries = summary.max_save_retries,
        signal_buffer = summary.signal_buffer,
        "Approval engine ready"
    );

    if let Err(e) = app.run().await {
        error!("Approval server stopped with error: {:#}", e);
        return Err(e);
    }

    info!("Approval server stopped, background sweep halted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert()
    }
}
