//! Log subscriber setup for the approval server

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::Args;

/// Directives used when `RUST_LOG` is unset: engine crates at `level`, HTTP plumbing quieter
fn default_directives(level: &str) -> String {
    format!(
        "{level},approval_server={level},approval_engine={level},approval_api={level},\
         tower_http=info,hyper=warn"
    )
}

/// Install the global subscriber; `RUST_LOG` takes precedence over `--log-level`
pub fn init_logging(args: &Args) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(&args.log_level))
            .context("Failed to build log filter")?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if args.json_logs {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().compact().with_target(true)).try_init()
    };

    installed.context("Log subscriber already installed")
}
