//! Application wiring

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

use approval_api::AppState;
use approval_core::config::AppConfig;
use approval_core::events::TracingEventPublisher;
use approval_engine::{
    ApprovalOrchestrator, EscalationMonitor, InMemoryRequestRepository,
    InMemoryTemplateRepository, SignalDispatcher, TemplateRegistry, TieredRouter,
};

use crate::cli::Args;
use crate::server::Server;

/// Startup figures logged once the engine is built
#[derive(Debug, Clone)]
pub struct StartupSummary {
    pub listen: String,
    pub tiers: usize,
    pub sweep_interval_secs: u64,
    pub max_save_retries: u32,
    pub signal_buffer: usize,
}

/// Main application
pub struct App {
    args: Args,
    config: AppConfig,
    state: AppState,
    monitor: Arc<EscalationMonitor>,
    dispatcher: SignalDispatcher,
}

impl App {
    /// Load configuration and build the engine
    pub async fn build(args: Args) -> Result<Self> {
        args.validate().context("Invalid command line arguments")?;

        let config = match &args.config {
            Some(path) => AppConfig::load_from_file(&path.to_string_lossy())
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => AppConfig::load().context("Failed to load configuration from environment")?,
        };

        let router = TieredRouter::from_config(&config.routing).context("Invalid routing tiers")?;

        let registry = Arc::new(TemplateRegistry::new(Arc::new(
            InMemoryTemplateRepository::new(),
        )));
        let (signals, dispatcher) = SignalDispatcher::channel(config.engine.signal_buffer);
        let dispatcher = dispatcher.with_publisher(Arc::new(TracingEventPublisher::new()));

        let orchestrator = Arc::new(
            ApprovalOrchestrator::new(registry, Arc::new(InMemoryRequestRepository::new()), signals)
                .with_max_save_retries(config.engine.max_save_retries),
        );
        let monitor = Arc::new(
            EscalationMonitor::new(orchestrator.clone())
                .with_sweep_interval(config.engine.sweep_interval()),
        );

        debug!(tiers = router.tiers().len(), "Routing tiers loaded");

        Ok(Self {
            state: AppState::new(orchestrator, Arc::new(router)),
            args,
            config,
            monitor,
            dispatcher,
        })
    }

    pub fn summary(&self) -> StartupSummary {
        StartupSummary {
            listen: format!("{}:{}", self.config.server.host, self.port()),
            tiers: self.state.router.tiers().len(),
            sweep_interval_secs: self.config.engine.sweep_interval().as_secs(),
            max_save_retries: self.config.engine.max_save_retries,
            signal_buffer: self.config.engine.signal_buffer,
        }
    }

    fn port(&self) -> u16 {
        self.args.port.unwrap_or(self.config.server.port)
    }

    /// Serve until Ctrl-C, then stop the background sweep
    pub async fn run(self) -> Result<()> {
        let port = self.port();
        let dispatcher = tokio::spawn(self.dispatcher.run());

        let monitor = self.monitor.clone();
        let sweep = tokio::spawn(async move { monitor.start().await });

        let server = Server::new(&self.config.server.host, port, self.state)?;
        let served = server.run().await;

        self.monitor.stop().await;
        sweep.abort();
        dispatcher.abort();

        served
    }
}
