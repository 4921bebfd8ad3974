//! HTTP Server implementation

use anyhow::{Context, Result};
use axum::{response::Json, routing::get, Router};
use serde_json::json;
use std::net::SocketAddr;
use tracing::info;

use approval_api::{create_router, AppState};

pub struct Server {
    addr: SocketAddr,
    state: AppState,
}

impl Server {
    pub fn new(host: &str, port: u16, state: AppState) -> Result<Self> {
        let addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

        Ok(Self { addr, state })
    }

    pub async fn run(self) -> Result<()> {
        let app = build_http_router(self.state);

        info!("HTTP server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .context("Failed to bind HTTP server")?;

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server error")?;

        Ok(())
    }
}

fn build_http_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(create_router(state))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "Approval Orchestration Engine",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_handler() {
        let response = root().await;
        assert_eq!(response.0["service"], "Approval Orchestration Engine");
    }

    #[test]
    fn test_invalid_listen_address() {
        assert!("not a host:8080".parse::<SocketAddr>().is_err());
    }
}
