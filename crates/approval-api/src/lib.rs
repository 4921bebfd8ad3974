//! REST API for the approval orchestration engine
//!
//! Exposes template registration, request lifecycle, history and routing
//! queries over axum.

pub mod error;
pub mod rest;

use approval_engine::{ApprovalOrchestrator, TemplateRegistry, TieredRouter};
use std::sync::Arc;

pub use error::{ApiError, Result};
pub use rest::router::create_router;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ApprovalOrchestrator>,
    pub router: Arc<TieredRouter>,
}

impl AppState {
    pub fn new(orchestrator: Arc<ApprovalOrchestrator>, router: Arc<TieredRouter>) -> Self {
        Self {
            orchestrator,
            router,
        }
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        self.orchestrator.registry()
    }
}
