//! Axum router configuration

use crate::{rest::handlers, AppState};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::{sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let api_v1 = Router::new()
        // Template routes
        .route(
            "/templates",
            post(handlers::create_template).get(handlers::list_templates),
        )
        .route("/templates/:id", get(handlers::get_template))
        .route("/templates/:id/revisions", post(handlers::revise_template))
        // Request routes
        .route("/requests", post(handlers::initiate_request))
        .route("/requests/:id", get(handlers::get_request))
        .route("/requests/:id/actions", post(handlers::record_action))
        .route("/requests/:id/cancel", post(handlers::cancel_request))
        .route("/requests/:id/history", get(handlers::get_history))
        // Query routes
        .route("/users/:id/pending", get(handlers::pending_for_user))
        .route("/documents/:id/requests", get(handlers::requests_for_document))
        // Routing routes
        .route("/routing/tier", post(handlers::resolve_tier))
        .route("/routing/approvers", post(handlers::determine_approvers));

    Router::new()
        .nest("/api/v1", api_v1)
        .route("/health", get(handlers::health_check))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Configure CORS layer
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(
            std::env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .parse::<HeaderValue>()
                .unwrap_or(HeaderValue::from_static("*")),
        )
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-request-id"),
        ])
        .max_age(Duration::from_secs(3600))
}
