//! Application setup and router construction.

use std::sync::Arc;

use axum::{extract::Extension, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::jobs::JobProcessor;
use crate::server::routes::{health_handler, job_events_handler, job_status_handler};

/// Shared application state
#[derive(Clone)]
pub struct AxumAppState {
    pub processor: Arc<JobProcessor>,
}

/// Build the Axum router for the job surface.
///
/// The host owns the processor lifecycle (`start` / `shutdown`) and merges
/// this router into its own application.
pub fn build_app(processor: Arc<JobProcessor>) -> Router {
    let state = AxumAppState { processor };

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/jobs/events", get(job_events_handler))
        .route("/api/jobs/:id", get(job_status_handler))
        .layer(Extension(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
