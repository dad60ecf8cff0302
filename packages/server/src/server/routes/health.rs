use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AxumAppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: String,
    job_processor: JobProcessorHealth,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProcessorHealth {
    running: bool,
    queued: usize,
    event_subscribers: usize,
}

/// Health check endpoint
///
/// Returns 200 OK while the job processor is running, 503 Service Unavailable
/// before start and after shutdown.
pub async fn health_handler(
    Extension(state): Extension<AxumAppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let processor = &state.processor;
    let running = processor.is_running();

    let job_processor = JobProcessorHealth {
        running,
        queued: processor.queued_len(),
        event_subscribers: processor.events().subscriber_count(),
    };

    let (status_code, status) = if running {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            job_processor,
        }),
    )
}
