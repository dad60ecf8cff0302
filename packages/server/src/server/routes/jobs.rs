//! Job status polling endpoint.
//!
//! GET /api/jobs/:id
//!
//! Clients that miss live events (or never opened a stream) poll here for the
//! authoritative job state.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::kernel::jobs::{Job, JobKind, JobProgress, JobStatus, JobStore};
use crate::server::app::AxumAppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub entity_id: String,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: JobProgress,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        let progress = JobProgress::for_job(&job);
        Self {
            id: job.id,
            kind: job.kind,
            status: job.status,
            entity_id: job.entity_id,
            retry_count: job.retry_count,
            error_message: job.error_message,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            progress,
        }
    }
}

pub async fn job_status_handler(
    Extension(state): Extension<AxumAppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let id = Uuid::parse_str(&id).map_err(|_| StatusCode::BAD_REQUEST)?;

    match state.processor.store().find_by_id(id).await {
        Ok(Some(job)) => Ok(Json(job.into())),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!(job_id = %id, error = %e, "failed to load job status");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
