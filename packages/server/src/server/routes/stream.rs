//! SSE endpoint for live job events.
//!
//! GET /api/jobs/events?entityId=...
//!
//! Streams the lifecycle events of every job for one entity. Events are
//! progress hints only; after a `lagged` event (or a reconnect) the client
//! should re-read job status.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use serde::Deserialize;
use tracing::debug;

use crate::kernel::sse::entity_events;
use crate::server::app::AxumAppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEventsQuery {
    entity_id: Option<String>,
}

pub async fn job_events_handler(
    Extension(state): Extension<AxumAppState>,
    Query(query): Query<JobEventsQuery>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let entity_id = query
        .entity_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(StatusCode::BAD_REQUEST)?;

    debug!(entity_id = %entity_id, "job event stream opened");
    let events = entity_events(state.processor.events(), entity_id);

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
