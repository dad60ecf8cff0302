//! Job events as Server-Sent Events.
//!
//! Subscribes to the [`JobEventHub`] and forwards the events of a single
//! entity. Each SSE event is named after the job event type (`started`,
//! `completed`, `failed`, `retrying`) and carries the JSON event as data.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::stream::{self, Stream, StreamExt};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use super::jobs::JobEvent;
use super::stream_hub::JobEventHub;

/// SSE stream for `entity_id`: a `connected` event, then every matching job
/// event in publish order. A `lagged` event reports dropped events so the
/// client can fall back to polling job status.
pub fn entity_events(
    hub: &JobEventHub,
    entity_id: String,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let rx = hub.subscribe();

    let connected =
        stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("ok")) });

    let events = BroadcastStream::new(rx).filter_map(move |result| {
        let event = match result {
            Ok(event) if event.entity_id() == entity_id => to_sse(&event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                warn!(entity_id = %entity_id, missed, "sse subscriber lagged");
                Event::default()
                    .event("lagged")
                    .json_data(serde_json::json!({ "missed": missed }))
                    .ok()
            }
        };
        futures::future::ready(event.map(Ok))
    });

    connected.chain(events)
}

fn to_sse(event: &JobEvent) -> Option<Event> {
    match Event::default().event(event.event_type()).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            warn!(job_id = %event.job_id(), error = %e, "failed to serialize job event");
            None
        }
    }
}
