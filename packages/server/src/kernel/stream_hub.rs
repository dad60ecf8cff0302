//! In-process broadcast hub for job lifecycle events.
//!
//! Every published [`JobEvent`] is delivered to all current subscribers.
//! Nothing is persisted or replayed: a subscriber only sees events published
//! after it subscribed.
//!
//! # Overflow policy
//!
//! Drop-oldest. The hub keeps at most `capacity` undelivered events per
//! subscriber. Publishing never blocks; a subscriber that falls further
//! behind loses the oldest events and resumes from the oldest one still
//! buffered. The raw receiver reports the gap as `RecvError::Lagged(n)`; the
//! stream helpers log it and move on.
//!
//! # Usage
//!
//! Producers (job workers):
//!   hub.publish(JobEvent::started(&job));
//!
//! Consumers (SSE endpoints):
//!   let events = hub.entity_stream("conflict-1");

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use super::jobs::JobEvent;

/// Events buffered per subscriber before the oldest are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Thread-safe, cloneable broadcaster of [`JobEvent`]s.
#[derive(Clone)]
pub struct JobEventHub {
    sender: broadcast::Sender<JobEvent>,
}

impl JobEventHub {
    /// Create a hub with the default capacity (100 events).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a hub with the given per-subscriber capacity (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every subscriber.
    ///
    /// Returns how many subscribers received it; 0 when nobody is listening.
    pub fn publish(&self, event: JobEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Raw subscription. Lag is surfaced as `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Live stream of every event, skipping over lag gaps.
    pub fn event_stream(&self) -> BoxStream<'static, JobEvent> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|result| async move {
                match result {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        warn!(missed, "job event subscriber lagged, oldest events dropped");
                        None
                    }
                }
            })
            .boxed()
    }

    /// Live stream of events for one entity, in publish order.
    pub fn entity_stream(&self, entity_id: impl Into<String>) -> BoxStream<'static, JobEvent> {
        let entity_id = entity_id.into();
        self.event_stream()
            .filter(move |event| futures::future::ready(event.entity_id() == entity_id))
            .boxed()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobEventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JobEventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEventHub")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
