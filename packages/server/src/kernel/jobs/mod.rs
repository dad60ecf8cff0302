//! Background job processing.
//!
//! Slow, fallible work (AI summaries, feelings processing, discussion points,
//! partnership context updates) runs here instead of on the request path.
//!
//! # Architecture
//!
//! ```text
//! Domain action
//!     │
//!     ├─► JobStore.create(kind, entity_id, payload)    row is Pending
//!     └─► JobProcessor.queue_job(id)
//!             └─► WorkQueue (in memory, unbounded)
//!
//! JobWorker x N
//!     │
//!     ├─► reload row, claim Pending -> Processing
//!     ├─► JobRegistry handler for kind
//!     └─► Completed | Pending (retry) | Failed
//!             └─► JobEventHub -> SSE subscribers
//!
//! RecoveryPoller
//!     └─► find_pending_jobs -> WorkQueue            crash recovery
//! ```
//!
//! Delivery is at-least-once. Handlers must tolerate being run again for
//! the same entity.

mod entity_lock;
mod error;
pub mod events;
mod in_memory_store;
mod job;
mod job_store;
mod poller;
mod processor;
mod progress;
mod queue;
mod registry;
mod retry;
pub mod testing;
mod worker;

pub use error::JobError;
pub use events::JobEvent;
pub use in_memory_store::InMemoryJobStore;
pub use job::{Job, JobKind, JobStatus};
pub use job_store::{JobStore, PostgresJobStore};
pub use poller::PollerConfig;
pub use processor::{JobProcessor, JobProcessorConfig};
pub use progress::JobProgress;
pub use queue::EnqueueResult;
pub use registry::{JobHandler, JobRegistry};
pub use retry::RetryBackoff;
pub use worker::JobOutcome;
