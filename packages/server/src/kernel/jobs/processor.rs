//! Job processor: owns the work queue, worker pool, recovery poller and
//! event hub, and exposes the producer/consumer surface.
//!
//! # Example
//!
//! ```ignore
//! let processor = Arc::new(JobProcessor::new(store.clone(), registry, JobProcessorConfig::default())?);
//! processor.start()?;
//!
//! // Producer: the row must already exist as Pending.
//! let job = store.create(JobKind::GenerateSummary, &conflict_id, None).await?;
//! processor.queue_job(job.id);
//!
//! // Consumer:
//! let mut events = processor.entity_stream(conflict_id);
//!
//! processor.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::entity_lock::EntityLocks;
use super::poller::{PollerConfig, RecoveryPoller};
use super::queue::{EnqueueResult, WorkQueue};
use super::registry::JobRegistry;
use super::retry::RetryBackoff;
use super::worker::{JobWorker, WorkerContext};
use super::{Job, JobError, JobEvent, JobKind, JobStore};
use crate::kernel::stream_hub::{JobEventHub, DEFAULT_EVENT_CAPACITY};

/// Tuning for a [`JobProcessor`].
#[derive(Debug, Clone)]
pub struct JobProcessorConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,
    /// Pause between successful recovery polls.
    pub poll_interval: Duration,
    /// Pause after a failed recovery poll.
    pub poll_error_backoff: Duration,
    /// Pending jobs fetched per recovery poll.
    pub poll_batch_size: i64,
    /// Handler failures tolerated before a job is marked Failed.
    pub max_retries: i32,
    /// Events buffered per subscriber before the oldest are dropped.
    pub event_capacity: usize,
    /// Delay before a failed job is re-queued.
    pub retry_backoff: RetryBackoff,
    /// Serialize handler calls that share an `entity_id`.
    pub entity_exclusive: bool,
}

impl Default for JobProcessorConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            poll_interval: Duration::from_secs(5),
            poll_error_backoff: Duration::from_secs(10),
            poll_batch_size: 10,
            max_retries: 3,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            retry_backoff: RetryBackoff::none(),
            entity_exclusive: false,
        }
    }
}

impl JobProcessorConfig {
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_poll_error_backoff(mut self, backoff: Duration) -> Self {
        self.poll_error_backoff = backoff;
        self
    }

    pub fn with_poll_batch_size(mut self, batch_size: i64) -> Self {
        self.poll_batch_size = batch_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_entity_exclusive(mut self, exclusive: bool) -> Self {
        self.entity_exclusive = exclusive;
        self
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if self.worker_count == 0 {
            return Err(JobError::InvalidConfig(
                "worker_count must be at least 1".into(),
            ));
        }
        if self.poll_batch_size <= 0 {
            return Err(JobError::InvalidConfig(
                "poll_batch_size must be at least 1".into(),
            ));
        }
        if self.max_retries < 0 {
            return Err(JobError::InvalidConfig(
                "max_retries must not be negative".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(JobError::InvalidConfig(
                "event_capacity must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(JobError::InvalidConfig(
                "poll_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }

    fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: self.poll_interval,
            error_backoff: self.poll_error_backoff,
            batch_size: self.poll_batch_size,
        }
    }
}

/// Background job orchestrator. Construct once per process and share the
/// instance (usually behind an `Arc`) with producers and consumers.
pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    registry: Arc<JobRegistry>,
    config: JobProcessorConfig,
    queue: Arc<WorkQueue>,
    events: JobEventHub,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: JobRegistry,
        config: JobProcessorConfig,
    ) -> Result<Self, JobError> {
        config.validate()?;

        Ok(Self {
            store,
            registry: Arc::new(registry),
            events: JobEventHub::with_capacity(config.event_capacity),
            config,
            queue: Arc::new(WorkQueue::new()),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Spawn the worker pool and the recovery poller.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), JobError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(JobError::ShutDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(JobError::AlreadyStarted);
        }

        let missing = self.registry.missing_kinds();
        if !missing.is_empty() {
            warn!(kinds = ?missing, "no handler registered for some job kinds, their jobs will fail");
        }

        info!(
            worker_count = self.config.worker_count,
            max_retries = self.config.max_retries,
            entity_exclusive = self.config.entity_exclusive,
            "starting job processor"
        );

        let ctx = Arc::new(WorkerContext {
            store: self.store.clone(),
            registry: self.registry.clone(),
            queue: self.queue.clone(),
            events: self.events.clone(),
            entity_locks: self
                .config
                .entity_exclusive
                .then(|| Arc::new(EntityLocks::new())),
            max_retries: self.config.max_retries,
            retry_backoff: self.config.retry_backoff,
            shutdown: self.shutdown.clone(),
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for id in 0..self.config.worker_count {
            let worker = JobWorker::new(id, ctx.clone());
            tasks.push(tokio::spawn(worker.run(self.shutdown.clone())));
        }

        let poller = RecoveryPoller::new(
            self.store.clone(),
            self.queue.clone(),
            self.config.poller_config(),
        );
        tasks.push(tokio::spawn(poller.run(self.shutdown.clone())));

        Ok(())
    }

    /// Hand an existing Pending job to the worker pool. Never blocks.
    ///
    /// After shutdown the id is dropped; the row stays Pending for the next
    /// process's recovery poller.
    pub fn queue_job(&self, job_id: Uuid) -> EnqueueResult {
        let result = self.queue.push(job_id);
        if result == EnqueueResult::Closed {
            warn!(job_id = %job_id, "job processor is shut down, job not queued");
        }
        result
    }

    /// Create a Pending job in the store and queue it.
    pub async fn enqueue(
        &self,
        kind: JobKind,
        entity_id: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<Job> {
        let job = self.store.create(kind, entity_id, payload).await?;
        self.queue_job(job.id);
        Ok(job)
    }

    /// Raw event subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Live stream of every job event.
    pub fn event_stream(&self) -> BoxStream<'static, JobEvent> {
        self.events.event_stream()
    }

    /// Live stream of events for one entity.
    pub fn entity_stream(&self, entity_id: impl Into<String>) -> BoxStream<'static, JobEvent> {
        self.events.entity_stream(entity_id)
    }

    pub fn events(&self) -> &JobEventHub {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &JobProcessorConfig {
        &self.config
    }

    /// Ids waiting for a worker.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    /// Stop accepting work and wait for workers and the poller to exit.
    ///
    /// Jobs already in a handler run to completion. Ids still queued are
    /// left for the recovery poller of the next process. Idempotent.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(queued = self.queue.len(), "shutting down job processor");
        self.queue.close();
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "job processor task ended abnormally");
            }
        }

        info!("job processor stopped");
    }
}

impl Drop for JobProcessor {
    fn drop(&mut self) {
        self.queue.close();
        self.shutdown.cancel();
    }
}
