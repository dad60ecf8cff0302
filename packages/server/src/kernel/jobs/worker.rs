//! Job worker loop and the per-job state machine.
//!
//! Each worker repeatedly takes an id off the [`WorkQueue`] and drives that
//! job through one attempt:
//!
//! ```text
//! dequeue id
//!     │
//!     ├─► reload row (missing -> drop, not Pending -> no-op)
//!     ├─► claim: Pending -> Processing            emit Started
//!     ├─► handler.process(entity_id, payload)
//!     │
//!     ├─► Ok   -> Completed                       emit Completed
//!     └─► Err  -> retries left?
//!                 yes -> Pending, retry_count+1   emit Retrying, re-queue
//!                 no  -> Failed                   emit Failed
//! ```
//!
//! Handler errors and panics are caught per job; nothing a handler does can
//! take down the loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::entity_lock::EntityLocks;
use super::queue::{EnqueueResult, WorkQueue};
use super::registry::JobRegistry;
use super::retry::RetryBackoff;
use super::{Job, JobEvent, JobStatus, JobStore};
use crate::kernel::JobEventHub;

/// What a single dequeue ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The handler succeeded and the job is Completed.
    Completed,
    /// The handler failed; the job is Pending again with this retry count.
    Retrying(i32),
    /// The handler failed with no retries left; the job is Failed.
    Failed,
    /// No row for this id. Dropped.
    Missing,
    /// The row was not Pending (duplicate delivery). No-op.
    Skipped(JobStatus),
    /// Another worker claimed the row first. No-op.
    AlreadyClaimed,
    /// The store could not be read or written. The row keeps whatever
    /// state it had; a Pending row is picked up again by the poller.
    StoreError,
}

/// Shared dependencies of every worker in a pool.
pub(crate) struct WorkerContext {
    pub store: Arc<dyn JobStore>,
    pub registry: Arc<JobRegistry>,
    pub queue: Arc<WorkQueue>,
    pub events: JobEventHub,
    pub entity_locks: Option<Arc<EntityLocks>>,
    pub max_retries: i32,
    pub retry_backoff: RetryBackoff,
    /// Cancels delayed retry re-queues on shutdown.
    pub shutdown: CancellationToken,
}

#[derive(Clone)]
pub(crate) struct JobWorker {
    id: usize,
    ctx: Arc<WorkerContext>,
}

impl JobWorker {
    pub fn new(id: usize, ctx: Arc<WorkerContext>) -> Self {
        Self { id, ctx }
    }

    /// Run until cancelled or the queue is closed and drained.
    ///
    /// Cancellation is only observed between jobs; an in-flight job always
    /// runs to its resolution.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(worker = self.id, "job worker starting");

        loop {
            let job_id = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.ctx.queue.next() => match next {
                    Some(job_id) => job_id,
                    None => break,
                },
            };

            let outcome = self.process(job_id).await;
            debug!(worker = self.id, job_id = %job_id, outcome = ?outcome, "job attempt finished");
        }

        info!(worker = self.id, "job worker stopped");
    }

    /// Drive one attempt of `job_id`.
    pub async fn process(&self, job_id: Uuid) -> JobOutcome {
        // Authoritative state comes from the store, never a cached copy.
        let job = match self.ctx.store.find_by_id(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(worker = self.id, job_id = %job_id, "job not found, dropping");
                return JobOutcome::Missing;
            }
            Err(e) => {
                error!(worker = self.id, job_id = %job_id, error = %e, "failed to load job");
                return JobOutcome::StoreError;
            }
        };

        if job.status != JobStatus::Pending {
            debug!(
                worker = self.id,
                job_id = %job_id,
                status = %job.status,
                "job is not pending, skipping duplicate delivery"
            );
            return JobOutcome::Skipped(job.status);
        }

        // A retry is being recorded for this id; its holder re-queues it
        // after publishing Retrying.
        if self.ctx.queue.is_held(&job_id) {
            debug!(worker = self.id, job_id = %job_id, "job is held for retry, skipping");
            return JobOutcome::Skipped(job.status);
        }

        let job = match self.ctx.store.mark_as_started(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!(worker = self.id, job_id = %job_id, "job claimed by another worker");
                return JobOutcome::AlreadyClaimed;
            }
            Err(e) => {
                error!(worker = self.id, job_id = %job_id, error = %e, "failed to mark job as started");
                return JobOutcome::StoreError;
            }
        };

        info!(
            worker = self.id,
            job_id = %job.id,
            kind = %job.kind,
            entity_id = %job.entity_id,
            attempt = job.retry_count + 1,
            "job started"
        );
        self.ctx.events.publish(JobEvent::started(&job));

        match self.execute(&job).await {
            Ok(()) => self.complete(&job).await,
            Err(e) => self.fail_or_retry(&job, e).await,
        }
    }

    /// Call the handler for `job.kind`, turning panics into errors.
    async fn execute(&self, job: &Job) -> anyhow::Result<()> {
        let _entity_guard = match &self.ctx.entity_locks {
            Some(locks) => Some(locks.acquire(&job.entity_id).await),
            None => None,
        };

        let handler = self.ctx.registry.handler_for(job.kind)?;
        let attempt = handler.process(&job.entity_id, job.payload.as_ref());

        match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(anyhow::anyhow!("handler panicked: {}", message))
            }
        }
    }

    async fn complete(&self, job: &Job) -> JobOutcome {
        match self.ctx.store.mark_as_completed(job.id).await {
            Ok(Some(done)) => {
                info!(worker = self.id, job_id = %job.id, kind = %job.kind, "job completed");
                self.ctx.events.publish(JobEvent::completed(&done));
                JobOutcome::Completed
            }
            Ok(None) => {
                warn!(worker = self.id, job_id = %job.id, "job left processing state before completion was recorded");
                JobOutcome::StoreError
            }
            Err(e) => {
                error!(worker = self.id, job_id = %job.id, error = %e, "failed to mark job as completed");
                JobOutcome::StoreError
            }
        }
    }

    async fn fail_or_retry(&self, job: &Job, error: anyhow::Error) -> JobOutcome {
        let error_message = format!("{:#}", error);

        if job.retry_count < self.ctx.max_retries {
            return self.retry(job, &error_message).await;
        }

        match self.ctx.store.mark_as_failed(job.id, &error_message).await {
            Ok(Some(failed)) => {
                error!(
                    worker = self.id,
                    job_id = %job.id,
                    kind = %job.kind,
                    retry_count = failed.retry_count,
                    error = %error_message,
                    "job failed, retries exhausted"
                );
                self.ctx
                    .events
                    .publish(JobEvent::failed(&failed, error_message));
                JobOutcome::Failed
            }
            Ok(None) => {
                warn!(worker = self.id, job_id = %job.id, "job left processing state before failure was recorded");
                JobOutcome::StoreError
            }
            Err(e) => {
                error!(worker = self.id, job_id = %job.id, error = %e, "failed to mark job as failed");
                JobOutcome::StoreError
            }
        }
    }

    async fn retry(&self, job: &Job, error_message: &str) -> JobOutcome {
        // Held from before the row turns Pending until Retrying is out, so
        // neither the poller nor another worker can start it first.
        self.ctx.queue.hold(job.id);

        let retried = match self.ctx.store.increment_retry_count(job.id, error_message).await {
            Ok(Some(retried)) => retried,
            Ok(None) => {
                self.ctx.queue.unhold(job.id);
                warn!(worker = self.id, job_id = %job.id, "job left processing state before retry was recorded");
                return JobOutcome::StoreError;
            }
            Err(e) => {
                self.ctx.queue.unhold(job.id);
                error!(worker = self.id, job_id = %job.id, error = %e, "failed to schedule job retry");
                return JobOutcome::StoreError;
            }
        };

        let delay = self.ctx.retry_backoff.delay_for(retried.retry_count);
        warn!(
            worker = self.id,
            job_id = %job.id,
            kind = %job.kind,
            retry_count = retried.retry_count,
            delay_ms = delay.as_millis() as u64,
            error = %error_message,
            "job failed, retrying"
        );

        self.ctx
            .events
            .publish(JobEvent::retrying(&retried, retried.retry_count));

        if delay.is_zero() {
            log_requeue(job.id, self.ctx.queue.release(job.id));
        } else {
            // The row is Pending from here on; the poller may pick it up
            // before the delay runs out.
            self.ctx.queue.unhold(job.id);
            self.schedule_requeue(job.id, delay);
        }

        JobOutcome::Retrying(retried.retry_count)
    }

    /// Push `job_id` after `delay`, unless shutdown comes first.
    fn schedule_requeue(&self, job_id: Uuid, delay: Duration) {
        let queue = self.ctx.queue.clone();
        let shutdown = self.ctx.shutdown.clone();
        let worker = self.id;

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(worker, job_id = %job_id, "shutdown before delayed retry, leaving job pending");
                }
                _ = tokio::time::sleep(delay) => log_requeue(job_id, queue.push(job_id)),
            }
        });
    }
}

fn log_requeue(job_id: Uuid, result: EnqueueResult) {
    match result {
        EnqueueResult::Queued => {}
        EnqueueResult::Duplicate => {
            debug!(job_id = %job_id, "retry already queued");
        }
        EnqueueResult::Closed => {
            warn!(job_id = %job_id, "work queue closed, retry left pending for recovery");
        }
    }
}
