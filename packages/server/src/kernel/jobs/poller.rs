//! Recovery poller.
//!
//! The work queue lives in memory, so anything queued when the process died
//! is gone. The poller periodically asks the store for Pending jobs and puts
//! them back on the queue, which also picks up rows inserted by other
//! processes.
//!
//! ```text
//! RecoveryPoller
//!     │
//!     ├─► find_pending_jobs(batch_size)
//!     │       ├─ Ok   -> push each id, sleep poll_interval
//!     │       └─ Err  -> log, sleep error_backoff
//!     └─► stop on cancellation
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::queue::{EnqueueResult, WorkQueue};
use super::JobStore;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pause between successful polls.
    pub poll_interval: Duration,
    /// Pause after a failed poll.
    pub error_backoff: Duration,
    /// Maximum Pending jobs fetched per poll.
    pub batch_size: i64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
            batch_size: 10,
        }
    }
}

pub(crate) struct RecoveryPoller {
    store: Arc<dyn JobStore>,
    queue: Arc<WorkQueue>,
    config: PollerConfig,
}

impl RecoveryPoller {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<WorkQueue>, config: PollerConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// One poll: fetch Pending jobs and queue any not already waiting.
    ///
    /// Returns how many ids were newly queued.
    pub async fn poll_once(&self) -> Result<usize> {
        let jobs = self.store.find_pending_jobs(self.config.batch_size).await?;

        let mut queued = 0;
        for job in &jobs {
            match self.queue.push(job.id) {
                EnqueueResult::Queued => queued += 1,
                EnqueueResult::Duplicate => {}
                EnqueueResult::Closed => break,
            }
        }

        if queued > 0 {
            info!(found = jobs.len(), queued, "recovered pending jobs");
        } else {
            debug!(found = jobs.len(), "no pending jobs to recover");
        }
        Ok(queued)
    }

    /// Poll immediately, then on every interval, until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "recovery poller starting"
        );

        loop {
            let pause = match self.poll_once().await {
                Ok(_) => self.config.poll_interval,
                Err(e) => {
                    error!(error = %format!("{:#}", e), "failed to poll pending jobs");
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("recovery poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::testing::FlakyJobStore;
    use crate::kernel::jobs::{InMemoryJobStore, JobKind};

    fn poller(store: Arc<dyn JobStore>, queue: Arc<WorkQueue>, batch_size: i64) -> RecoveryPoller {
        RecoveryPoller::new(
            store,
            queue,
            PollerConfig {
                batch_size,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_config_defaults() {
        let config = PollerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.error_backoff, Duration::from_secs(10));
        assert_eq!(config.batch_size, 10);
    }

    #[tokio::test]
    async fn test_poll_queues_oldest_pending_up_to_batch() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut ids = Vec::new();
        for i in 0..3 {
            let job = store
                .create(JobKind::GenerateSummary, &format!("conflict-{}", i), None)
                .await
                .unwrap();
            ids.push(job.id);
        }
        let queue = Arc::new(WorkQueue::new());

        let queued = poller(store, queue.clone(), 2).poll_once().await.unwrap();

        assert_eq!(queued, 2);
        assert_eq!(queue.next().await, Some(ids[0]));
        assert_eq!(queue.next().await, Some(ids[1]));
    }

    #[tokio::test]
    async fn test_poll_skips_ids_already_waiting() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = store
            .create(JobKind::ProcessFeelings, "journal-1", None)
            .await
            .unwrap();
        let queue = Arc::new(WorkQueue::new());
        queue.push(job.id);

        let queued = poller(store, queue.clone(), 10).poll_once().await.unwrap();

        assert_eq!(queued, 0);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_poll_error_is_returned() {
        let store = Arc::new(FlakyJobStore::new());
        store.set_failing(true);
        let queue = Arc::new(WorkQueue::new());

        assert!(poller(store, queue.clone(), 10).poll_once().await.is_err());
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_backs_off_after_error() {
        let store = Arc::new(FlakyJobStore::new());
        store.set_failing(true);
        let queue = Arc::new(WorkQueue::new());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(
            poller(store.clone(), queue, 10).run(shutdown.clone()),
        );

        // First poll is immediate and fails.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(store.pending_query_count(), 1);

        // Still inside the 10s error backoff, not the 5s interval.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.pending_query_count(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.pending_query_count(), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(WorkQueue::new());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(poller(store, queue, 10).run(shutdown.clone()));
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
