//! Job testing utilities.
//!
//! Scriptable handler and store doubles plus small polling helpers for
//! asserting on asynchronous job processing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use uuid::Uuid;

use super::{InMemoryJobStore, Job, JobEvent, JobHandler, JobKind, JobStore};

/// One recorded handler call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub entity_id: String,
    pub payload: Option<Value>,
}

/// Mock handler for testing.
///
/// Records every call, fails a configurable number of times, and tracks how
/// many calls for the same entity overlapped.
pub struct MockJobHandler {
    invocations: RwLock<Vec<Invocation>>,
    failures_left: AtomicUsize,
    always_fail: Option<String>,
    delay: Duration,
    in_flight: RwLock<HashMap<String, usize>>,
    max_in_flight_per_entity: AtomicUsize,
}

impl MockJobHandler {
    /// Handler that always succeeds immediately.
    pub fn new() -> Self {
        Self {
            invocations: RwLock::new(Vec::new()),
            failures_left: AtomicUsize::new(0),
            always_fail: None,
            delay: Duration::ZERO,
            in_flight: RwLock::new(HashMap::new()),
            max_in_flight_per_entity: AtomicUsize::new(0),
        }
    }

    /// Fails the first `times` calls, then succeeds.
    pub fn failing_times(times: usize) -> Self {
        let handler = Self::new();
        handler.failures_left.store(times, Ordering::SeqCst);
        handler
    }

    /// Fails every call with `message`.
    pub fn always_failing(message: impl Into<String>) -> Self {
        Self {
            always_fail: Some(message.into()),
            ..Self::new()
        }
    }

    /// Sleep for `delay` inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn was_invoked_with(&self, entity_id: &str) -> bool {
        self.invocations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|i| i.entity_id == entity_id)
    }

    /// Highest number of simultaneous calls seen for any single entity.
    pub fn max_in_flight_per_entity(&self) -> usize {
        self.max_in_flight_per_entity.load(Ordering::SeqCst)
    }

    fn enter(&self, entity_id: &str) {
        let mut in_flight = self.in_flight.write().unwrap_or_else(|e| e.into_inner());
        let count = in_flight.entry(entity_id.to_string()).or_insert(0);
        *count += 1;
        self.max_in_flight_per_entity
            .fetch_max(*count, Ordering::SeqCst);
    }

    fn exit(&self, entity_id: &str) {
        let mut in_flight = self.in_flight.write().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = in_flight.get_mut(entity_id) {
            *count = count.saturating_sub(1);
        }
    }
}

impl Default for MockJobHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for MockJobHandler {
    async fn process(&self, entity_id: &str, payload: Option<&Value>) -> Result<()> {
        self.invocations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Invocation {
                entity_id: entity_id.to_string(),
                payload: payload.cloned(),
            });

        self.enter(entity_id);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.exit(entity_id);

        if let Some(message) = &self.always_fail {
            anyhow::bail!("{}", message);
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            anyhow::bail!("mock handler failure for {}", entity_id);
        }
        Ok(())
    }
}

/// Store wrapper whose `find_pending_jobs` can be made to fail on demand,
/// and whose retry writes can be made to reply late.
pub struct FlakyJobStore {
    inner: InMemoryJobStore,
    fail_pending_queries: AtomicBool,
    pending_queries: AtomicUsize,
    retry_reply_delay_ms: AtomicU64,
}

impl FlakyJobStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryJobStore::new(),
            fail_pending_queries: AtomicBool::new(false),
            pending_queries: AtomicUsize::new(0),
            retry_reply_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_pending_queries.store(failing, Ordering::SeqCst);
    }

    /// Sleep this long after `increment_retry_count` has committed, before
    /// returning the updated row.
    pub fn set_retry_reply_delay(&self, delay: Duration) {
        self.retry_reply_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// How many times `find_pending_jobs` was called, failed or not.
    pub fn pending_query_count(&self) -> usize {
        self.pending_queries.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryJobStore {
        &self.inner
    }
}

impl Default for FlakyJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for FlakyJobStore {
    async fn create(&self, kind: JobKind, entity_id: &str, payload: Option<Value>) -> Result<Job> {
        self.inner.create(kind, entity_id, payload).await
    }

    async fn insert(&self, job: Job) -> Result<Job> {
        self.inner.insert(job).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        self.inner.find_by_id(id).await
    }

    async fn find_pending_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        self.pending_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_pending_queries.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        self.inner.find_pending_jobs(limit).await
    }

    async fn mark_as_started(&self, id: Uuid) -> Result<Option<Job>> {
        self.inner.mark_as_started(id).await
    }

    async fn mark_as_completed(&self, id: Uuid) -> Result<Option<Job>> {
        self.inner.mark_as_completed(id).await
    }

    async fn mark_as_failed(&self, id: Uuid, error_message: &str) -> Result<Option<Job>> {
        self.inner.mark_as_failed(id, error_message).await
    }

    async fn increment_retry_count(&self, id: Uuid, error_message: &str) -> Result<Option<Job>> {
        let retried = self.inner.increment_retry_count(id, error_message).await?;
        let delay_ms = self.retry_reply_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        Ok(retried)
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until `job_id` is in a terminal state and return it.
pub async fn wait_for_terminal(
    store: &Arc<dyn JobStore>,
    job_id: Uuid,
    timeout: Duration,
) -> Option<Job> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(Some(job)) = store.find_by_id(job_id).await {
            if job.status.is_terminal() {
                return Some(job);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Collect events from `stream` until one for `job_id` is terminal or
/// `timeout` elapses.
pub async fn collect_until_terminal(
    stream: &mut BoxStream<'static, JobEvent>,
    job_id: Uuid,
    timeout: Duration,
) -> Vec<JobEvent> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Some(event) = stream.next().await {
            let done = event.job_id() == job_id && event.is_terminal();
            events.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    events
}
