//! In-memory job store.
//!
//! Backs the processor in tests and in single-process setups without a
//! database. Every transition runs under one write lock, so the conditional
//! semantics match [`PostgresJobStore`](super::PostgresJobStore).

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{Job, JobKind, JobStatus, JobStore};

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored job, oldest first.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        jobs
    }

    /// Remove every job.
    pub fn clear(&self) {
        self.jobs.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Apply `transition` if the job exists and is in `expected` status.
    fn transition<F>(&self, id: Uuid, expected: JobStatus, transition: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let job = jobs.get_mut(&id).filter(|j| j.status == expected)?;
        transition(job);
        Some(job.clone())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(
        &self,
        kind: JobKind,
        entity_id: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<Job> {
        self.insert(Job::new(kind, entity_id, payload)).await
    }

    async fn insert(&self, job: Job) -> Result<Job> {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }

    async fn find_pending_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        let mut pending: Vec<Job> = self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|j| j.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|j| (j.created_at, j.id));
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn mark_as_started(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.transition(id, JobStatus::Pending, |job| job.start(Utc::now())))
    }

    async fn mark_as_completed(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.transition(id, JobStatus::Processing, |job| job.complete(Utc::now())))
    }

    async fn mark_as_failed(&self, id: Uuid, error_message: &str) -> Result<Option<Job>> {
        Ok(self.transition(id, JobStatus::Processing, |job| {
            job.fail(error_message, Utc::now())
        }))
    }

    async fn increment_retry_count(&self, id: Uuid, error_message: &str) -> Result<Option<Job>> {
        Ok(self.transition(id, JobStatus::Processing, |job| {
            job.schedule_retry(error_message)
        }))
    }
}
