//! In-memory work queue of job ids.
//!
//! Unbounded multi-producer / multi-consumer channel decoupling enqueue from
//! execution. Producers (domain code, the recovery poller, the retry path)
//! push ids; workers compete for them through a shared receiver.
//!
//! The queue remembers which ids are currently waiting, so the recovery
//! poller re-discovering a job that is already queued does not pile up
//! duplicates. Once an id is handed to a worker it may be queued again; the
//! worker's claim on the store row is what makes double delivery harmless.
//!
//! A worker recording a retry holds the id while the store write and the
//! Retrying event are in flight. While held, pushes report `Duplicate` and
//! stale entries for the id are skipped by `next`, so no other worker can
//! start the job until [`WorkQueue::release`] puts it back.

use std::collections::HashSet;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Result of pushing an id onto the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// The id was added.
    Queued,
    /// The id is already waiting in the queue.
    Duplicate,
    /// The queue is closed and no longer accepts entries.
    Closed,
}

impl EnqueueResult {
    pub fn is_queued(&self) -> bool {
        matches!(self, EnqueueResult::Queued)
    }
}

pub struct WorkQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<Uuid>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Uuid>>,
    waiting: Mutex<HashSet<Uuid>>,
    held: Mutex<HashSet<Uuid>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            waiting: Mutex::new(HashSet::new()),
            held: Mutex::new(HashSet::new()),
        }
    }

    /// Push a job id. Never blocks.
    pub fn push(&self, job_id: Uuid) -> EnqueueResult {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = sender.as_ref() else {
            return EnqueueResult::Closed;
        };

        if self.is_held(&job_id) {
            return EnqueueResult::Duplicate;
        }

        let mut waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
        if !waiting.insert(job_id) {
            return EnqueueResult::Duplicate;
        }

        if sender.send(job_id).is_err() {
            waiting.remove(&job_id);
            return EnqueueResult::Closed;
        }
        EnqueueResult::Queued
    }

    /// Wait for the next id. Returns `None` once the queue is closed and drained.
    ///
    /// Cancel-safe: dropping the future never loses an id.
    pub async fn next(&self) -> Option<Uuid> {
        let mut receiver = self.receiver.lock().await;
        loop {
            let job_id = receiver.recv().await?;
            self.waiting
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&job_id);

            // The holder pushes it again on release.
            if self.is_held(&job_id) {
                debug!(job_id = %job_id, "skipping held job id");
                continue;
            }
            return Some(job_id);
        }
    }

    /// Keep `job_id` out of workers' hands until [`release`](Self::release)
    /// or [`unhold`](Self::unhold).
    pub fn hold(&self, job_id: Uuid) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id);
    }

    /// Drop the hold without queueing the id.
    pub fn unhold(&self, job_id: Uuid) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id);
    }

    /// Drop the hold and push the id.
    pub fn release(&self, job_id: Uuid) -> EnqueueResult {
        self.unhold(job_id);
        self.push(job_id)
    }

    pub fn is_held(&self, job_id: &Uuid) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(job_id)
    }

    /// Stop accepting new entries. Ids already queued can still be drained.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    /// Number of ids waiting for a worker.
    pub fn len(&self) -> usize {
        self.waiting.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_push_and_next_fifo() {
        let queue = WorkQueue::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();

        assert_eq!(queue.push(a), EnqueueResult::Queued);
        assert_eq!(queue.push(b), EnqueueResult::Queued);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.next().await, Some(a));
        assert_eq!(queue.next().await, Some(b));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_while_waiting() {
        let queue = WorkQueue::new();
        let id = Uuid::now_v7();

        assert!(queue.push(id).is_queued());
        assert_eq!(queue.push(id), EnqueueResult::Duplicate);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.next().await, Some(id));
        // Handed out; it may be queued again.
        assert!(queue.push(id).is_queued());
    }

    #[tokio::test]
    async fn test_close_rejects_new_entries_but_drains() {
        let queue = WorkQueue::new();
        let id = Uuid::now_v7();
        queue.push(id);

        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.push(Uuid::now_v7()), EnqueueResult::Closed);

        assert_eq!(queue.next().await, Some(id));
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test]
    async fn test_competing_consumers_each_get_distinct_ids() {
        let queue = Arc::new(WorkQueue::new());
        let ids: Vec<Uuid> = (0..20).map(|_| Uuid::now_v7()).collect();
        for id in &ids {
            queue.push(*id);
        }
        queue.close();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(id) = queue.next().await {
                    got.push(id);
                }
                got
            }));
        }

        let mut received = Vec::new();
        for handle in handles {
            received.extend(handle.await.unwrap());
        }
        received.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_next_waits_for_push() {
        let queue = Arc::new(WorkQueue::new());
        let id = Uuid::now_v7();

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(id);

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(id));
    }

    #[tokio::test]
    async fn test_push_while_held_is_duplicate_until_release() {
        let queue = WorkQueue::new();
        let id = Uuid::now_v7();

        queue.hold(id);
        assert_eq!(queue.push(id), EnqueueResult::Duplicate);
        assert!(queue.is_empty());

        assert_eq!(queue.release(id), EnqueueResult::Queued);
        assert!(!queue.is_held(&id));
        assert_eq!(queue.next().await, Some(id));
    }

    #[tokio::test]
    async fn test_next_skips_stale_entry_for_held_id() {
        let queue = WorkQueue::new();
        let held = Uuid::now_v7();
        let other = Uuid::now_v7();

        // Queued before the hold, e.g. by the recovery poller.
        queue.push(held);
        queue.push(other);
        queue.hold(held);

        assert_eq!(queue.next().await, Some(other));
        assert!(queue.is_empty());

        assert!(queue.release(held).is_queued());
        assert_eq!(queue.next().await, Some(held));
    }

    #[tokio::test]
    async fn test_release_while_stale_entry_waits_delivers_once() {
        let queue = WorkQueue::new();
        let id = Uuid::now_v7();

        queue.push(id);
        queue.hold(id);
        // The waiting entry is delivered normally once the hold is gone.
        assert_eq!(queue.release(id), EnqueueResult::Duplicate);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await, Some(id));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_release_after_close_clears_hold() {
        let queue = WorkQueue::new();
        let id = Uuid::now_v7();

        queue.hold(id);
        queue.close();

        assert_eq!(queue.release(id), EnqueueResult::Closed);
        assert!(!queue.is_held(&id));
    }
}
