use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Job, JobKind};

/// Job lifecycle events.
///
/// These are facts about state transitions, published exactly once per
/// transition. They are progress hints for live clients, never a source of
/// truth: a client that misses one falls back to polling the job row.
///
/// Serialized with a `type` tag so the SSE layer can use it as the event
/// name, e.g. `{"type":"retrying","jobId":..,"kind":..,"entityId":..,"retryCount":1}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum JobEvent {
    /// A worker claimed the job and is about to call its handler.
    Started {
        job_id: Uuid,
        kind: JobKind,
        entity_id: String,
    },

    /// The handler succeeded.
    Completed {
        job_id: Uuid,
        kind: JobKind,
        entity_id: String,
    },

    /// The handler failed and the retry budget is spent.
    Failed {
        job_id: Uuid,
        kind: JobKind,
        entity_id: String,
        error_message: String,
    },

    /// The handler failed and the job went back to the queue.
    Retrying {
        job_id: Uuid,
        kind: JobKind,
        entity_id: String,
        retry_count: i32,
    },
}

impl JobEvent {
    pub fn started(job: &Job) -> Self {
        JobEvent::Started {
            job_id: job.id,
            kind: job.kind,
            entity_id: job.entity_id.clone(),
        }
    }

    pub fn completed(job: &Job) -> Self {
        JobEvent::Completed {
            job_id: job.id,
            kind: job.kind,
            entity_id: job.entity_id.clone(),
        }
    }

    pub fn failed(job: &Job, error_message: impl Into<String>) -> Self {
        JobEvent::Failed {
            job_id: job.id,
            kind: job.kind,
            entity_id: job.entity_id.clone(),
            error_message: error_message.into(),
        }
    }

    pub fn retrying(job: &Job, retry_count: i32) -> Self {
        JobEvent::Retrying {
            job_id: job.id,
            kind: job.kind,
            entity_id: job.entity_id.clone(),
            retry_count,
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::Started { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Retrying { job_id, .. } => *job_id,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobEvent::Started { kind, .. }
            | JobEvent::Completed { kind, .. }
            | JobEvent::Failed { kind, .. }
            | JobEvent::Retrying { kind, .. } => *kind,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            JobEvent::Started { entity_id, .. }
            | JobEvent::Completed { entity_id, .. }
            | JobEvent::Failed { entity_id, .. }
            | JobEvent::Retrying { entity_id, .. } => entity_id,
        }
    }

    /// Wire name of the variant, matching the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::Started { .. } => "started",
            JobEvent::Completed { .. } => "completed",
            JobEvent::Failed { .. } => "failed",
            JobEvent::Retrying { .. } => "retrying",
        }
    }

    /// True for the last event a job will ever produce.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::builder()
            .id(Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap())
            .kind(JobKind::GenerateSummary)
            .entity_id("conflict-1")
            .build()
    }

    #[test]
    fn event_started_serializes() {
        let json = serde_json::to_value(JobEvent::started(&sample_job())).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "type": "started",
                "jobId": "550e8400-e29b-41d4-a716-446655440000",
                "kind": "GENERATE_SUMMARY",
                "entityId": "conflict-1",
            })
        );
    }

    #[test]
    fn event_failed_carries_error_message() {
        let json = serde_json::to_value(JobEvent::failed(&sample_job(), "rate limited")).unwrap();

        assert_eq!(json["type"], "failed");
        assert_eq!(json["errorMessage"], "rate limited");
    }

    #[test]
    fn event_retrying_carries_retry_count() {
        let json = serde_json::to_value(JobEvent::retrying(&sample_job(), 2)).unwrap();

        assert_eq!(json["type"], "retrying");
        assert_eq!(json["retryCount"], 2);
        assert!(json.get("errorMessage").is_none());
    }

    #[test]
    fn event_type_matches_serialized_tag() {
        let job = sample_job();
        for event in [
            JobEvent::started(&job),
            JobEvent::completed(&job),
            JobEvent::failed(&job, "boom"),
            JobEvent::retrying(&job, 1),
        ] {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
            assert_eq!(event.entity_id(), "conflict-1");
            assert_eq!(event.kind(), JobKind::GenerateSummary);
            assert_eq!(event.job_id(), job.id);
        }
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        let job = sample_job();
        assert!(!JobEvent::started(&job).is_terminal());
        assert!(!JobEvent::retrying(&job, 1).is_terminal());
        assert!(JobEvent::completed(&job).is_terminal());
        assert!(JobEvent::failed(&job, "boom").is_terminal());
    }

    #[test]
    fn event_deserializes_from_wire_shape() {
        let event: JobEvent = serde_json::from_value(serde_json::json!({
            "type": "completed",
            "jobId": "550e8400-e29b-41d4-a716-446655440000",
            "kind": "PROCESS_FEELINGS",
            "entityId": "journal-2",
        }))
        .unwrap();

        assert_eq!(event.kind(), JobKind::ProcessFeelings);
        assert_eq!(event.entity_id(), "journal-2");
    }
}
