//! Job model for asynchronous AI work.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

/// The closed set of job kinds. Each kind is served by exactly one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_kind", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    /// Turn a partner's raw emotional text into structured feelings.
    ProcessFeelings,
    /// Summarize a conflict once both sides are in.
    GenerateSummary,
    /// Produce discussion points for a retrospective.
    GenerateDiscussionPoints,
    /// Refresh the long-lived partnership context.
    UpdatePartnershipContext,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::ProcessFeelings,
        JobKind::GenerateSummary,
        JobKind::GenerateDiscussionPoints,
        JobKind::UpdatePartnershipContext,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ProcessFeelings => "PROCESS_FEELINGS",
            JobKind::GenerateSummary => "GENERATE_SUMMARY",
            JobKind::GenerateDiscussionPoints => "GENERATE_DISCUSSION_POINTS",
            JobKind::UpdatePartnershipContext => "UPDATE_PARTNERSHIP_CONTEXT",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Completed and Failed are final; the processor never touches them again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,

    pub kind: JobKind,
    #[builder(default)]
    pub status: JobStatus,

    /// Conflict, journal or retrospective id. Opaque to the processor.
    pub entity_id: String,
    #[builder(default, setter(strip_option))]
    pub payload: Option<serde_json::Value>,

    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,

    #[builder(default = 0)]
    pub retry_count: i32,
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        kind: JobKind,
        entity_id: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            status: JobStatus::Pending,
            entity_id: entity_id.into(),
            payload,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::Pending
    }

    /// Pending -> Processing. Re-stamps `started_at` on every attempt.
    pub(crate) fn start(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.started_at = Some(now.max(self.created_at));
    }

    /// Processing -> Completed.
    pub(crate) fn complete(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.error_message = None;
        self.completed_at = Some(self.clamp_after_start(now));
    }

    /// Processing -> Failed, keeping the last error for display.
    pub(crate) fn fail(&mut self, error_message: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(error_message.into());
        self.completed_at = Some(self.clamp_after_start(now));
    }

    /// Processing -> Pending with one more retry on the clock.
    pub(crate) fn schedule_retry(&mut self, error_message: impl Into<String>) {
        self.status = JobStatus::Pending;
        self.retry_count += 1;
        self.error_message = Some(error_message.into());
    }

    fn clamp_after_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.started_at {
            Some(started_at) => now.max(started_at),
            None => now.max(self.created_at),
        }
    }
}
