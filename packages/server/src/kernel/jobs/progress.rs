//! Coarse progress hints shown to clients polling a job.
//!
//! Jobs do not report intermediate progress, so the percentage is derived
//! from the lifecycle state alone.

use serde::Serialize;

use super::{Job, JobKind, JobStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub percent: u8,
    pub message: String,
}

impl JobProgress {
    pub fn for_job(job: &Job) -> Self {
        Self::from_state(job.kind, job.status, job.retry_count)
    }

    pub fn from_state(kind: JobKind, status: JobStatus, retry_count: i32) -> Self {
        let (percent, message) = match status {
            JobStatus::Pending if retry_count > 0 => {
                (10, format!("Retrying (attempt {})", retry_count + 1))
            }
            JobStatus::Pending => (0, "Waiting to start".to_string()),
            JobStatus::Processing => (50, processing_message(kind).to_string()),
            JobStatus::Completed => (100, "Done".to_string()),
            JobStatus::Failed => (100, "Something went wrong. Please try again.".to_string()),
        };
        Self { percent, message }
    }
}

fn processing_message(kind: JobKind) -> &'static str {
    match kind {
        JobKind::ProcessFeelings => "Reflecting on your feelings",
        JobKind::GenerateSummary => "Summarizing the conversation",
        JobKind::GenerateDiscussionPoints => "Preparing discussion points",
        JobKind::UpdatePartnershipContext => "Updating your partnership context",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_starts_at_zero() {
        let progress = JobProgress::from_state(JobKind::GenerateSummary, JobStatus::Pending, 0);
        assert_eq!(progress.percent, 0);
    }

    #[test]
    fn retrying_pending_reports_attempt() {
        let progress = JobProgress::from_state(JobKind::GenerateSummary, JobStatus::Pending, 2);
        assert_eq!(progress.percent, 10);
        assert_eq!(progress.message, "Retrying (attempt 3)");
    }

    #[test]
    fn processing_message_depends_on_kind() {
        let feelings = JobProgress::from_state(JobKind::ProcessFeelings, JobStatus::Processing, 0);
        let summary = JobProgress::from_state(JobKind::GenerateSummary, JobStatus::Processing, 0);
        assert_eq!(feelings.percent, 50);
        assert_ne!(feelings.message, summary.message);
    }

    #[test]
    fn terminal_states_are_complete() {
        for status in [JobStatus::Completed, JobStatus::Failed] {
            let progress = JobProgress::from_state(JobKind::UpdatePartnershipContext, status, 3);
            assert_eq!(progress.percent, 100);
        }
    }
}
