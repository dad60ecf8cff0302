use thiserror::Error;

use super::JobKind;

/// Typed failures raised by the job core itself.
///
/// Store and handler failures travel as `anyhow::Error`; these cover the
/// cases callers may want to match on.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("no handler registered for job kind {0}")]
    NoHandler(JobKind),

    #[error("invalid job processor config: {0}")]
    InvalidConfig(String),

    #[error("job processor already started")]
    AlreadyStarted,

    #[error("job processor has been shut down")]
    ShutDown,
}
