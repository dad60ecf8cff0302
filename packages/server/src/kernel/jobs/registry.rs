//! Job registry mapping each [`JobKind`] to its handler.
//!
//! Domains register their handlers at startup. The registry is then frozen
//! behind an `Arc` and shared by every worker; dispatch is a map lookup on
//! the closed kind enum.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = JobRegistry::new();
//! registry.register(JobKind::GenerateSummary, Arc::new(SummaryHandler::new(ai.clone())));
//! registry.register_fn(JobKind::ProcessFeelings, |entity_id, payload| async move {
//!     feelings_actions::process(&entity_id, payload).await
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::{JobError, JobKind};

/// Kind-specific business logic invoked by a worker.
///
/// Returning `Err` (or panicking) counts as a handler failure and goes
/// through the retry budget.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn process(&self, entity_id: &str, payload: Option<&serde_json::Value>) -> Result<()>;
}

/// Adapter turning an async closure into a [`JobHandler`].
struct FnHandler<F> {
    handler: F,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(String, Option<serde_json::Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn process(&self, entity_id: &str, payload: Option<&serde_json::Value>) -> Result<()> {
        (self.handler)(entity_id.to_string(), payload.cloned()).await
    }
}

#[derive(Default, Clone)]
pub struct JobRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: JobKind, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Register an async closure as the handler for `kind`.
    pub fn register_fn<F, Fut>(&mut self, kind: JobKind, handler: F) -> &mut Self
    where
        F: Fn(String, Option<serde_json::Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(kind, Arc::new(FnHandler { handler }))
    }

    pub fn handler_for(&self, kind: JobKind) -> Result<&Arc<dyn JobHandler>, JobError> {
        self.handlers.get(&kind).ok_or(JobError::NoHandler(kind))
    }

    pub fn is_registered(&self, kind: JobKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Kinds with no handler. Jobs of these kinds will fail.
    pub fn missing_kinds(&self) -> Vec<JobKind> {
        JobKind::ALL
            .into_iter()
            .filter(|kind| !self.is_registered(*kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl JobHandler for EchoHandler {
        async fn process(&self, entity_id: &str, _payload: Option<&serde_json::Value>) -> Result<()> {
            anyhow::ensure!(!entity_id.is_empty(), "empty entity id");
            Ok(())
        }
    }

    #[test]
    fn test_register_and_check() {
        let mut registry = JobRegistry::new();
        registry.register(JobKind::GenerateSummary, Arc::new(EchoHandler));

        assert!(registry.is_registered(JobKind::GenerateSummary));
        assert!(!registry.is_registered(JobKind::ProcessFeelings));
    }

    #[test]
    fn test_missing_kinds() {
        let mut registry = JobRegistry::new();
        registry
            .register(JobKind::GenerateSummary, Arc::new(EchoHandler))
            .register(JobKind::ProcessFeelings, Arc::new(EchoHandler));

        assert_eq!(
            registry.missing_kinds(),
            vec![
                JobKind::GenerateDiscussionPoints,
                JobKind::UpdatePartnershipContext
            ]
        );
    }

    #[test]
    fn test_unregistered_kind_is_an_error() {
        let registry = JobRegistry::new();
        assert!(matches!(
            registry.handler_for(JobKind::GenerateSummary),
            Err(JobError::NoHandler(JobKind::GenerateSummary))
        ));
    }

    #[tokio::test]
    async fn test_closure_handler_receives_entity_and_payload() {
        let mut registry = JobRegistry::new();
        registry.register_fn(JobKind::ProcessFeelings, |entity_id, payload| async move {
            anyhow::ensure!(entity_id == "journal-1", "wrong entity {}", entity_id);
            anyhow::ensure!(payload.is_some(), "missing payload");
            Ok(())
        });

        let handler = registry.handler_for(JobKind::ProcessFeelings).unwrap();
        let payload = serde_json::json!({"text": "tired"});
        handler.process("journal-1", Some(&payload)).await.unwrap();
        assert!(handler.process("journal-2", Some(&payload)).await.is_err());
    }

    #[tokio::test]
    async fn test_trait_handler_dispatch() {
        let mut registry = JobRegistry::new();
        registry.register(JobKind::GenerateSummary, Arc::new(EchoHandler));

        let handler = registry.handler_for(JobKind::GenerateSummary).unwrap();
        assert!(handler.process("conflict-1", None).await.is_ok());
        assert!(handler.process("", None).await.is_err());
    }
}
