//! Test harnesses for integration testing.
//!
//! [`ProcessorHarness`] runs a real processor against the in-memory store.
//! [`PostgresHarness`] shares one Postgres container across all tests in a
//! binary; containers and migrations are initialized on first use.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use server_core::kernel::jobs::{
    InMemoryJobStore, JobProcessor, JobProcessorConfig, JobRegistry, JobStore, PostgresJobStore,
};
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Initialize tracing to respect RUST_LOG.
///
/// Run tests with: RUST_LOG=debug cargo test -- --nocapture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Processor tuning for tests: fast polling so recovery shows up quickly.
pub fn fast_config() -> JobProcessorConfig {
    JobProcessorConfig::default()
        .with_poll_interval(Duration::from_millis(50))
        .with_poll_error_backoff(Duration::from_millis(100))
}

/// A started processor over an in-memory store.
pub struct ProcessorHarness {
    pub store: Arc<InMemoryJobStore>,
    pub processor: Arc<JobProcessor>,
}

impl ProcessorHarness {
    pub fn start(registry: JobRegistry, config: JobProcessorConfig) -> Self {
        init_tracing();

        let store = Arc::new(InMemoryJobStore::new());
        let processor = Arc::new(
            JobProcessor::new(store.clone(), registry, config)
                .expect("valid processor config"),
        );
        processor.start().expect("processor starts");

        Self { store, processor }
    }

    pub fn dyn_store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub async fn shutdown(&self) {
        self.processor.shutdown().await;
    }
}

struct SharedPostgres {
    server_url: String,
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_POSTGRES: OnceCell<SharedPostgres> = OnceCell::const_new();

impl SharedPostgres {
    async fn init() -> Result<Self> {
        init_tracing();

        let postgres = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let server_url = format!("postgresql://postgres:postgres@{}:{}", pg_host, pg_port);

        Ok(Self {
            server_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_POSTGRES
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared Postgres container")
            })
            .await
    }
}

/// Store over a fresh, migrated database in the shared Postgres container.
///
/// Each harness gets its own database so a running processor never sees
/// another test's rows.
pub struct PostgresHarness {
    pub db_pool: PgPool,
    pub store: Arc<PostgresJobStore>,
}

impl PostgresHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedPostgres::get().await;

        let admin = PgPool::connect(&format!("{}/postgres", infra.server_url))
            .await
            .context("Failed to connect to test server")?;
        let db_name = format!("jobs_{}", uuid::Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE DATABASE {}", db_name))
            .execute(&admin)
            .await
            .context("Failed to create test database")?;
        admin.close().await;

        let store = PostgresJobStore::connect(&format!("{}/{}", infra.server_url, db_name)).await?;
        store.migrate().await?;

        Ok(Self {
            db_pool: store.pool().clone(),
            store: Arc::new(store),
        })
    }
}
