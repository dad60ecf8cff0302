use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::kernel::jobs::{JobProcessorConfig, RetryBackoff};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. Without it the host runs on the in-memory store.
    pub database_url: Option<String>,
    pub jobs: JobProcessorConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = JobProcessorConfig::default();

        let retry_base = parse_or::<u64>(&lookup, "JOB_RETRY_BACKOFF_MS", 0)?;
        let retry_max = parse_or::<u64>(&lookup, "JOB_RETRY_BACKOFF_MAX_MS", retry_base)?;

        let jobs = JobProcessorConfig {
            worker_count: parse_or(&lookup, "JOB_WORKER_COUNT", defaults.worker_count)?,
            poll_interval: millis_or(&lookup, "JOB_POLL_INTERVAL_MS", defaults.poll_interval)?,
            poll_error_backoff: millis_or(
                &lookup,
                "JOB_POLL_ERROR_BACKOFF_MS",
                defaults.poll_error_backoff,
            )?,
            poll_batch_size: parse_or(&lookup, "JOB_POLL_BATCH_SIZE", defaults.poll_batch_size)?,
            max_retries: parse_or(&lookup, "JOB_MAX_RETRIES", defaults.max_retries)?,
            event_capacity: parse_or(&lookup, "JOB_EVENT_CAPACITY", defaults.event_capacity)?,
            retry_backoff: RetryBackoff::exponential(
                Duration::from_millis(retry_base),
                Duration::from_millis(retry_max),
            ),
            entity_exclusive: parse_or(&lookup, "JOB_ENTITY_EXCLUSIVE", defaults.entity_exclusive)?,
        };
        jobs.validate().context("Invalid job processor configuration")?;

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            jobs,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid value, got {:?}", key, raw)),
        None => Ok(default),
    }
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    let millis = parse_or::<u64>(lookup, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}
