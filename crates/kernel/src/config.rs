//! Configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::builtin::CORE_PLUGIN;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Redis connection URL, used for the job queue and the startup lock.
    pub redis_url: String,

    /// Configured plugin references, in dispatch order.
    pub plugins: Vec<String>,

    /// Name of the queue deferred jobs are pushed onto (default: background_jobs).
    pub job_queue: String,

    /// How long a worker blocks on an empty queue before re-checking shutdown.
    pub worker_poll: Duration,

    /// Interval between log retention sweeps in the worker (default: 1 hour).
    pub log_cleanup_interval: Duration,

    /// How long startup waits for another process's reconciliation (default: 60s).
    pub reconcile_lock_wait: Duration,

    /// Public base URL used when plugins build links into metadata.
    pub site_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url =
            lookup("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let redis_url =
            lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());

        let plugins = lookup("PLUGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec![CORE_PLUGIN.to_string()]);

        let job_queue = lookup("JOB_QUEUE").unwrap_or_else(|| "background_jobs".to_string());

        let worker_poll = secs(&lookup, "WORKER_POLL_SECS", 5)?;
        let log_cleanup_interval = secs(&lookup, "LOG_CLEANUP_INTERVAL_SECS", 3600)?;
        let reconcile_lock_wait = secs(&lookup, "RECONCILE_LOCK_WAIT_SECS", 60)?;

        let site_url = lookup("SITE_URL").unwrap_or_else(|| "http://localhost:8080".to_string());
        Url::parse(&site_url).with_context(|| format!("SITE_URL is not a valid URL: {site_url}"))?;

        Ok(Self {
            database_url,
            database_max_connections,
            redis_url,
            plugins,
            job_queue,
            worker_poll,
            log_cleanup_interval,
            reconcile_lock_wait,
            site_url,
        })
    }
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    let value = match lookup(key) {
        Some(v) => v
            .parse::<u64>()
            .with_context(|| format!("{key} must be a whole number of seconds"))?,
        None => default,
    };
    Ok(Duration::from_secs(value))
}
