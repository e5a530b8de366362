//! Worker configuration from environment variables.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub database_url: String,
    pub metrics_port: u16,
    /// Queue poll interval; floored at 1s.
    pub poll_interval_secs: u64,
    // Stale-job janitor
    pub reaper_interval_secs: u64,
    pub job_timeout_secs: u64,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let poll_interval_secs: u64 = std::env::var("WORKER_POLL_SECONDS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("Invalid WORKER_POLL_SECONDS")?;
        Ok(Self {
            worker_id: std::env::var("WORKER_ID")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL required")?,
            metrics_port: std::env::var("METRICS_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse()
                .context("Invalid METRICS_PORT")?,
            poll_interval_secs: poll_interval_secs.max(1),
            reaper_interval_secs: std::env::var("REAPER_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid REAPER_INTERVAL_SECS")?,
            job_timeout_secs: std::env::var("WORKER_JOB_TIMEOUT_SECS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()
                .context("Invalid WORKER_JOB_TIMEOUT_SECS")?,
        })
    }
}
