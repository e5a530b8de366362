//! Reaper — background task that fails stale RUNNING jobs.
//!
//! A crashed runner leaves its job RUNNING forever; every stage write bumps
//! `updated_at`, so a RUNNING job that stopped updating past the timeout is
//! dead and gets converged to FAILED.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tracing::warn;

use concilia_store::jobs;

use crate::metrics::WorkerMetrics;

/// Spawn the reaper as a background tokio task.
pub fn spawn_reaper(
    pool: SqlitePool,
    metrics: WorkerMetrics,
    interval_secs: u64,
    job_timeout_secs: u64,
) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            let cutoff = Utc::now() - Duration::seconds(job_timeout_secs as i64);
            match jobs::reap_stale(&pool, cutoff).await {
                Ok(ids) => {
                    for id in ids {
                        warn!("Reaper failed stale job {}", id);
                        metrics.reaper_failed.inc();
                    }
                }
                Err(e) => warn!("Reaper error: {}", e),
            }
        }
    });
}
