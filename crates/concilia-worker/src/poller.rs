//! Queue poller — claims the oldest pending job each tick and runs it.
//!
//! One job in flight at a time: a tick awaits its runner before the next
//! tick fires, and the atomic PENDING→RUNNING claim keeps a second poller
//! (if one is ever deployed) from double-running a job.

use anyhow::Result;
use concilia_config::JobStatus;
use concilia_store::jobs;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::metrics::WorkerMetrics;
use crate::runner;

/// Run the poll loop forever.
pub async fn run_poller(
    pool: SqlitePool,
    config: WorkerConfig,
    metrics: WorkerMetrics,
) -> Result<()> {
    let mut interval =
        tokio::time::interval(Duration::from_secs(config.poll_interval_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Poller started for worker {} (interval: {}s)",
        config.worker_id, config.poll_interval_secs
    );
    loop {
        interval.tick().await;
        if let Err(e) = tick(&pool, &metrics).await {
            warn!("Poller tick failed: {}", e);
        }
    }
}

/// One poll cycle: refresh the queue gauge, claim, run, settle.
pub async fn tick(pool: &SqlitePool, metrics: &WorkerMetrics) -> Result<()> {
    metrics
        .queue_depth
        .set(jobs::count_pending(pool).await.unwrap_or(0));

    let Some(job) = jobs::oldest_pending(pool).await? else {
        return Ok(());
    };
    if !jobs::claim(pool, job.id).await? {
        debug!("Job {} claimed elsewhere", job.id);
        return Ok(());
    }
    info!("Claimed job {}", job.id);

    // Best-effort: the job is ours even if this write fails.
    if let Err(e) = jobs::set_stage(pool, job.id, "starting_worker", 8, "Iniciando processamento").await
    {
        warn!("Job {}: starting stage update failed: {}", job.id, e);
    }

    metrics.active_jobs.inc();
    let handle = tokio::spawn(runner::run_job(pool.clone(), job.id));
    match handle.await {
        Ok(Ok(())) => {
            metrics.jobs_completed.inc();
        }
        Ok(Err(e)) => {
            // The runner writes FAILED itself; this is the backstop for
            // errors raised before it could.
            ensure_failed(pool, job.id, &e.to_string()).await;
            metrics.jobs_failed.inc();
        }
        Err(e) => {
            error!("Job {} runner aborted: {}", job.id, e);
            ensure_failed(pool, job.id, "execução interrompida inesperadamente").await;
            metrics.jobs_failed.inc();
        }
    }
    metrics.active_jobs.dec();
    Ok(())
}

async fn ensure_failed(pool: &SqlitePool, job_id: i64, message: &str) {
    match jobs::get(pool, job_id).await {
        Ok(Some(job)) if job.status == JobStatus::Running => {
            if let Err(e) = jobs::mark_failed(pool, job_id, message).await {
                error!("Job {}: could not record failure: {}", job_id, e);
            }
        }
        Ok(_) => {}
        Err(e) => error!("Job {}: status check failed: {}", job_id, e),
    }
}
