//! concilia-worker binary — queue poller for Concilia reconciliation jobs.

mod config;
mod health;
mod metrics;
mod poller;
mod reaper;
mod runner;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::WorkerConfig;
use health::HealthState;
use metrics::WorkerMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = WorkerConfig::from_env()?;
    info!("Starting concilia-worker {}", config.worker_id);

    // Single-writer pool, PRAGMA tuning from the environment.
    let pool = concilia_store::open(&config.database_url).await?;
    concilia_store::schema::ensure_schema(&pool).await?;
    info!("Connected to database");

    let worker_metrics = WorkerMetrics::new();

    // Health/metrics HTTP server.
    let health_state = Arc::new(HealthState {
        metrics: worker_metrics.clone(),
        pool: pool.clone(),
    });
    let metrics_port = config.metrics_port;
    let router = health::health_router(health_state);
    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{metrics_port}");
        info!("Metrics server listening on {}", addr);
        let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
        axum::serve(listener, router).await.unwrap();
    });

    // Stale-job janitor.
    reaper::spawn_reaper(
        pool.clone(),
        worker_metrics.clone(),
        config.reaper_interval_secs,
        config.job_timeout_secs,
    );
    info!(
        "Reaper started (interval: {}s, job timeout: {}s)",
        config.reaper_interval_secs, config.job_timeout_secs
    );

    // Poll loop (blocks forever).
    poller::run_poller(pool, config, worker_metrics).await
}
