//! Prometheus metrics for worker observability.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone)]
pub struct WorkerMetrics {
    /// PENDING jobs waiting in the queue table.
    pub queue_depth: Gauge,
    pub active_jobs: Gauge,
    pub jobs_completed: Counter,
    pub jobs_failed: Counter,
    pub reaper_failed: Counter,
    pub registry: Arc<Registry>,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let queue_depth = Gauge::default();
        registry.register(
            "concilia_queue_depth",
            "Number of pending reconciliation jobs",
            queue_depth.clone(),
        );

        let active_jobs = Gauge::default();
        registry.register(
            "concilia_worker_active_jobs",
            "Jobs currently being processed",
            active_jobs.clone(),
        );

        let jobs_completed = Counter::default();
        registry.register(
            "concilia_worker_jobs_completed",
            "Jobs finished successfully",
            jobs_completed.clone(),
        );

        let jobs_failed = Counter::default();
        registry.register(
            "concilia_worker_jobs_failed",
            "Jobs that ended in failure",
            jobs_failed.clone(),
        );

        let reaper_failed = Counter::default();
        registry.register(
            "concilia_reaper_jobs_failed",
            "Stale jobs converged to FAILED by the reaper",
            reaper_failed.clone(),
        );

        Self {
            queue_depth,
            active_jobs,
            jobs_completed,
            jobs_failed,
            reaper_failed,
            registry: Arc::new(registry),
        }
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).unwrap();
        buf
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
