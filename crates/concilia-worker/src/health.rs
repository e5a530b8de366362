//! Health and metrics HTTP endpoints (Axum).

use axum::{extract::State, http::StatusCode, routing::get, Router};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::metrics::WorkerMetrics;

pub struct HealthState {
    pub metrics: WorkerMetrics,
    pub pool: SqlitePool,
}

pub fn health_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// Ready means the database answers.
async fn ready(State(state): State<Arc<HealthState>>) -> Result<&'static str, StatusCode> {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&state.pool).await {
        Ok(_) => Ok("OK"),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> String {
    state.metrics.encode()
}
