//! Per-job executor.
//!
//! Resolves the job's configuration, ensures indexes, runs the pipeline with
//! a stage reporter that publishes progress onto the job row, and writes the
//! terminal status.

use anyhow::{bail, Result};
use async_trait::async_trait;
use concilia_engine::{MatcherSettings, Pipeline, PipelineContext, StageReporter};
use concilia_store::{advisor, bases, configs, jobs};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

/// Stage code and label for one pipeline step name.
fn stage_for(step_name: &str) -> (&'static str, &'static str) {
    match step_name {
        "NullsBaseA" => ("normalizando_base_a", "Normalizando campos da Base Contábil"),
        "EstornoBaseA" => ("aplicando_estorno", "Aplicando regras de estorno"),
        "NullsBaseB" => ("normalizando_base_b", "Normalizando campos da Base Fiscal"),
        "CancelamentoBaseB" => ("aplicando_cancelamento", "Aplicando regras de cancelamento"),
        "ConciliacaoAB" => ("conciliando", "Conciliando bases A x B"),
        _ => ("executando", "Executando etapa"),
    }
}

/// Progress published before step `index` of `total` runs.
fn stage_progress(index: usize, total: usize) -> i64 {
    if total == 0 {
        return 10;
    }
    let pct = ((index as f64 / total as f64) * 100.0).round() as i64;
    pct.clamp(10, 99)
}

/// Writes stage transitions onto the job row. Progress updates are
/// best-effort; a failed write never aborts the step.
struct JobStageReporter {
    pool: SqlitePool,
    job_id: i64,
}

#[async_trait]
impl StageReporter for JobStageReporter {
    async fn report_stage(&self, step_name: &str, step_index: usize, total_steps: usize) {
        let (code, label) = stage_for(step_name);
        let progress = stage_progress(step_index, total_steps);
        if let Err(e) = jobs::set_stage(&self.pool, self.job_id, code, progress, label).await {
            warn!("Job {}: stage update failed: {}", self.job_id, e);
        }
    }
}

/// Execute one claimed job to completion. Writes DONE or FAILED before
/// returning; the returned error is for the caller's log.
pub async fn run_job(pool: SqlitePool, job_id: i64) -> Result<()> {
    let Some(job) = jobs::get(&pool, job_id).await? else {
        bail!("job {job_id} not found");
    };

    let config = match configs::get_conciliacao(&pool, job.config_conciliacao_id).await {
        Ok(config) => config,
        Err(e) => {
            jobs::mark_failed(&pool, job_id, &e.to_string()).await?;
            return Err(e.into());
        }
    };
    let base_contabil_id = job.base_contabil_id.unwrap_or(config.base_contabil_id);
    let base_fiscal_id = job.base_fiscal_id.unwrap_or(config.base_fiscal_id);

    // Indexes for every column the job will touch. Advisor failures on
    // individual columns are logged inside, not fatal.
    match (
        bases::get(&pool, base_contabil_id).await,
        bases::get(&pool, base_fiscal_id).await,
    ) {
        (Ok(base_a), Ok(base_b)) => {
            advisor::ensure_conciliacao_indexes(&pool, &base_a, &base_b, &config).await?;
            if let Some(estorno_id) = job.config_estorno_id {
                match configs::get_estorno(&pool, estorno_id).await {
                    Ok(estorno) => {
                        advisor::ensure_estorno_indexes(&pool, &base_a, &estorno).await?
                    }
                    Err(e) => warn!("Job {}: estorno config unavailable: {}", job_id, e),
                }
            }
            if let Some(cancelamento_id) = job.config_cancelamento_id {
                match configs::get_cancelamento(&pool, cancelamento_id).await {
                    Ok(cancelamento) => {
                        advisor::ensure_cancelamento_indexes(&pool, &base_b, &cancelamento).await?
                    }
                    Err(e) => warn!("Job {}: cancelamento config unavailable: {}", job_id, e),
                }
            }
            advisor::analyze(&pool).await;
        }
        (a, b) => {
            let message = a.err().or(b.err()).map(|e| e.to_string()).unwrap_or_default();
            jobs::mark_failed(&pool, job_id, &message).await?;
            bail!("job {job_id}: {message}");
        }
    }

    jobs::set_stage(&pool, job_id, "preparando", 5, "Preparando conciliação").await?;

    let ctx = PipelineContext::new(
        pool.clone(),
        job_id,
        base_contabil_id,
        base_fiscal_id,
        job.config_conciliacao_id,
        job.config_estorno_id,
        job.config_cancelamento_id,
    )
    .with_settings(MatcherSettings::from_env())
    .with_reporter(Box::new(JobStageReporter {
        pool: pool.clone(),
        job_id,
    }));

    match Pipeline::standard().run(&ctx).await {
        Ok(()) => {
            jobs::mark_done(&pool, job_id).await?;
            info!("Job {} finished", job_id);
            Ok(())
        }
        Err(e) => {
            error!("Job {} failed: {}", job_id, e);
            jobs::mark_failed(&pool, job_id, &e.to_string()).await?;
            Err(e.into())
        }
    }
}
