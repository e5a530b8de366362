//! Job repository: submission, atomic claim, stage/progress updates.
//!
//! The `jobs_conciliacao` table is the queue. A job is claimed by flipping
//! PENDING→RUNNING in a single UPDATE guarded on the current status; whoever
//! sees one affected row owns the job. Status never reverts.

use chrono::{DateTime, Utc};
use concilia_config::{validate_base_override, BaseTipo, Job, JobRequest, JobStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{Result, StoreError};
use crate::{bases, configs};

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let status_text: String = row.get("status");
    let status = JobStatus::parse(&status_text)
        .ok_or_else(|| StoreError::InvalidConfig(format!("unknown job status '{status_text}'")))?;
    Ok(Job {
        id: row.get("id"),
        nome: row.get("nome"),
        status,
        config_conciliacao_id: row.get("config_conciliacao_id"),
        config_estorno_id: row.get("config_estorno_id"),
        config_cancelamento_id: row.get("config_cancelamento_id"),
        base_contabil_id: row.get("base_contabil_id"),
        base_fiscal_id: row.get("base_fiscal_id"),
        pipeline_stage: row.get("pipeline_stage"),
        pipeline_progress: row.get("pipeline_progress"),
        pipeline_stage_label: row.get("pipeline_stage_label"),
        erro: row.get("erro"),
        arquivo_exportado: row.get("arquivo_exportado"),
        export_status: row.get("export_status"),
        export_progress: row.get("export_progress"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const JOB_COLUMNS: &str = "id, nome, status, config_conciliacao_id, config_estorno_id,
    config_cancelamento_id, base_contabil_id, base_fiscal_id, pipeline_stage,
    pipeline_progress, pipeline_stage_label, erro, arquivo_exportado, export_status,
    export_progress, created_at, updated_at";

/// Submit a job. Base overrides are checked against the slot they fill
/// before anything is written.
pub async fn create(pool: &SqlitePool, request: &JobRequest) -> Result<Job> {
    // The config must exist; its key sets must parse.
    configs::get_conciliacao(pool, request.config_conciliacao_id).await?;

    if let Some(base_id) = request.base_contabil_id {
        let base = bases::get(pool, base_id).await?;
        validate_base_override(&base, BaseTipo::Contabil)
            .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
    }
    if let Some(base_id) = request.base_fiscal_id {
        let base = bases::get(pool, base_id).await?;
        validate_base_override(&base, BaseTipo::Fiscal)
            .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
    }

    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO jobs_conciliacao
            (nome, status, config_conciliacao_id, config_estorno_id, config_cancelamento_id,
             base_contabil_id, base_fiscal_id, pipeline_stage, pipeline_progress,
             created_at, updated_at)
         VALUES (?1, 'PENDING', ?2, ?3, ?4, ?5, ?6, 'queued', 0, ?7, ?7)",
    )
    .bind(&request.nome)
    .bind(request.config_conciliacao_id)
    .bind(request.config_estorno_id)
    .bind(request.config_cancelamento_id)
    .bind(request.base_contabil_id)
    .bind(request.base_fiscal_id)
    .bind(now)
    .execute(pool)
    .await?;

    get(pool, result.last_insert_rowid())
        .await?
        .ok_or_else(|| StoreError::NotFound("job vanished after insert".to_string()))
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<Job>> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs_conciliacao WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(|r| job_from_row(&r)).transpose()
}

/// The oldest PENDING job, if any.
pub async fn oldest_pending(pool: &SqlitePool) -> Result<Option<Job>> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs_conciliacao
         WHERE status = 'PENDING' ORDER BY created_at ASC, id ASC LIMIT 1"
    ))
    .fetch_optional(pool)
    .await?;
    row.map(|r| job_from_row(&r)).transpose()
}

/// Atomically claim a PENDING job. Returns false if someone else won.
pub async fn claim(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE jobs_conciliacao SET status = 'RUNNING', updated_at = ?2
         WHERE id = ?1 AND status = 'PENDING'",
    )
    .bind(id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Publish pipeline stage, progress and label.
pub async fn set_stage(
    pool: &SqlitePool,
    id: i64,
    stage: &str,
    progress: i64,
    label: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE jobs_conciliacao
         SET pipeline_stage = ?2, pipeline_progress = ?3, pipeline_stage_label = ?4,
             updated_at = ?5
         WHERE id = ?1",
    )
    .bind(id)
    .bind(stage)
    .bind(progress.clamp(0, 100))
    .bind(label)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_done(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE jobs_conciliacao
         SET status = 'DONE', pipeline_stage = 'finalizando', pipeline_progress = 100,
             pipeline_stage_label = 'Conciliação concluída', erro = NULL, updated_at = ?2
         WHERE id = ?1",
    )
    .bind(id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed(pool: &SqlitePool, id: i64, erro: &str) -> Result<()> {
    sqlx::query(
        "UPDATE jobs_conciliacao
         SET status = 'FAILED', pipeline_stage = 'failed',
             pipeline_stage_label = 'Conciliação interrompida', erro = ?2, updated_at = ?3
         WHERE id = ?1",
    )
    .bind(id)
    .bind(erro)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Fail RUNNING jobs whose last update is older than `cutoff`. Returns the
/// ids that were reaped.
pub async fn reap_stale(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "UPDATE jobs_conciliacao
         SET status = 'FAILED', pipeline_stage = 'failed',
             pipeline_stage_label = 'Conciliação interrompida',
             erro = 'worker não respondeu dentro do tempo limite', updated_at = ?2
         WHERE status = 'RUNNING' AND updated_at < ?1
         RETURNING id",
    )
    .bind(cutoff)
    .bind(Utc::now())
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// PENDING jobs currently queued (metrics gauge).
pub async fn count_pending(pool: &SqlitePool) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs_conciliacao WHERE status = 'PENDING'")
            .fetch_one(pool)
            .await?;
    Ok(count)
}
