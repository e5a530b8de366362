//! Cancelled-row suppression on the FISCAL base.
//!
//! Rows whose indicator column equals the configured cancelled literal get a
//! `NF Cancelada` mark and never reach the matcher.

use async_trait::async_trait;
use chrono::Utc;
use concilia_config::{grupo, status};
use concilia_store::{introspect, quote_ident};
use tracing::{debug, info};

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::orchestrator::PipelineStep;

pub struct CancelamentoStep;

#[async_trait]
impl PipelineStep for CancelamentoStep {
    fn name(&self) -> &'static str {
        "CancelamentoBaseB"
    }

    async fn run(&self, ctx: &PipelineContext) -> Result<(), PipelineError> {
        let Some(config_id) = ctx.config_cancelamento_id else {
            debug!("Job {}: no cancelamento config, skipping", ctx.job_id);
            return Ok(());
        };
        let config = ctx.config_cancelamento(config_id).await?;
        let base = ctx.base(ctx.base_fiscal_id).await?;

        if !introspect::table_exists(ctx.pool(), "conciliacao_marks").await? {
            return Err(PipelineError::Schema("conciliacao_marks".to_string()));
        }
        introspect::require_column(ctx.pool(), &base.tabela_sqlite, &config.coluna_indicador)
            .await
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        // Numeric indicator columns compare through TEXT so the configured
        // literal matches regardless of storage class.
        let sql = format!(
            "INSERT INTO conciliacao_marks (base_id, row_id, status, grupo, chave, created_at)
             SELECT ?1, t.id, ?2, ?3, NULL, ?4
             FROM {table} t
             WHERE CAST(t.{indicador} AS TEXT) = ?5
               AND NOT EXISTS (
                   SELECT 1 FROM conciliacao_marks m
                   WHERE m.base_id = ?1 AND m.row_id = t.id AND m.grupo = ?3
               )",
            table = quote_ident(&base.tabela_sqlite),
            indicador = quote_ident(&config.coluna_indicador),
        );
        let result = sqlx::query(&sql)
            .bind(base.id)
            .bind(status::NAO_AVALIADO)
            .bind(grupo::NF_CANCELADA)
            .bind(Utc::now().to_rfc3339())
            .bind(&config.valor_cancelado)
            .execute(ctx.pool())
            .await?;

        info!(
            "Job {}: cancelamento marked {} rows on {}",
            ctx.job_id,
            result.rows_affected(),
            base.tabela_sqlite
        );
        Ok(())
    }
}
