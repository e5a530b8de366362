//! Estorno neutralization on the CONTABIL base.
//!
//! A row pair cancels out when one row's `coluna_a` value equals the other
//! row's `coluna_b` value and their `coluna_soma` amounts sum to (near) zero.
//! Both rows receive a Conciliado_Estorno mark sharing the group key
//! `<chave>_<aId>_<bId>` so the matcher skips them.

use std::collections::HashSet;

use async_trait::async_trait;
use concilia_config::{grupo, status};
use concilia_store::rows::value_to_key_string;
use concilia_store::{introspect, marks, quote_ident, Mark};
use serde_json::Value;
use sqlx::Row;
use tracing::{debug, info};

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::orchestrator::PipelineStep;

pub struct EstornoStep;

#[async_trait]
impl PipelineStep for EstornoStep {
    fn name(&self) -> &'static str {
        "EstornoBaseA"
    }

    async fn run(&self, ctx: &PipelineContext) -> Result<(), PipelineError> {
        let Some(config_id) = ctx.config_estorno_id else {
            debug!("Job {}: no estorno config, skipping", ctx.job_id);
            return Ok(());
        };
        let config = ctx.config_estorno(config_id).await?;
        let base = ctx.base(ctx.base_contabil_id).await?;

        if !introspect::table_exists(ctx.pool(), "conciliacao_marks").await? {
            return Err(PipelineError::Schema("conciliacao_marks".to_string()));
        }
        for col in [&config.coluna_a, &config.coluna_b, &config.coluna_soma] {
            introspect::require_column(ctx.pool(), &base.tabela_sqlite, col)
                .await
                .map_err(|e| PipelineError::Config(e.to_string()))?;
        }

        // Rows already neutralized by an earlier run stay neutralized.
        let mut consumed: HashSet<i64> =
            marks::row_ids_in_grupo(ctx.pool(), base.id, grupo::CONCILIADO_ESTORNO)
                .await?
                .into_iter()
                .collect();

        // Candidate pairs, ordered so the lowest (aId, bId) pair wins ties.
        let table = quote_ident(&base.tabela_sqlite);
        let col_a = quote_ident(&config.coluna_a);
        let col_b = quote_ident(&config.coluna_b);
        let col_soma = quote_ident(&config.coluna_soma);
        let sql = format!(
            "SELECT a.id AS a_id, b.id AS b_id, a.{col_a} AS chave_val
             FROM {table} a
             JOIN {table} b ON a.{col_a} = b.{col_b} AND a.id <> b.id
             WHERE ABS(a.{col_soma} + b.{col_soma}) <= ?1
             ORDER BY a.id, b.id"
        );
        let candidates = sqlx::query(&sql)
            .bind(config.limite_zero)
            .fetch_all(ctx.pool())
            .await?;

        let mut pending = Vec::new();
        for row in &candidates {
            let a_id: i64 = row.get("a_id");
            let b_id: i64 = row.get("b_id");
            if consumed.contains(&a_id) || consumed.contains(&b_id) {
                continue;
            }
            let raw = concilia_store::rows::row_to_map(row)?;
            let chave_val = value_to_key_string(raw.get("chave_val").unwrap_or(&Value::Null));
            let chave = format!("{chave_val}_{a_id}_{b_id}");

            for row_id in [a_id, b_id] {
                pending.push(Mark {
                    base_id: base.id,
                    row_id,
                    status: status::CONCILIADO.to_string(),
                    grupo: grupo::CONCILIADO_ESTORNO.to_string(),
                    chave: Some(chave.clone()),
                });
            }
            consumed.insert(a_id);
            consumed.insert(b_id);
        }

        let written = marks::insert_guarded(ctx.pool(), &pending).await?;
        info!(
            "Job {}: estorno marked {} rows ({} candidate pairs)",
            ctx.job_id,
            written,
            candidates.len()
        );
        Ok(())
    }
}
