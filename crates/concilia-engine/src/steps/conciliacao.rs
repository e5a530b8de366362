//! The core matcher: Conciliação A × B.
//!
//! Populates `conciliacao_result_<jobId>`: marked rows first, then one
//! grouped classification per (key identifier, composite key value), then
//! residuals. Key identifiers run in configuration order; a row consumed
//! under one identifier never rejoins under a later one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use concilia_config::{grupo, status, KeySet};
use concilia_store::rows::{composite_key, value_to_f64};
use concilia_store::{bases, introspect, marks, quote_ident, results, ResultEntry};
use serde_json::{Map, Value};
use sqlx::Row;
use tracing::{debug, info};

use crate::classify::round6;
use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::groups::{self, key_values_for, snapshot, MatchGroup, ProcessOptions, RowMap};
use crate::orchestrator::PipelineStep;

pub struct ConciliacaoStep;

/// Key columns plus the amount column: everything the matcher reads from a
/// base row (cache hydration and snapshots select the same list).
fn working_columns(chaves: &KeySet, value_col: &str) -> Vec<String> {
    let mut cols = chaves.all_columns();
    if !cols.iter().any(|c| c == value_col) {
        cols.push(value_col.to_string());
    }
    cols
}

fn amount_of(row: &Map<String, Value>, column: &str, invert: bool) -> f64 {
    let raw = row.get(column).map(value_to_f64).unwrap_or(0.0);
    if invert {
        -raw
    } else {
        raw
    }
}

#[async_trait]
impl PipelineStep for ConciliacaoStep {
    fn name(&self) -> &'static str {
        "ConciliacaoAB"
    }

    async fn run(&self, ctx: &PipelineContext) -> Result<(), PipelineError> {
        let pool = ctx.pool();
        let config = ctx.config_conciliacao(ctx.config_conciliacao_id).await?;
        let base_a = ctx.base(ctx.base_contabil_id).await?;
        let base_b = ctx.base(ctx.base_fiscal_id).await?;
        let settings = ctx.settings();

        if !introspect::table_exists(pool, "conciliacao_marks").await? {
            return Err(PipelineError::Schema("conciliacao_marks".to_string()));
        }
        for (table, col) in [
            (&base_a.tabela_sqlite, &config.coluna_conciliacao_contabil),
            (&base_b.tabela_sqlite, &config.coluna_conciliacao_fiscal),
        ] {
            introspect::require_column(pool, table, col)
                .await
                .map_err(|e| PipelineError::Config(e.to_string()))?;
        }
        for (table, chaves) in [
            (&base_a.tabela_sqlite, &config.chaves_contabil),
            (&base_b.tabela_sqlite, &config.chaves_fiscal),
        ] {
            for col in chaves.all_columns() {
                introspect::require_column(pool, table, &col)
                    .await
                    .map_err(|e| PipelineError::Config(e.to_string()))?;
            }
        }

        let key_ids = config.key_identifiers();
        results::ensure_result_table(pool, ctx.job_id, &key_ids).await?;

        let cols_a = working_columns(&config.chaves_contabil, &config.coluna_conciliacao_contabil);
        let cols_b = working_columns(&config.chaves_fiscal, &config.coluna_conciliacao_fiscal);
        let opts = Arc::new(ProcessOptions {
            value_col_a: config.coluna_conciliacao_contabil.clone(),
            value_col_b: config.coluna_conciliacao_fiscal.clone(),
            inverter: config.inverter_sinal_fiscal,
            limite: config.limite_diferenca_imaterial,
            key_identifiers: key_ids.clone(),
            chaves_contabil: config.chaves_contabil.clone(),
            chaves_fiscal: config.chaves_fiscal.clone(),
            snapshot_cols_a: cols_a.clone(),
            snapshot_cols_b: cols_b.clone(),
        });

        let mut matched_a: HashSet<i64> = HashSet::new();
        let mut matched_b: HashSet<i64> = HashSet::new();
        let mut cache_a: Arc<RowMap> = Arc::new(HashMap::new());
        let mut cache_b: Arc<RowMap> = Arc::new(HashMap::new());

        // Marked rows enter the result first; their row ids are consumed.
        let mut mark_entries: Vec<ResultEntry> = Vec::new();

        let mut marks_a = marks::for_base(pool, base_a.id).await?;
        let mut seen = HashSet::new();
        marks_a.retain(|m| seen.insert(m.row_id));
        if !marks_a.is_empty() {
            let ids: Vec<i64> = marks_a.iter().map(|m| m.row_id).collect();
            let fetched = bases::fetch_rows_by_ids(pool, &base_a.tabela_sqlite, &ids, &cols_a).await?;
            Arc::make_mut(&mut cache_a).extend(fetched);
            for mark in &marks_a {
                let empty = Map::new();
                let row = cache_a.get(&mark.row_id).unwrap_or(&empty);
                let value_a = round6(amount_of(row, &config.coluna_conciliacao_contabil, false));
                mark_entries.push(ResultEntry {
                    chave: mark.chave.clone(),
                    status: mark.status.clone(),
                    grupo: mark.grupo.clone(),
                    a_row_id: Some(mark.row_id),
                    b_row_id: None,
                    a_values: Some(snapshot(mark.row_id, row, &cols_a)),
                    b_values: None,
                    value_a,
                    value_b: 0.0,
                    difference: value_a,
                    key_values: key_values_for(row, &config.chaves_contabil),
                });
                matched_a.insert(mark.row_id);
            }
        }

        let mut marks_b = marks::for_base(pool, base_b.id).await?;
        let mut seen = HashSet::new();
        marks_b.retain(|m| seen.insert(m.row_id));
        if !marks_b.is_empty() {
            let ids: Vec<i64> = marks_b.iter().map(|m| m.row_id).collect();
            let fetched = bases::fetch_rows_by_ids(pool, &base_b.tabela_sqlite, &ids, &cols_b).await?;
            Arc::make_mut(&mut cache_b).extend(fetched);
            for mark in &marks_b {
                let empty = Map::new();
                let row = cache_b.get(&mark.row_id).unwrap_or(&empty);
                let value_b = round6(amount_of(
                    row,
                    &config.coluna_conciliacao_fiscal,
                    config.inverter_sinal_fiscal,
                ));
                mark_entries.push(ResultEntry {
                    chave: mark.chave.clone(),
                    status: mark.status.clone(),
                    grupo: mark.grupo.clone(),
                    a_row_id: None,
                    b_row_id: Some(mark.row_id),
                    a_values: None,
                    b_values: Some(snapshot(mark.row_id, row, &cols_b)),
                    value_a: 0.0,
                    value_b,
                    difference: round6(-value_b),
                    key_values: key_values_for(row, &config.chaves_fiscal),
                });
                matched_b.insert(mark.row_id);
            }
        }
        results::insert_entries(pool, ctx.job_id, &key_ids, &mark_entries).await?;
        debug!(
            "Job {}: ingested {} marks ({} A, {} B)",
            ctx.job_id,
            mark_entries.len(),
            marks_a.len(),
            marks_b.len()
        );

        // One pass per key identifier, configuration order. First match wins.
        for key_id in &key_ids {
            let a_cols: Vec<String> = config
                .chaves_contabil
                .columns(key_id)
                .map(<[String]>::to_vec)
                .unwrap_or_default();
            let b_cols: Vec<String> = config
                .chaves_fiscal
                .columns(key_id)
                .map(<[String]>::to_vec)
                .unwrap_or_default();
            if a_cols.is_empty() && b_cols.is_empty() {
                continue;
            }
            if a_cols.is_empty() || b_cols.is_empty() {
                debug!("Job {}: {} configured on one side only, skipping", ctx.job_id, key_id);
                continue;
            }

            // Pairwise equality; a shorter list repeats from its start when
            // arities differ (validation rejects that upfront, this is the
            // runtime fallback).
            let width = a_cols.len().max(b_cols.len());
            let predicates: Vec<String> = (0..width)
                .map(|i| {
                    format!(
                        "a.{} = b.{}",
                        quote_ident(&a_cols[i % a_cols.len()]),
                        quote_ident(&b_cols[i % b_cols.len()])
                    )
                })
                .collect();
            let sql = format!(
                "SELECT a.id AS a_id, b.id AS b_id FROM {} a JOIN {} b ON {} ORDER BY a.id, b.id",
                quote_ident(&base_a.tabela_sqlite),
                quote_ident(&base_b.tabela_sqlite),
                predicates.join(" AND ")
            );

            let mut pairs: Vec<(i64, i64)> = Vec::new();
            for row in sqlx::query(&sql).fetch_all(pool).await? {
                let a_id: i64 = row.get("a_id");
                let b_id: i64 = row.get("b_id");
                if matched_a.contains(&a_id) || matched_b.contains(&b_id) {
                    continue;
                }
                pairs.push((a_id, b_id));
            }
            if pairs.is_empty() {
                continue;
            }

            let need_a: Vec<i64> = {
                let mut ids: Vec<i64> =
                    pairs.iter().map(|(a, _)| *a).filter(|id| !cache_a.contains_key(id)).collect();
                ids.sort_unstable();
                ids.dedup();
                ids
            };
            if !need_a.is_empty() {
                let fetched =
                    bases::fetch_rows_by_ids(pool, &base_a.tabela_sqlite, &need_a, &cols_a).await?;
                Arc::make_mut(&mut cache_a).extend(fetched);
            }
            let need_b: Vec<i64> = {
                let mut ids: Vec<i64> =
                    pairs.iter().map(|(_, b)| *b).filter(|id| !cache_b.contains_key(id)).collect();
                ids.sort_unstable();
                ids.dedup();
                ids
            };
            if !need_b.is_empty() {
                let fetched =
                    bases::fetch_rows_by_ids(pool, &base_b.tabela_sqlite, &need_b, &cols_b).await?;
                Arc::make_mut(&mut cache_b).extend(fetched);
            }

            // Group by composite value. A row claims the first composite it
            // joins under (join order: ascending a.id, then b.id).
            let mut match_groups: Vec<MatchGroup> = Vec::new();
            let mut by_composite: HashMap<String, usize> = HashMap::new();
            let mut assigned_a: HashMap<i64, usize> = HashMap::new();
            let mut assigned_b: HashMap<i64, usize> = HashMap::new();
            for (a_id, b_id) in pairs {
                let empty = Map::new();
                let row_a = cache_a.get(&a_id).unwrap_or(&empty);
                let composite = composite_key(row_a, &a_cols);
                let group_index = *by_composite.entry(composite.clone()).or_insert_with(|| {
                    match_groups.push(MatchGroup {
                        key_id: key_id.clone(),
                        composite,
                        a_ids: Vec::new(),
                        b_ids: Vec::new(),
                    });
                    match_groups.len() - 1
                });

                let a_slot = assigned_a.get(&a_id).copied();
                let b_slot = assigned_b.get(&b_id).copied();
                if a_slot.is_some_and(|g| g != group_index)
                    || b_slot.is_some_and(|g| g != group_index)
                {
                    continue;
                }
                if a_slot.is_none() {
                    assigned_a.insert(a_id, group_index);
                    match_groups[group_index].a_ids.push(a_id);
                }
                if b_slot.is_none() {
                    assigned_b.insert(b_id, group_index);
                    match_groups[group_index].b_ids.push(b_id);
                }
            }

            let total_groups = match_groups.len();
            for batch in match_groups.chunks(settings.batch_size) {
                let out = groups::process(batch, &cache_a, &cache_b, &opts, settings).await;
                results::insert_entries(pool, ctx.job_id, &key_ids, &out.entries).await?;
                matched_a.extend(out.matched_a);
                matched_b.extend(out.matched_b);
            }
            info!("Job {}: {} matched {} groups", ctx.job_id, key_id, total_groups);
        }

        // Residuals: whatever survived every key iteration.
        let first_key = key_ids.first().cloned();

        let mut residuals: Vec<ResultEntry> = Vec::new();
        bases::for_each_row(pool, &base_a.tabela_sqlite, &cols_a, |id, row| {
            if !matched_a.contains(&id) {
                let value_a = round6(amount_of(&row, &config.coluna_conciliacao_contabil, false));
                residuals.push(ResultEntry {
                    chave: first_key.clone(),
                    status: status::NAO_ENCONTRADO.to_string(),
                    grupo: grupo::NAO_ENCONTRADO.to_string(),
                    a_row_id: Some(id),
                    b_row_id: None,
                    a_values: Some(snapshot(id, &row, &cols_a)),
                    b_values: None,
                    value_a,
                    value_b: 0.0,
                    difference: value_a,
                    key_values: key_values_for(&row, &config.chaves_contabil),
                });
            }
            Ok(())
        })
        .await?;
        let residual_a = residuals.len();
        bases::for_each_row(pool, &base_b.tabela_sqlite, &cols_b, |id, row| {
            if !matched_b.contains(&id) {
                let value_b = round6(amount_of(
                    &row,
                    &config.coluna_conciliacao_fiscal,
                    config.inverter_sinal_fiscal,
                ));
                residuals.push(ResultEntry {
                    chave: first_key.clone(),
                    status: status::NAO_ENCONTRADO.to_string(),
                    grupo: grupo::NAO_ENCONTRADO.to_string(),
                    a_row_id: None,
                    b_row_id: Some(id),
                    a_values: None,
                    b_values: Some(snapshot(id, &row, &cols_b)),
                    value_a: 0.0,
                    value_b,
                    difference: round6(-value_b),
                    key_values: key_values_for(&row, &config.chaves_fiscal),
                });
            }
            Ok(())
        })
        .await?;
        results::insert_entries(pool, ctx.job_id, &key_ids, &residuals).await?;

        info!(
            "Job {}: conciliação complete, {} residuals ({} A, {} B)",
            ctx.job_id,
            residuals.len(),
            residual_a,
            residuals.len() - residual_a
        );
        Ok(())
    }
}
