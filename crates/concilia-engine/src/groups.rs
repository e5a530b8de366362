//! Match-group model and the parallel group processor.
//!
//! Once the matcher has materialized the groups for one key identifier,
//! classification and result-row construction are independent per group.
//! `process` fans the groups out over blocking worker threads when the set
//! is large enough; `process_sync` is the fallback and the semantics
//! reference. Both are pure over their inputs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use concilia_config::KeySet;
use concilia_store::ResultEntry;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::warn;

use crate::classify::{classify, round6};

/// Rows of one base, keyed by row id. Shared read-only during processing.
pub type RowMap = HashMap<i64, Map<String, Value>>;

/// One match group: every surviving A/B row sharing (key id, composite value).
#[derive(Debug, Clone)]
pub struct MatchGroup {
    pub key_id: String,
    pub composite: String,
    pub a_ids: Vec<i64>,
    pub b_ids: Vec<i64>,
}

/// Static inputs of one processing run.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub value_col_a: String,
    pub value_col_b: String,
    pub inverter: bool,
    pub limite: f64,
    pub key_identifiers: Vec<String>,
    pub chaves_contabil: KeySet,
    pub chaves_fiscal: KeySet,
    /// Columns captured into the `a_values`/`b_values` snapshots.
    pub snapshot_cols_a: Vec<String>,
    pub snapshot_cols_b: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ProcessOutput {
    pub entries: Vec<ResultEntry>,
    pub matched_a: Vec<i64>,
    pub matched_b: Vec<i64>,
}

/// Matcher tuning, read once by the worker and carried in the context.
#[derive(Debug, Clone)]
pub struct MatcherSettings {
    /// Minimum group count before worker threads are used.
    pub threshold: usize,
    pub pool_size: usize,
    /// Groups per processing batch inside the matcher.
    pub batch_size: usize,
    pub task_timeout: Duration,
    pub threads_enabled: bool,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            threshold: 500,
            pool_size: cpus.saturating_sub(1).max(1),
            batch_size: 1000,
            task_timeout: Duration::from_millis(300_000),
            threads_enabled: cpus > 2,
        }
    }
}

impl MatcherSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        fn parse<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        Self {
            threshold: parse("WORKER_CONCILIACAO_THRESHOLD", defaults.threshold),
            pool_size: parse("WORKER_CONCILIACAO_POOL_SIZE", defaults.pool_size).max(1),
            batch_size: parse("WORKER_CONCILIACAO_BATCH_SIZE", defaults.batch_size).max(1),
            task_timeout: Duration::from_millis(parse(
                "WORKER_TASK_TIMEOUT",
                defaults.task_timeout.as_millis() as u64,
            )),
            threads_enabled: parse("WORKER_THREADS_ENABLED", defaults.threads_enabled),
        }
    }
}

/// JSON snapshot of one source row: id, key columns and the amount column.
pub fn snapshot(row_id: i64, row: &Map<String, Value>, columns: &[String]) -> Value {
    let mut map = Map::new();
    map.insert("id".to_string(), Value::Number(row_id.into()));
    for col in columns {
        map.insert(
            col.clone(),
            row.get(col).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(map)
}

/// Composite key value per key identifier for one row, using that side's
/// column lists. Identifiers without columns on this side are omitted.
pub fn key_values_for(row: &Map<String, Value>, chaves: &KeySet) -> IndexMap<String, String> {
    let mut values = IndexMap::new();
    for (key_id, cols) in chaves.iter() {
        if !cols.is_empty() {
            values.insert(
                key_id.to_string(),
                concilia_store::rows::composite_key(row, cols),
            );
        }
    }
    values
}

fn amount(row: Option<&Map<String, Value>>, column: &str, invert: bool) -> f64 {
    let raw = row
        .and_then(|r| r.get(column))
        .map(concilia_store::rows::value_to_f64)
        .unwrap_or(0.0);
    if invert {
        -raw
    } else {
        raw
    }
}

/// Classify and expand every group into result entries, synchronously.
pub fn process_sync(
    groups: &[MatchGroup],
    a_rows: &RowMap,
    b_rows: &RowMap,
    opts: &ProcessOptions,
) -> ProcessOutput {
    let mut out = ProcessOutput::default();
    for group in groups {
        let soma_a = round6(
            group
                .a_ids
                .iter()
                .map(|id| amount(a_rows.get(id), &opts.value_col_a, false))
                .sum(),
        );
        let soma_b = round6(
            group
                .b_ids
                .iter()
                .map(|id| amount(b_rows.get(id), &opts.value_col_b, opts.inverter))
                .sum(),
        );
        let difference = round6(soma_a - soma_b);
        let class = classify(
            !group.a_ids.is_empty(),
            !group.b_ids.is_empty(),
            soma_a,
            soma_b,
            opts.limite,
        );

        let empty = Map::new();
        for &a_id in &group.a_ids {
            let row = a_rows.get(&a_id).unwrap_or(&empty);
            out.entries.push(ResultEntry {
                chave: Some(group.key_id.clone()),
                status: class.status.to_string(),
                grupo: class.grupo.to_string(),
                a_row_id: Some(a_id),
                b_row_id: None,
                a_values: Some(snapshot(a_id, row, &opts.snapshot_cols_a)),
                b_values: None,
                value_a: soma_a,
                value_b: soma_b,
                difference,
                key_values: key_values_for(row, &opts.chaves_contabil),
            });
            out.matched_a.push(a_id);
        }
        for &b_id in &group.b_ids {
            let row = b_rows.get(&b_id).unwrap_or(&empty);
            out.entries.push(ResultEntry {
                chave: Some(group.key_id.clone()),
                status: class.status.to_string(),
                grupo: class.grupo.to_string(),
                a_row_id: None,
                b_row_id: Some(b_id),
                a_values: None,
                b_values: Some(snapshot(b_id, row, &opts.snapshot_cols_b)),
                value_a: soma_a,
                value_b: soma_b,
                difference,
                key_values: key_values_for(row, &opts.chaves_fiscal),
            });
            out.matched_b.push(b_id);
        }
    }
    out
}

/// Process groups, fanning out over `pool_size` blocking workers when the
/// set clears the threshold. Worker outputs are concatenated in dispatch
/// order; any join failure or timeout falls back to the synchronous path.
pub async fn process(
    groups: &[MatchGroup],
    a_rows: &Arc<RowMap>,
    b_rows: &Arc<RowMap>,
    opts: &Arc<ProcessOptions>,
    settings: &MatcherSettings,
) -> ProcessOutput {
    if groups.is_empty()
        || !settings.threads_enabled
        || settings.pool_size <= 1
        || groups.len() < settings.threshold
    {
        return process_sync(groups, a_rows, b_rows, opts);
    }

    let chunk_size = groups.len().div_ceil(settings.pool_size);
    let mut handles = Vec::new();
    for chunk in groups.chunks(chunk_size) {
        let chunk = chunk.to_vec();
        let a = Arc::clone(a_rows);
        let b = Arc::clone(b_rows);
        let o = Arc::clone(opts);
        handles.push(tokio::task::spawn_blocking(move || {
            process_sync(&chunk, &a, &b, &o)
        }));
    }

    let mut merged = ProcessOutput::default();
    for handle in handles {
        match tokio::time::timeout(settings.task_timeout, handle).await {
            Ok(Ok(part)) => {
                merged.entries.extend(part.entries);
                merged.matched_a.extend(part.matched_a);
                merged.matched_b.extend(part.matched_b);
            }
            Ok(Err(e)) => {
                warn!("Group worker panicked ({e}); falling back to synchronous path");
                return process_sync(groups, a_rows, b_rows, opts);
            }
            Err(_) => {
                warn!(
                    "Group worker exceeded {:?}; falling back to synchronous path",
                    settings.task_timeout
                );
                return process_sync(groups, a_rows, b_rows, opts);
            }
        }
    }
    merged
}
